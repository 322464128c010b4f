use catmaid_addons::adapters::prompt::{AssumeYes, InquirePrompt};
use catmaid_addons::config::cli::{translation_unit, translation_vector, DummyNodeAction};
use catmaid_addons::core::housekeeping::{
    delete_unlinked_connectors, find_overlapping_connectors, find_unlinked_connectors,
    purge_unused_annotations,
};
use catmaid_addons::core::linked_neurons::{
    find_desyncs, pull_all_updates_by_annotations, pull_all_updates_by_skid,
    push_all_updates_by_annotations, push_all_updates_by_skid, PushOptions,
};
use catmaid_addons::core::reupload::{
    add_dummy_nodes_by_annotations, add_dummy_nodes_by_skid, delete_dummy_nodes_by_annotations,
    delete_dummy_nodes_by_skid, ElasticOptions, UploadAction,
    DUMMY_NODE_XY,
};
use catmaid_addons::core::viewer_json::{
    make_json_by_annotations, read_color_mapping, write_viewer_json,
};
use catmaid_addons::domain::{CatmaidApi, Confirm};
use catmaid_addons::utils::error::ErrorSeverity;
use catmaid_addons::utils::{logger, validation::Validate};
use catmaid_addons::{
    CatmaidInstance, Cli, Command, ConnectionConfig, Connections, Result, Reuploader,
    UploadOutcome,
};
use clap::Parser;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("🚀 Starting catmaid-addons");
    if cli.verbose {
        tracing::debug!("CLI arguments: {:?}", cli);
    }

    if let Err(e) = cli.validate() {
        tracing::error!("❌ Argument validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    match run(&cli).await {
        Ok(()) => {
            tracing::info!("✅ Done");
        }
        Err(e) => {
            tracing::error!(
                "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };

            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

fn reuploader<'a>(
    connections: &'a Connections,
    confirm: &'a dyn Confirm,
    config: &ConnectionConfig,
) -> Result<Reuploader<'a, CatmaidInstance, dyn Confirm + 'a>> {
    Ok(Reuploader::from_connections(connections, confirm)?.with_warp_context(config.warp_context()))
}

fn report(outcomes: &[UploadOutcome]) {
    for outcome in outcomes {
        match (&outcome.action, &outcome.response) {
            (UploadAction::Skipped(reason), _) => {
                println!("⏭️  {}: skipped ({})", outcome.neuron_name, reason)
            }
            (UploadAction::Created, Some(response)) => println!(
                "📤 {}: created skeleton {}",
                outcome.neuron_name, response.skeleton_id
            ),
            (UploadAction::Updated { skeleton_id }, Some(_)) => {
                println!("📤 {}: updated skeleton {}", outcome.neuron_name, skeleton_id)
            }
            (UploadAction::Created, None) => {
                println!("🔍 {}: would upload as a new skeleton", outcome.neuron_name)
            }
            (UploadAction::Updated { skeleton_id }, None) => println!(
                "🔍 {}: would update skeleton {}",
                outcome.neuron_name, skeleton_id
            ),
        }
        if let Some(annotation) = &outcome.source_annotation {
            println!("   source neuron annotated with '{}'", annotation);
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = ConnectionConfig::load(&cli.config)?;
    let connections = Connections::connect(&config).await?;
    let confirm: Box<dyn Confirm> = if cli.yes {
        Box::new(AssumeYes)
    } else {
        Box::new(InquirePrompt)
    };
    let confirm = confirm.as_ref();

    match &cli.command {
        Command::Projects => {
            for project in connections.source.list_projects().await? {
                println!("{}\t{}", project.id, project.title);
            }
        }

        Command::ViewerJson {
            mapping,
            output,
            opacity,
            project,
        } => {
            let groups = read_color_mapping(mapping)?;
            let entries =
                make_json_by_annotations(connections.project(*project)?, &groups, *opacity).await?;
            write_viewer_json(output, &entries)?;
            println!("📁 {} entries written to {}", entries.len(), output.display());
        }

        Command::Copy { selection, upload } => {
            let r = reuploader(&connections, confirm, &config)?;
            let options = upload.options();
            let outcomes = if selection.skids.is_empty() {
                r.copy_neurons_by_annotations(&selection.annotations, &options)
                    .await?
            } else {
                r.copy_neurons_by_skid(&selection.skids, &options).await?
            };
            report(&outcomes);
        }

        Command::Translate {
            selection,
            by,
            pixels,
            upload,
        } => {
            let r = reuploader(&connections, confirm, &config)?;
            let translation = translation_vector(by)?;
            let unit = translation_unit(*pixels);
            let options = upload.options();
            let outcomes = if selection.skids.is_empty() {
                r.translate_neurons_by_annotations(&selection.annotations, translation, unit, &options)
                    .await?
            } else {
                r.translate_neurons_by_skid(&selection.skids, translation, unit, &options)
                    .await?
            };
            report(&outcomes);
        }

        Command::Affine {
            selection,
            transform_file,
            upload,
        } => {
            let r = reuploader(&connections, confirm, &config)?;
            let options = upload.options();
            let outcomes = if selection.skids.is_empty() {
                r.affinetransform_neurons_by_annotations(&selection.annotations, transform_file, &options)
                    .await?
            } else {
                r.affinetransform_neurons_by_skid(&selection.skids, transform_file, &options)
                    .await?
            };
            report(&outcomes);
        }

        Command::Elastic {
            selection,
            flip,
            include_connectors,
            upload,
        } => {
            let r = reuploader(&connections, confirm, &config)?;
            let elastic = ElasticOptions {
                left_right_flip: *flip,
                include_connectors: *include_connectors,
                ..ElasticOptions::default()
            };
            let options = upload.options();
            let outcomes = if selection.skids.is_empty() {
                r.elastictransform_neurons_by_annotations(&selection.annotations, &elastic, &options)
                    .await?
            } else {
                r.elastictransform_neurons_by_skid(&selection.skids, &elastic, &options)
                    .await?
            };
            report(&outcomes);
        }

        Command::RadiusPrune {
            selection,
            radius,
            exact,
            upload,
        } => {
            let r = reuploader(&connections, confirm, &config)?;
            let options = upload.options();
            let outcomes = if selection.skids.is_empty() {
                r.radius_prune_neurons_by_annotations(&selection.annotations, *radius, !exact, &options)
                    .await?
            } else {
                r.radius_prune_neurons_by_skid(&selection.skids, *radius, !exact, &options)
                    .await?
            };
            report(&outcomes);
        }

        Command::VolumePrune {
            selection,
            volume,
            mode,
            largest_fragment,
            upload,
        } => {
            let r = reuploader(&connections, confirm, &config)?;
            let options = upload.options();
            let outcomes = if selection.skids.is_empty() {
                r.volume_prune_neurons_by_annotations(
                    &selection.annotations,
                    *volume,
                    *mode,
                    *largest_fragment,
                    &options,
                )
                .await?
            } else {
                r.volume_prune_neurons_by_skid(
                    &selection.skids,
                    *volume,
                    *mode,
                    *largest_fragment,
                    &options,
                )
                .await?
            };
            report(&outcomes);
        }

        Command::PushUpdates {
            selection,
            recurse,
            skip_dates,
            translation,
            pixels,
            upload,
        } => {
            let r = reuploader(&connections, confirm, &config)?;
            let translation = translation
                .as_deref()
                .map(translation_vector)
                .transpose()?
                .map(|t| (t, translation_unit(*pixels)));
            let options = PushOptions {
                upload: upload.options(),
                recurse: *recurse,
                skip_dates: skip_dates.clone(),
                translation,
                ..PushOptions::default()
            };
            let outcomes = if selection.skids.is_empty() {
                push_all_updates_by_annotations(&r, &selection.annotations, &options).await?
            } else {
                push_all_updates_by_skid(&r, &selection.skids, &options).await?
            };
            report(&outcomes);
        }

        Command::PullUpdates { selection, upload } => {
            let r = reuploader(&connections, confirm, &config)?;
            let options = PushOptions {
                upload: upload.options(),
                ..PushOptions::default()
            };
            let outcomes = if selection.skids.is_empty() {
                pull_all_updates_by_annotations(&r, &selection.annotations, &options).await?
            } else {
                pull_all_updates_by_skid(&r, &selection.skids, &options).await?
            };
            report(&outcomes);
        }

        Command::FindDesyncs { annotations } => {
            let desyncs =
                find_desyncs(&connections.source, connections.target()?, annotations).await?;
            for d in &desyncs {
                println!(
                    "{}: nodes {} vs {}, connectors {} vs {} (source {}, target {})",
                    d.neuron_name,
                    d.source_nodes,
                    d.target_nodes,
                    d.source_connectors,
                    d.target_connectors,
                    d.source_skeleton_id,
                    d.target_skeleton_id
                );
            }
            println!("{} desynced neurons", desyncs.len());
        }

        Command::UnlinkedConnectors { project, delete } => {
            let api = connections.project(*project)?;
            let connectors = if *delete {
                delete_unlinked_connectors(api, confirm).await?
            } else {
                find_unlinked_connectors(api).await?
            };
            println!("{:?}", connectors);
        }

        Command::OverlappingConnectors { project } => {
            let groups = find_overlapping_connectors(connections.project(*project)?).await?;
            for group in &groups {
                println!("{:?}", group);
            }
            println!("{} groups of overlapping connectors", groups.len());
        }

        Command::PurgeAnnotations { project, force } => {
            let api = connections.project(*project)?;
            let dummy = config.purge_dummy_skeleton(api.project_id());
            let purged = purge_unused_annotations(api, dummy, confirm, *force).await?;
            println!("🗑️ Purged {} annotations", purged.len());
        }

        Command::ReplaceSwc {
            skid,
            swc,
            project,
            live,
        } => {
            let target = connections.target.as_ref().unwrap_or(&connections.source);
            let r = Reuploader::new(&connections.source, target, confirm);
            match r.replace_skeleton_from_swc(*skid, swc, *project, !live).await? {
                Some(response) => println!("📤 Replaced skeleton {}", response.skeleton_id),
                None => println!("🔍 Dry run, pass --live to replace skeleton {}", skid),
            }
        }

        Command::DummyNodes { action } => match action {
            DummyNodeAction::Add {
                selection,
                project,
                live,
            } => {
                let api = connections.project(*project)?;
                let added = if selection.skids.is_empty() {
                    add_dummy_nodes_by_annotations(api, &selection.annotations, !live).await?
                } else {
                    add_dummy_nodes_by_skid(api, &selection.skids, !live).await?
                };
                println!("Added dummy nodes {:?}", added);
            }
            DummyNodeAction::Delete {
                selection,
                project,
                live,
            } => {
                let api = connections.project(*project)?;
                let deleted = if selection.skids.is_empty() {
                    delete_dummy_nodes_by_annotations(api, &selection.annotations, DUMMY_NODE_XY, !live)
                        .await?
                } else {
                    delete_dummy_nodes_by_skid(api, &selection.skids, DUMMY_NODE_XY, !live).await?
                };
                println!("Dummy nodes {}: {:?}", if *live { "deleted" } else { "found" }, deleted);
            }
        },
    }

    Ok(())
}
