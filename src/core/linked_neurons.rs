//! Keep linked neurons in step with the skeletons they were derived from.

use crate::core::connections::ProjectSelector;
use crate::core::linking::{find_links, LinkRelation, LinkingAnnotation};
use crate::core::reupload::{
    ElasticOptions, Reuploader, TranslationUnit, UploadOptions, UploadOutcome,
    PRIMARY_NEURITE_RADIUS,
};
use crate::domain::model::{ProjectId, SkeletonId};
use crate::domain::ports::{CatmaidApi, Confirm};
use crate::utils::error::{AddonsError, Result};
use std::collections::HashSet;
use std::path::Path;

/// Selects the published neurons. A leading `~` excludes skeletons carrying
/// that annotation.
pub const PAPER_BASE_ANNOTATIONS: [&str; 5] = [
    "Paper: Phelps, Hildebrand, Graham et al. 2020",
    "tracing from electron microscopy",
    "~left-right flipped",
    "~pruned (first entry, last exit) by vol 109",
    "~pruned to nodes with radius 500",
];

/// Skeletons carrying every plain annotation and none of the `~` ones.
pub async fn skids_matching<A: CatmaidApi + ?Sized>(
    api: &A,
    annotations: &[String],
) -> Result<Vec<SkeletonId>> {
    let (negated, required): (Vec<&String>, Vec<&String>) =
        annotations.iter().partition(|a| a.starts_with('~'));
    if required.is_empty() {
        return Err(AddonsError::validation(
            "at least one annotation without '~' is needed to select skeletons",
        ));
    }
    let required: Vec<String> = required.into_iter().cloned().collect();
    let mut skids = api.skids_by_annotation(&required, true).await?;

    for annotation in negated {
        let excluded = vec![annotation.trim_start_matches('~').to_string()];
        let excluded: HashSet<SkeletonId> = match api.skids_by_annotation(&excluded, false).await {
            Ok(found) => found.into_iter().collect(),
            Err(AddonsError::NotFoundError { .. }) => continue,
            Err(e) => return Err(e),
        };
        skids.retain(|s| !excluded.contains(s));
    }
    Ok(skids)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Desync {
    pub neuron_name: String,
    pub source_skeleton_id: SkeletonId,
    pub target_skeleton_id: SkeletonId,
    pub source_nodes: usize,
    pub target_nodes: usize,
    pub source_connectors: usize,
    pub target_connectors: usize,
}

impl Desync {
    pub fn node_mismatch(&self) -> bool {
        self.source_nodes != self.target_nodes
    }

    pub fn connector_mismatch(&self) -> bool {
        self.source_connectors != self.target_connectors
    }
}

/// Compare node and connector counts of the published target neurons with
/// their linked source neurons. Counts can match after an edit, so an empty
/// result is not proof of sync.
pub async fn find_desyncs<A: CatmaidApi + ?Sized>(
    source: &A,
    target: &A,
    extra_annotations: &[String],
) -> Result<Vec<Desync>> {
    let mut annotations: Vec<String> =
        PAPER_BASE_ANNOTATIONS.iter().map(|a| a.to_string()).collect();
    annotations.extend_from_slice(extra_annotations);

    let mut desyncs = Vec::new();
    for target_skid in skids_matching(target, &annotations).await? {
        let target_neuron = target.get_neuron(target_skid).await?;
        let link = match find_links(&target_neuron.annotations).as_slice() {
            [link] => link.clone(),
            links => {
                return Err(AddonsError::validation(format!(
                    "\"{}\" has {} linking annotations, expected exactly one",
                    target_neuron.name,
                    links.len()
                )))
            }
        };
        let source_neuron = source.get_neuron(link.skeleton_id).await?;
        let desync = Desync {
            neuron_name: source_neuron.name.clone(),
            source_skeleton_id: source_neuron.skeleton_id,
            target_skeleton_id: target_skid,
            source_nodes: source_neuron.n_nodes(),
            target_nodes: target_neuron.n_nodes(),
            source_connectors: source_neuron.n_connectors(),
            target_connectors: target_neuron.n_connectors(),
        };
        if desync.node_mismatch() {
            tracing::warn!("⚠️ Node number mismatch for: {}", desync.neuron_name);
        }
        if desync.connector_mismatch() {
            tracing::warn!("⚠️ Connector number mismatch for: {}", desync.neuron_name);
        }
        if desync.node_mismatch() || desync.connector_mismatch() {
            desyncs.push(desync);
        }
    }
    Ok(desyncs)
}

/// Settings for re-running the operation named by a linking annotation.
#[derive(Debug, Clone)]
pub struct PushOptions {
    pub upload: UploadOptions,
    pub recurse: bool,
    /// Skip targets with an annotation containing any of these strings,
    /// typically dates from `UPDATED FROM LINKED NEURON` stamps.
    pub skip_dates: Vec<String>,
    /// Linking annotations don't record the offset, so translations are only
    /// re-run when one is given here.
    pub translation: Option<([f64; 3], TranslationUnit)>,
    pub elastic: ElasticOptions,
    pub only_keep_largest_fragment: bool,
    pub radius_to_keep: f64,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            upload: UploadOptions::default(),
            recurse: false,
            skip_dates: Vec::new(),
            translation: None,
            elastic: ElasticOptions::default(),
            only_keep_largest_fragment: false,
            radius_to_keep: PRIMARY_NEURITE_RADIUS,
        }
    }
}

impl PushOptions {
    /// Pushing only ever updates, so refusing updates is left to `fake`.
    fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            refuse_to_update: false,
            ..self.upload.clone()
        }
    }
}

async fn run_linked_operation<A, C>(
    reuploader: &Reuploader<'_, A, C>,
    relation: &LinkRelation,
    source_skid: SkeletonId,
    options: &PushOptions,
) -> Result<Vec<UploadOutcome>>
where
    A: CatmaidApi,
    C: Confirm + ?Sized,
{
    let skids = [source_skid];
    let upload = options.upload_options();
    match relation {
        LinkRelation::Unspecified => {
            tracing::info!(
                "Linking annotation for skeleton {} has no relation. Nothing to re-run.",
                source_skid
            );
            Ok(Vec::new())
        }
        LinkRelation::Copy => reuploader.copy_neurons_by_skid(&skids, &upload).await,
        LinkRelation::Translation => match options.translation {
            Some((translation, unit)) => {
                reuploader
                    .translate_neurons_by_skid(&skids, translation, unit, &upload)
                    .await
            }
            None => {
                tracing::warn!(
                    "⚠️ Skeleton {} is linked by a translation, but no translation was given. Skipping.",
                    source_skid
                );
                Ok(Vec::new())
            }
        },
        LinkRelation::Affine { transform_file } => {
            reuploader
                .affinetransform_neurons_by_skid(&skids, Path::new(transform_file), &upload)
                .await
        }
        LinkRelation::Elastic | LinkRelation::ElasticFlipped => {
            let elastic = ElasticOptions {
                left_right_flip: *relation == LinkRelation::ElasticFlipped,
                ..options.elastic.clone()
            };
            reuploader
                .elastictransform_neurons_by_skid(&skids, &elastic, &upload)
                .await
        }
        LinkRelation::VolumePruned { volume_id, mode } => {
            reuploader
                .volume_prune_neurons_by_skid(
                    &skids,
                    *volume_id,
                    *mode,
                    options.only_keep_largest_fragment,
                    &upload,
                )
                .await
        }
        LinkRelation::RadiusPruned => {
            reuploader
                .radius_prune_neurons_by_skid(&skids, options.radius_to_keep, true, &upload)
                .await
        }
    }
}

fn names_link_to(annotation: &str, skid: SkeletonId, project_id: ProjectId) -> bool {
    annotation.contains(&format!("skeleton id {} ", skid))
        && annotation.contains(&format!("project id {} ", project_id))
}

/// For each source skeleton, update every target skeleton linked to it by
/// re-running the operation its linking annotation names. With `recurse`
/// (and `fake` off) the updated target skeletons are then pushed in turn
/// within the target project.
pub async fn push_all_updates_by_skid<A, C>(
    reuploader: &Reuploader<'_, A, C>,
    skids: &[SkeletonId],
    options: &PushOptions,
) -> Result<Vec<UploadOutcome>>
where
    A: CatmaidApi,
    C: Confirm + ?Sized,
{
    let target = reuploader.target();
    let all_target_annotations = target.annotation_list().await?;

    let mut chained = Reuploader::new(target, target, reuploader.confirmer());
    if let Some(context) = reuploader.warp_context() {
        chained = chained.with_warp_context(context.clone());
    }
    let recurse = options.recurse && !options.upload.fake;

    let mut outcomes = Vec::new();
    let mut visited: HashSet<(ProjectId, SkeletonId)> = HashSet::new();
    let mut pending = skids.to_vec();
    let mut current = reuploader;

    while !pending.is_empty() {
        let mut next = Vec::new();
        let source_project = current.source().project_id();
        for skid in pending {
            if !visited.insert((source_project, skid)) {
                continue;
            }
            for annotation in all_target_annotations
                .iter()
                .filter(|a| names_link_to(&a.name, skid, source_project))
            {
                let Some(link) = LinkingAnnotation::parse(&annotation.name) else {
                    continue;
                };
                let names = std::slice::from_ref(&annotation.name);
                let target_skids = match target.skids_by_annotation(names, true).await {
                    Ok(found) => found,
                    Err(AddonsError::NotFoundError { .. }) => continue,
                    Err(e) => return Err(e),
                };
                let linked_skid = match target_skids.as_slice() {
                    [] => continue,
                    [one] => *one,
                    _ => {
                        reuploader.confirmer().acknowledge(&format!(
                            "Multiple neurons in the target project with the same linking \
                             annotation. Skipping this push: {}",
                            annotation.name
                        ));
                        continue;
                    }
                };
                tracing::info!(
                    "Found in project id {}: '{}'",
                    target.project_id(),
                    annotation.name
                );

                if !options.skip_dates.is_empty() {
                    let annotations = target.get_annotations(&[linked_skid]).await?;
                    let recently_updated = annotations.values().flatten().any(|a| {
                        options.skip_dates.iter().any(|date| a.contains(date.as_str()))
                    });
                    if recently_updated {
                        tracing::info!("Skipping upload because it was already updated recently");
                        continue;
                    }
                }

                outcomes.extend(run_linked_operation(current, &link.relation, skid, options).await?);
                if recurse {
                    next.push(linked_skid);
                }
            }
        }
        if !recurse {
            break;
        }
        if !next.is_empty() {
            tracing::info!("Recursing - now pushing updates to skids {:?}", next);
        }
        pending = next;
        current = &chained;
    }
    Ok(outcomes)
}

pub async fn push_all_updates_by_annotations<A, C>(
    reuploader: &Reuploader<'_, A, C>,
    annotations: &[String],
    options: &PushOptions,
) -> Result<Vec<UploadOutcome>>
where
    A: CatmaidApi,
    C: Confirm + ?Sized,
{
    let skids = reuploader
        .get_skids_by_annotation(annotations, ProjectSelector::Source)
        .await?;
    let question = format!("Found {} source project neurons. Continue?", skids.len());
    if !reuploader.confirmer().confirm(&question) {
        return Err(AddonsError::Cancelled { message: question });
    }
    push_all_updates_by_skid(reuploader, &skids, options).await
}

/// For each target skeleton, re-run the operation named by its linking
/// annotation that points into the source project.
pub async fn pull_all_updates_by_skid<A, C>(
    reuploader: &Reuploader<'_, A, C>,
    target_skids: &[SkeletonId],
    options: &PushOptions,
) -> Result<Vec<UploadOutcome>>
where
    A: CatmaidApi,
    C: Confirm + ?Sized,
{
    let source_project = reuploader.source().project_id();
    let annotations = reuploader.target().get_annotations(target_skids).await?;

    let mut outcomes = Vec::new();
    for (skid, annotations) in annotations {
        let Some(link) = find_links(&annotations)
            .into_iter()
            .find(|l| l.project_id == source_project)
        else {
            tracing::warn!(
                "⚠️ Skeleton {} has no linking annotation into project {}. Skipping.",
                skid,
                source_project
            );
            continue;
        };
        tracing::info!("Pulling skeleton {} from '{}'", skid, link);
        outcomes.extend(
            run_linked_operation(reuploader, &link.relation, link.skeleton_id, options).await?,
        );
    }
    Ok(outcomes)
}

pub async fn pull_all_updates_by_annotations<A, C>(
    reuploader: &Reuploader<'_, A, C>,
    annotations: &[String],
    options: &PushOptions,
) -> Result<Vec<UploadOutcome>>
where
    A: CatmaidApi,
    C: Confirm + ?Sized,
{
    let skids = reuploader
        .get_skids_by_annotation(annotations, ProjectSelector::Target)
        .await?;
    pull_all_updates_by_skid(reuploader, &skids, options).await
}
