mod common;

use anyhow::Result;
use catmaid_addons::adapters::prompt::{AssumeNo, AssumeYes};
use catmaid_addons::core::linking::PruneMode;
use catmaid_addons::core::reupload::{
    add_dummy_nodes_by_annotations, add_dummy_nodes_by_skid, delete_dummy_nodes_by_annotations,
    delete_dummy_nodes_by_skid, ElasticOptions, TranslationUnit, UploadAction, DUMMY_NODE_XY,
};
use catmaid_addons::domain::PointTransform;
use catmaid_addons::{AddonsError, AffineTransform, ProjectSelector, Reuploader, UploadOptions};
use common::*;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn live() -> UploadOptions {
    UploadOptions {
        fake: false,
        ..UploadOptions::default()
    }
}

fn live_updates() -> UploadOptions {
    UploadOptions {
        refuse_to_update: false,
        ..live()
    }
}

/// Closed box as `[vertices, faces]`.
fn box_volume(lo: [f64; 3], hi: [f64; 3]) -> serde_json::Value {
    json!([
        [
            [lo[0], lo[1], lo[2]], [hi[0], lo[1], lo[2]], [hi[0], hi[1], lo[2]], [lo[0], hi[1], lo[2]],
            [lo[0], lo[1], hi[2]], [hi[0], lo[1], hi[2]], [hi[0], hi[1], hi[2]], [lo[0], hi[1], hi[2]]
        ],
        [
            [0, 1, 2], [0, 2, 3], [4, 6, 5], [4, 7, 6], [0, 5, 1], [0, 4, 5],
            [3, 2, 6], [3, 6, 7], [0, 3, 7], [0, 7, 4], [1, 5, 6], [1, 6, 2]
        ]
    ])
}

#[tokio::test]
async fn test_copy_creates_linked_neuron() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &["MN"]));
    let reuploader = Reuploader::new(&source, &target, &AssumeYes);

    let outcomes = reuploader.copy_neurons_by_skid(&[1], &live()).await?;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].action, UploadAction::Created);
    let new_skid = outcomes[0].response.as_ref().unwrap().skeleton_id;

    let copied = target.neuron(new_skid);
    assert_eq!(copied.name, "MN1");
    assert_eq!(copied.n_nodes(), 6);
    assert!(copied.annotations.contains(&"MN".to_string()));
    assert!(copied.annotations.contains(&format!(
        "LINKED NEURON - copy of skeleton id 1 in project id 1 on server {}",
        SOURCE_SERVER
    )));
    assert!(copied
        .annotations
        .iter()
        .any(|a| a.starts_with("UPDATED FROM LINKED NEURON - ")));

    let state = target.state();
    let request = &state.uploads[0];
    assert!(request.skeleton_id.is_none());
    assert!(request.import_tags && request.import_annotations);
    Ok(())
}

#[tokio::test]
async fn test_update_keeps_linked_skeleton_id() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &["MN"]));
    let reuploader = Reuploader::new(&source, &target, &AssumeYes);

    let first = reuploader.copy_neurons_by_skid(&[1], &live()).await?;
    let linked_skid = first[0].response.as_ref().unwrap().skeleton_id;
    {
        let mut state = source.state();
        let neuron = state.neurons.get_mut(&1).unwrap();
        neuron.nodes.push(node(107, Some(104), [5000.0, 400_000.0, 2000.0], 500.0));
    }
    // Annotations added by hand in the target survive an update.
    target.state().neurons.get_mut(&linked_skid).unwrap().annotations.push("checked".to_string());

    let second = reuploader.copy_neurons_by_skid(&[1], &live_updates()).await?;
    assert_eq!(
        second[0].action,
        UploadAction::Updated {
            skeleton_id: linked_skid
        }
    );
    assert_eq!(target.skids(), vec![linked_skid]);

    let updated = target.neuron(linked_skid);
    assert_eq!(updated.n_nodes(), 7);
    assert!(updated.annotations.contains(&"checked".to_string()));

    let state = target.state();
    let request = state.uploads.last().unwrap();
    assert!(request.force_id);
    assert_eq!(request.skeleton_id, Some(linked_skid));
    assert_eq!(request.neuron_id, Some(linked_skid + 1));
    Ok(())
}

#[tokio::test]
async fn test_refuse_to_update_skips_linked_neurons() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));
    let reuploader = Reuploader::new(&source, &target, &AssumeYes);

    reuploader.copy_neurons_by_skid(&[1], &live()).await?;
    let again = reuploader.copy_neurons_by_skid(&[1], &live()).await?;

    assert!(matches!(again[0].action, UploadAction::Skipped(_)));
    assert!(again[0].response.is_none());
    assert_eq!(target.state().uploads.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_fake_run_uploads_nothing() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));
    let reuploader = Reuploader::new(&source, &target, &AssumeYes);

    let outcomes = reuploader
        .copy_neurons_by_skid(&[1], &UploadOptions::default())
        .await?;
    assert_eq!(outcomes[0].action, UploadAction::Created);
    assert!(outcomes[0].response.is_none());
    assert!(target.skids().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_manual_edits_need_confirmation() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));
    Reuploader::new(&source, &target, &AssumeYes)
        .copy_neurons_by_skid(&[1], &live())
        .await?;
    target.state().edited_nodes.insert(103);

    let declined = Reuploader::new(&source, &target, &AssumeNo)
        .copy_neurons_by_skid(&[1], &live_updates())
        .await?;
    assert!(matches!(declined[0].action, UploadAction::Skipped(_)));
    assert_eq!(target.state().uploads.len(), 1);

    let accepted = Reuploader::new(&source, &target, &AssumeYes)
        .copy_neurons_by_skid(&[1], &live_updates())
        .await?;
    assert!(matches!(accepted[0].action, UploadAction::Updated { .. }));
    Ok(())
}

#[tokio::test]
async fn test_annotate_source_with_reverse_link() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));
    let options = UploadOptions {
        annotate_source_neuron: true,
        ..live()
    };

    let outcomes = Reuploader::new(&source, &target, &AssumeYes)
        .copy_neurons_by_skid(&[1], &options)
        .await?;
    let new_skid = outcomes[0].response.as_ref().unwrap().skeleton_id;
    let expected = format!(
        "LINKED NEURON - copy of skeleton id {} in project id 2 on server {}",
        new_skid, TARGET_SERVER
    );
    assert_eq!(outcomes[0].source_annotation.as_deref(), Some(expected.as_str()));
    assert!(source.neuron(1).annotations.contains(&expected));
    Ok(())
}

#[tokio::test]
async fn test_by_annotations_can_be_cancelled() {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &["MN"]));

    let result = Reuploader::new(&source, &target, &AssumeNo)
        .copy_neurons_by_annotations(&["MN".to_string()], &live())
        .await;
    assert!(matches!(result, Err(AddonsError::Cancelled { .. })));
    assert!(target.skids().is_empty());
}

#[tokio::test]
async fn test_translate_in_pixels() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));
    let reuploader = Reuploader::new(&source, &target, &AssumeYes);

    let moved = reuploader
        .get_translated_neurons_by_skid(&[1], [1.0, 0.0, -1.0], TranslationUnit::pixels())
        .await?;
    assert_eq!(moved[0].name, "MN1 - translated");
    assert_eq!(moved[0].nodes[0].position(), [1004.0, 400_000.0, 1960.0]);
    assert_eq!(moved[0].connectors[0].position(), [3004.0, 402_100.0, 1960.0]);

    let outcomes = reuploader
        .translate_neurons_by_skid(&[1], [10.0, 0.0, 0.0], TranslationUnit::Nanometers, &live())
        .await?;
    let uploaded = target.neuron(outcomes[0].response.as_ref().unwrap().skeleton_id);
    assert!(uploaded
        .annotations
        .iter()
        .any(|a| a.starts_with("LINKED NEURON - translation of skeleton id 1 ")));
    Ok(())
}

#[tokio::test]
async fn test_affine_transform_from_file() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));
    let mut file = NamedTempFile::new()?;
    writeln!(file, "-1 0 0 0\n0 1 0 0\n0 0 1 0\n320000 0 0 1")?;

    let options = UploadOptions {
        import_connectors: true,
        ..live()
    };
    let outcomes = Reuploader::new(&source, &target, &AssumeYes)
        .affinetransform_neurons_by_skid(&[1], file.path(), &options)
        .await?;
    let uploaded = target.neuron(outcomes[0].response.as_ref().unwrap().skeleton_id);

    assert_eq!(uploaded.name, "MN1 -  affine transform");
    assert_eq!(uploaded.nodes[0].x, 319_000.0);
    assert_eq!(uploaded.connectors[0].x, 317_000.0);
    let link = format!(
        "LINKED NEURON - affine transformation using {} of skeleton id 1 in project id 1 on server {}",
        file.path().display(),
        SOURCE_SERVER
    );
    assert!(uploaded.annotations.contains(&link));
    Ok(())
}

#[tokio::test]
async fn test_elastic_with_custom_transform_and_cutoff() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));
    let reuploader = Reuploader::new(&source, &target, &AssumeYes);
    let shift: Arc<dyn PointTransform> = Arc::new(AffineTransform::translation([10.0, 0.0, 0.0]));

    let elastic = ElasticOptions {
        transform: Some(shift.clone()),
        include_connectors: true,
        ..ElasticOptions::default()
    };
    let warped = reuploader
        .get_elastictransformed_neurons_by_skid(&[1], &elastic)
        .await?;
    assert_eq!(warped[0].name, "MN1 - elastic transform");
    assert_eq!(warped[0].nodes[0].x, 1010.0);
    assert_eq!(warped[0].connectors[0].x, 3010.0);

    let flipped_and_cut = ElasticOptions {
        transform: Some(shift),
        left_right_flip: true,
        y_coordinate_cutoff: Some(400_500.0),
        ..ElasticOptions::default()
    };
    let warped = reuploader
        .get_elastictransformed_neurons_by_skid(&[1], &flipped_and_cut)
        .await?;
    assert_eq!(warped[0].name, "MN1 - elastic transform - flipped");
    assert!(warped[0].annotations.contains(&"left-right flipped".to_string()));
    assert_eq!(warped[0].n_nodes(), 2);
    assert_eq!(warped[0].n_fragments(), 1);
    // connectors were left alone
    assert_eq!(warped[0].connectors[0].x, 3000.0);
    Ok(())
}

#[tokio::test]
async fn test_default_elastic_warp_needs_transformix_setup() {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));
    let result = Reuploader::new(&source, &target, &AssumeYes)
        .get_elastictransformed_neurons_by_skid(&[1], &ElasticOptions::default())
        .await;
    assert!(matches!(result, Err(AddonsError::ConfigError { .. })));
}

#[tokio::test]
async fn test_radius_prune_upload() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));

    let outcomes = Reuploader::new(&source, &target, &AssumeYes)
        .radius_prune_neurons_by_skid(&[1], 500.0, true, &live())
        .await?;
    let pruned = target.neuron(outcomes[0].response.as_ref().unwrap().skeleton_id);
    assert_eq!(pruned.name, "MN1 - radius 500");
    assert_eq!(pruned.n_nodes(), 4);
    assert!(pruned
        .annotations
        .contains(&"pruned to nodes with radius 500".to_string()));
    assert!(pruned
        .annotations
        .iter()
        .any(|a| a.starts_with("LINKED NEURON - radius pruned of skeleton id 1 ")));
    Ok(())
}

#[tokio::test]
async fn test_volume_prune_modes() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &[]));
    source.state().volumes.insert(
        7,
        box_volume([1500.0, 399_000.0, 0.0], [3500.0, 401_500.0, 5000.0]),
    );
    let reuploader = Reuploader::new(&source, &target, &AssumeYes);

    let strict = reuploader
        .get_volume_pruned_neurons_by_skid(&[1], 7, PruneMode::Strict, false)
        .await?;
    let mut ids: Vec<u64> = strict[0].nodes.iter().map(|n| n.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![102, 103, 105]);
    assert_eq!(strict[0].name, "MN1 - pruned by vol 7");
    assert!(strict[0].annotations.contains(&"pruned (strict) by vol 7".to_string()));

    let fele = reuploader
        .get_volume_pruned_neurons_by_skid(&[1], 7, PruneMode::FirstEntryLastExit, false)
        .await?;
    let mut ids: Vec<u64> = fele[0].nodes.iter().map(|n| n.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![102, 103, 104, 105, 106]);
    assert_eq!(fele[0].root(), Some(102));
    assert!(fele[0]
        .annotations
        .contains(&"pruned (first entry, last exit) by vol 7".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_strict_volume_prune_uploads_one_fragment() -> Result<()> {
    let (source, target) = projects();
    let mut u_shaped = catmaid_addons::domain::Neuron::new(1, "U1");
    u_shaped.nodes = vec![
        node(11, None, [1.0, 1.0, 1.0], -1.0),
        node(12, Some(11), [50.0, 1.0, 1.0], -1.0),
        node(13, Some(12), [1.0, 5.0, 1.0], -1.0),
    ];
    source.insert(u_shaped);
    source
        .state()
        .volumes
        .insert(7, box_volume([0.0; 3], [10.0; 3]));
    let reuploader = Reuploader::new(&source, &target, &AssumeYes);

    let outcomes = reuploader
        .volume_prune_neurons_by_skid(&[1], 7, PruneMode::Strict, false, &live())
        .await?;
    let new_skid = outcomes[0].response.as_ref().unwrap().skeleton_id;
    let uploaded = target.neuron(new_skid);
    assert_eq!(uploaded.n_nodes(), 2);
    assert_eq!(uploaded.n_fragments(), 1);
    assert_eq!(uploaded.nodes.iter().filter(|n| n.parent_id.is_none()).count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_volume_prune_refuses_pruned_neurons() {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1 - pruned by vol 7", &[]));
    source
        .state()
        .volumes
        .insert(7, box_volume([0.0; 3], [1.0; 3]));

    let result = Reuploader::new(&source, &target, &AssumeYes)
        .get_volume_pruned_neurons_by_skid(&[1], 7, PruneMode::Strict, false)
        .await;
    assert!(matches!(result, Err(AddonsError::ValidationError { .. })));
}

#[tokio::test]
async fn test_replace_skeleton_from_swc() -> Result<()> {
    let (source, target) = projects();
    source.insert(motor_neuron(1, "MN1", &["MN"]));
    let mut swc = NamedTempFile::new()?;
    writeln!(swc, "# replacement\n1 0 0 0 0 10 -1\n2 0 0 10 0 10 1\n3 0 0 20 0 10 2")?;
    let reuploader = Reuploader::new(&source, &target, &AssumeYes);

    let dry = reuploader
        .replace_skeleton_from_swc(1, swc.path(), ProjectSelector::Source, true)
        .await?;
    assert!(dry.is_none());
    assert_eq!(source.neuron(1).n_nodes(), 6);

    let response = reuploader
        .replace_skeleton_from_swc(1, swc.path(), ProjectSelector::Source, false)
        .await?
        .unwrap();
    assert_eq!(response.skeleton_id, 1);
    let replaced = source.neuron(1);
    assert_eq!(replaced.name, "MN1");
    assert_eq!(replaced.n_nodes(), 3);
    assert_eq!(replaced.root_radius(), Some(500.0));
    Ok(())
}

#[tokio::test]
async fn test_dummy_nodes_round_trip() -> Result<()> {
    let (_, target) = projects();
    let mut single = catmaid_addons::domain::Neuron::new(5, "lonely");
    single.nodes = vec![node(501, None, [10.0, 20.0, 30.0], -1.0)];
    target.insert(single);
    target.insert(motor_neuron(6, "MN6", &[]));

    let added = add_dummy_nodes_by_skid(&target, &[5, 6], false).await?;
    assert_eq!(added.len(), 1);
    let with_dummy = target.neuron(5);
    assert_eq!(with_dummy.n_nodes(), 2);
    assert_eq!(with_dummy.nodes[1].position(), [-1.0, -1.0, 30.0]);

    let found = delete_dummy_nodes_by_skid(&target, &[5], DUMMY_NODE_XY, true).await?;
    assert_eq!(found, added);
    assert_eq!(target.neuron(5).n_nodes(), 2);

    delete_dummy_nodes_by_skid(&target, &[5], DUMMY_NODE_XY, false).await?;
    assert_eq!(target.neuron(5).n_nodes(), 1);

    let none_left = delete_dummy_nodes_by_skid(&target, &[5, 6], DUMMY_NODE_XY, false).await;
    assert!(matches!(none_left, Err(AddonsError::ValidationError { .. })));
    Ok(())
}

#[tokio::test]
async fn test_dummy_nodes_by_annotations() -> Result<()> {
    let (_, target) = projects();
    let mut single = catmaid_addons::domain::Neuron::new(5, "lonely");
    single.nodes = vec![node(501, None, [10.0, 20.0, 30.0], -1.0)];
    single.annotations = vec!["single node".to_string(), "left".to_string()];
    target.insert(single);
    target.insert(motor_neuron(6, "MN6", &["single node"]));
    target.insert(motor_neuron(7, "MN7", &["left"]));
    let wanted = vec!["single node".to_string(), "left".to_string()];

    let added = add_dummy_nodes_by_annotations(&target, &wanted, false).await?;
    assert_eq!(added.len(), 1);
    assert_eq!(target.neuron(5).n_nodes(), 2);
    assert_eq!(target.neuron(7).n_nodes(), 6);

    let found = delete_dummy_nodes_by_annotations(&target, &wanted, DUMMY_NODE_XY, true).await?;
    assert_eq!(found, added);
    delete_dummy_nodes_by_annotations(&target, &wanted, DUMMY_NODE_XY, false).await?;
    assert_eq!(target.neuron(5).n_nodes(), 1);

    let unknown = add_dummy_nodes_by_annotations(&target, &["nobody".to_string()], false).await;
    assert!(matches!(unknown, Err(AddonsError::NotFoundError { .. })));
    Ok(())
}
