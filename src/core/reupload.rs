//! Pull neurons from the source project, change them, and push them to the
//! target project either as new skeletons or as in-place updates of the
//! skeletons they were previously linked to.

use crate::adapters::swc;
use crate::core::connections::{Connections, ProjectSelector};
use crate::core::housekeeping::find_unlinked_connectors;
use crate::core::linking::{
    strip_linking_annotations, updated_annotation, LinkRelation, LinkingAnnotation, PruneMode,
};
use crate::core::volume::Volume;
use crate::domain::model::{
    Neuron, NodeId, NodeType, SkeletonId, UploadRequest, UploadResponse, VolumeId,
};
use crate::domain::ports::{CatmaidApi, Confirm, PointTransform};
use crate::transforms::fanc::{FancWarp, WarpContext, WarpDirection};
use crate::transforms::AffineTransform;
use crate::utils::error::{AddonsError, Result};
use chrono::Local;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Radius marking primary neurite nodes.
pub const PRIMARY_NEURITE_RADIUS: f64 = 500.0;
pub const DEFAULT_PIXEL_SIZE_NM: [f64; 3] = [4.0, 4.0, 40.0];
/// FANC nodes with smaller y lie outside the registered template region
/// (300000 * 4.3 / 4 nm).
pub const FANC_Y_CUTOFF_NM: f64 = 322_500.0;
pub const DUMMY_NODE_XY: [f64; 2] = [-1.0, -1.0];
const DUMMY_NODE_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    pub linking_relation: LinkRelation,
    pub annotate_source_neuron: bool,
    pub import_connectors: bool,
    pub reuse_existing_connectors: bool,
    pub refuse_to_update: bool,
    /// Only report what would happen.
    pub fake: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            linking_relation: LinkRelation::Unspecified,
            annotate_source_neuron: false,
            import_connectors: false,
            reuse_existing_connectors: true,
            refuse_to_update: true,
            fake: true,
        }
    }
}

impl UploadOptions {
    fn with_relation(&self, relation: LinkRelation) -> Self {
        Self {
            linking_relation: relation,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadAction {
    Created,
    Updated { skeleton_id: SkeletonId },
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub neuron_name: String,
    pub action: UploadAction,
    /// `None` for fake runs and skipped neurons.
    pub response: Option<UploadResponse>,
    pub source_annotation: Option<String>,
}

impl UploadOutcome {
    fn skipped(neuron: &Neuron, reason: impl Into<String>) -> Self {
        Self {
            neuron_name: neuron.name.clone(),
            action: UploadAction::Skipped(reason.into()),
            response: None,
            source_annotation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TranslationUnit {
    Nanometers,
    Pixels { pixel_size: [f64; 3] },
}

impl TranslationUnit {
    pub fn pixels() -> Self {
        Self::Pixels {
            pixel_size: DEFAULT_PIXEL_SIZE_NM,
        }
    }

    pub fn to_nanometers(&self, translation: [f64; 3]) -> [f64; 3] {
        match self {
            Self::Nanometers => translation,
            Self::Pixels { pixel_size } => [
                translation[0] * pixel_size[0],
                translation[1] * pixel_size[1],
                translation[2] * pixel_size[2],
            ],
        }
    }
}

/// Settings for elastic transforms. Without an explicit transform the FANC to
/// template warp is used together with its y cutoff.
#[derive(Clone, Default)]
pub struct ElasticOptions {
    pub transform: Option<Arc<dyn PointTransform>>,
    pub left_right_flip: bool,
    pub include_connectors: bool,
    pub y_coordinate_cutoff: Option<f64>,
}

impl std::fmt::Debug for ElasticOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticOptions")
            .field("custom_transform", &self.transform.is_some())
            .field("left_right_flip", &self.left_right_flip)
            .field("include_connectors", &self.include_connectors)
            .field("y_coordinate_cutoff", &self.y_coordinate_cutoff)
            .finish()
    }
}

pub struct Reuploader<'a, A: CatmaidApi, C: Confirm + ?Sized> {
    source: &'a A,
    target: &'a A,
    confirm: &'a C,
    warp_context: Option<WarpContext>,
    volumes: Mutex<HashMap<VolumeId, Volume>>,
}

impl<'a, A: CatmaidApi, C: Confirm + ?Sized> Reuploader<'a, A, C> {
    pub fn new(source: &'a A, target: &'a A, confirm: &'a C) -> Self {
        Self {
            source,
            target,
            confirm,
            warp_context: None,
            volumes: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_connections(connections: &'a Connections<A>, confirm: &'a C) -> Result<Self> {
        Ok(Self::new(&connections.source, connections.target()?, confirm))
    }

    pub fn with_warp_context(mut self, context: WarpContext) -> Self {
        self.warp_context = Some(context);
        self
    }

    pub fn source(&self) -> &'a A {
        self.source
    }

    pub fn target(&self) -> &'a A {
        self.target
    }

    pub fn confirmer(&self) -> &'a C {
        self.confirm
    }

    pub fn warp_context(&self) -> Option<&WarpContext> {
        self.warp_context.as_ref()
    }

    fn project(&self, which: ProjectSelector) -> &'a A {
        match which {
            ProjectSelector::Source => self.source,
            ProjectSelector::Target => self.target,
        }
    }

    /// Skeletons carrying all of `annotations`.
    pub async fn get_skids_by_annotation(
        &self,
        annotations: &[String],
        which: ProjectSelector,
    ) -> Result<Vec<SkeletonId>> {
        self.project(which)
            .skids_by_annotation(annotations, true)
            .await
    }

    async fn skids_after_confirmation(
        &self,
        annotations: &[String],
        verb: &str,
    ) -> Result<Vec<SkeletonId>> {
        let skids = self
            .get_skids_by_annotation(annotations, ProjectSelector::Source)
            .await?;
        let noun = if skids.len() == 1 { "neuron" } else { "neurons" };
        let question = format!("{} {} {}. Continue?", verb, skids.len(), noun);
        if !self.confirm.confirm(&question) {
            return Err(AddonsError::Cancelled { message: question });
        }
        Ok(skids)
    }

    async fn fetch_source_neurons(&self, skids: &[SkeletonId]) -> Result<Vec<Neuron>> {
        let mut neurons = Vec::with_capacity(skids.len());
        for &skid in skids {
            neurons.push(self.source.get_neuron(skid).await?);
        }
        Ok(neurons)
    }

    /// Upload each neuron to the target project, or update the target
    /// skeleton already linked to it.
    pub async fn upload_or_update_neurons(
        &self,
        neurons: Vec<Neuron>,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let start_time = updated_annotation(Local::now());
        let unlinked_at_start: HashSet<_> = if options.fake {
            HashSet::new()
        } else {
            find_unlinked_connectors(self.target).await?.into_iter().collect()
        };

        let mut outcomes = Vec::with_capacity(neurons.len());
        for mut neuron in neurons {
            self.source.clear_cache();
            self.target.clear_cache();

            let link = LinkingAnnotation::new(
                options.linking_relation.clone(),
                neuron.skeleton_id,
                self.source.project_id(),
                self.source.server(),
            )
            .to_string();
            tracing::debug!("Linking annotation is: '{}'", link);

            let linked = match self
                .target
                .skids_by_annotation(std::slice::from_ref(&link), true)
                .await
            {
                Ok(skids) => skids,
                Err(e) => {
                    tracing::debug!("Linking annotation lookup failed, treating as new: {}", e);
                    Vec::new()
                }
            };

            strip_linking_annotations(&mut neuron.annotations);
            let mut request = UploadRequest {
                import_tags: true,
                import_annotations: true,
                import_connectors: options.import_connectors,
                reuse_existing_connectors: options.reuse_existing_connectors,
                ..UploadRequest::default()
            };

            let action = match linked.as_slice() {
                [] => {
                    tracing::info!(
                        "📤 Uploading \"{}\" to project {} as a new skeleton.",
                        neuron.name,
                        self.target.project_id()
                    );
                    neuron.annotations.push(link.clone());
                    neuron.annotations.push(start_time.clone());
                    UploadAction::Created
                }
                [linked_skid] => {
                    match self
                        .prepare_update(&mut neuron, *linked_skid, &start_time, options)
                        .await?
                    {
                        Ok(neuron_id) => {
                            request.skeleton_id = Some(*linked_skid);
                            request.neuron_id = Some(neuron_id);
                            request.force_id = true;
                            UploadAction::Updated {
                                skeleton_id: *linked_skid,
                            }
                        }
                        Err(reason) => {
                            outcomes.push(UploadOutcome::skipped(&neuron, reason));
                            continue;
                        }
                    }
                }
                several => {
                    tracing::warn!(
                        "⚠️ Found {} neurons annotated with \"{}\" in the target project. \
                         Go fix that! Skipping upload for this neuron.",
                        several.len(),
                        link
                    );
                    outcomes.push(UploadOutcome::skipped(
                        &neuron,
                        "several target neurons carry the linking annotation",
                    ));
                    continue;
                }
            };

            let mut outcome = UploadOutcome {
                neuron_name: neuron.name.clone(),
                action,
                response: None,
                source_annotation: None,
            };

            if !options.fake {
                let response = self.target.upload_neuron(&neuron, &request).await?;
                if options.annotate_source_neuron {
                    outcome.source_annotation = self
                        .annotate_source(&neuron, &response, &options.linking_relation)
                        .await;
                }
                outcome.response = Some(response);
                tracing::info!("✅ {}: Done with upload or update.", neuron.name);
            }
            outcomes.push(outcome);
        }

        if options.fake {
            tracing::info!(
                "fake was set, nothing was uploaded. Settings: annotate_source_neuron={}, \
                 import_connectors={}, reuse_existing_connectors={}, refuse_to_update={}",
                options.annotate_source_neuron,
                options.import_connectors,
                options.reuse_existing_connectors,
                options.refuse_to_update
            );
        } else {
            self.target.clear_cache();
            let mut newly_unlinked: Vec<_> = find_unlinked_connectors(self.target)
                .await?
                .into_iter()
                .filter(|c| !unlinked_at_start.contains(c))
                .collect();
            newly_unlinked.sort_unstable();
            if !newly_unlinked.is_empty() {
                self.confirm.acknowledge(&format!(
                    "This upload caused some connectors in the target project to become \
                     unlinked from any skeleton. This can harmlessly result from deleting \
                     connectors in the source project. You may want to clean up: {:?}",
                    newly_unlinked
                ));
            }
        }

        Ok(outcomes)
    }

    /// Checks before overwriting a linked target skeleton. The inner `Err`
    /// carries the reason the update is skipped; on success the target's
    /// neuron id is returned and `neuron` is ready for upload.
    async fn prepare_update(
        &self,
        neuron: &mut Neuron,
        linked_skid: SkeletonId,
        start_time: &str,
        options: &UploadOptions,
    ) -> Result<std::result::Result<u64, String>> {
        let linked = self.target.get_neuron(linked_skid).await?;
        tracing::info!(
            "{}: Found linked neuron with skeleton ID {} in target project. \
             Updating its treenodes{} and annotations to match the source neuron.",
            neuron.name,
            linked.skeleton_id,
            if options.import_connectors { ", connectors," } else { "" }
        );

        if neuron.name != linked.name
            && !self.confirm.confirm(&format!(
                "The linked neuron's name is \"{}\" but was expected to be \"{}\". \
                 Continuing will rename the linked neuron to the expected name. Proceed?",
                linked.name, neuron.name
            ))
        {
            return Ok(Err("name mismatch not confirmed".to_string()));
        }

        let node_ids: Vec<NodeId> = linked.nodes.iter().map(|n| n.id).collect();
        let details = self.target.node_details(&node_ids).await?;
        if let Some(first_edit) = details.iter().map(|d| d.edition_time).min() {
            let edited: Vec<_> = details
                .iter()
                .filter(|d| d.edition_time != first_edit)
                .collect();
            if !edited.is_empty() {
                let logins: HashMap<u64, String> = self
                    .target
                    .user_list()
                    .await?
                    .into_iter()
                    .map(|u| (u.id, u.login))
                    .collect();
                let table: Vec<String> = edited
                    .iter()
                    .map(|d| {
                        format!(
                            "  {} {} {}",
                            d.id,
                            d.edition_time.format("%Y-%m-%d %H:%M:%S"),
                            logins.get(&d.editor).map_or("unknown", String::as_str)
                        )
                    })
                    .collect();
                tracing::warn!(
                    "⚠️ The linked neuron has been manually edited, with {} nodes modified. \
                     Those changes will get thrown away if this update continues:\n{}",
                    edited.len(),
                    table.join("\n")
                );
                if !self
                    .confirm
                    .confirm("OK to proceed and throw away the above changes?")
                {
                    tracing::info!("Skipping update for \"{}\"", neuron.name);
                    return Ok(Err("manual edits not confirmed".to_string()));
                }
            }
        }

        if options.refuse_to_update {
            tracing::info!("refuse_to_update is set. Skipping \"{}\".", neuron.name);
            return Ok(Err("refuse_to_update".to_string()));
        }

        neuron.annotations.push(start_time.to_string());
        for annotation in linked.annotations {
            if !neuron.annotations.contains(&annotation) {
                neuron.annotations.push(annotation);
            }
        }
        let neuron_id = self.target.neuron_id(linked.skeleton_id).await?;
        Ok(Ok(neuron_id))
    }

    async fn annotate_source(
        &self,
        neuron: &Neuron,
        response: &UploadResponse,
        relation: &LinkRelation,
    ) -> Option<String> {
        let annotation = LinkingAnnotation::new(
            relation.clone(),
            response.skeleton_id,
            self.target.project_id(),
            self.target.server(),
        )
        .to_string();
        match self
            .source
            .add_annotations(&[neuron.skeleton_id], std::slice::from_ref(&annotation))
            .await
        {
            Ok(()) => Some(annotation),
            Err(e) => {
                self.confirm.acknowledge(&format!(
                    "annotate_source_neuron was requested but failed ({}). You may not have \
                     permission to annotate the source project through the API.",
                    e
                ));
                None
            }
        }
    }

    // Copy

    pub async fn copy_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let neurons = self.fetch_source_neurons(skids).await?;
        self.upload_or_update_neurons(neurons, &options.with_relation(LinkRelation::Copy))
            .await
    }

    pub async fn copy_neurons_by_annotations(
        &self,
        annotations: &[String],
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let skids = self.skids_after_confirmation(annotations, "Duplicating").await?;
        self.copy_neurons_by_skid(&skids, options).await
    }

    // Translate

    pub async fn get_translated_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        translation: [f64; 3],
        unit: TranslationUnit,
    ) -> Result<Vec<Neuron>> {
        let offset = unit.to_nanometers(translation);
        if let TranslationUnit::Pixels { pixel_size } = unit {
            tracing::info!(
                "Translation of {:?} pixels requested. Using pixel size of {:?} nm, \
                 the translation is {:?} nm.",
                translation,
                pixel_size,
                offset
            );
        }
        let mut neurons = self.fetch_source_neurons(skids).await?;
        for neuron in &mut neurons {
            neuron.translate(offset);
            neuron.name.push_str(" - translated");
        }
        Ok(neurons)
    }

    pub async fn translate_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        translation: [f64; 3],
        unit: TranslationUnit,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let neurons = self
            .get_translated_neurons_by_skid(skids, translation, unit)
            .await?;
        self.upload_or_update_neurons(neurons, &options.with_relation(LinkRelation::Translation))
            .await
    }

    pub async fn translate_neurons_by_annotations(
        &self,
        annotations: &[String],
        translation: [f64; 3],
        unit: TranslationUnit,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let skids = self.skids_after_confirmation(annotations, "Translating").await?;
        self.translate_neurons_by_skid(&skids, translation, unit, options)
            .await
    }

    // Affine

    pub async fn get_affinetransformed_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        transform: &AffineTransform,
    ) -> Result<Vec<Neuron>> {
        let mut neurons = self.fetch_source_neurons(skids).await?;
        for neuron in &mut neurons {
            let nodes = transform.apply(&neuron.node_positions());
            neuron.set_node_positions(&nodes)?;
            let connectors = transform.apply(&neuron.connector_positions());
            neuron.set_connector_positions(&connectors)?;
            neuron.name.push_str(" -  affine transform");
        }
        Ok(neurons)
    }

    pub async fn affinetransform_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        transform_file: &Path,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let transform = AffineTransform::from_file(transform_file)?;
        let neurons = self
            .get_affinetransformed_neurons_by_skid(skids, &transform)
            .await?;
        let relation = LinkRelation::Affine {
            transform_file: transform_file.display().to_string(),
        };
        self.upload_or_update_neurons(neurons, &options.with_relation(relation))
            .await
    }

    pub async fn affinetransform_neurons_by_annotations(
        &self,
        annotations: &[String],
        transform_file: &Path,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let skids = self
            .skids_after_confirmation(annotations, "Applying affine transformation to")
            .await?;
        self.affinetransform_neurons_by_skid(&skids, transform_file, options)
            .await
    }

    // Elastic

    fn default_warp(&self, left_right_flip: bool) -> Result<Arc<dyn PointTransform>> {
        let context = self.warp_context.clone().ok_or_else(|| {
            AddonsError::config("no transformix setup configured for the default elastic warp")
        })?;
        Ok(Arc::new(
            FancWarp::new(context, WarpDirection::FancToTemplate).with_reflect(left_right_flip),
        ))
    }

    pub async fn get_elastictransformed_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        elastic: &ElasticOptions,
    ) -> Result<Vec<Neuron>> {
        let (transform, cutoff) = match &elastic.transform {
            Some(t) => (t.clone(), elastic.y_coordinate_cutoff),
            None => (
                self.default_warp(elastic.left_right_flip)?,
                Some(FANC_Y_CUTOFF_NM),
            ),
        };

        tracing::info!("Pulling source neuron data from catmaid");
        self.source.clear_cache();
        let mut neurons = self.fetch_source_neurons(skids).await?;

        if let Some(cutoff) = cutoff {
            tracing::info!("Applying y coordinate cutoff of {}", cutoff);
            for neuron in &mut neurons {
                let keep: HashSet<NodeId> = neuron
                    .nodes
                    .iter()
                    .filter(|n| n.y >= cutoff)
                    .map(|n| n.id)
                    .collect();
                neuron.subset(&keep);
                if neuron.n_fragments() > 1 {
                    tracing::info!("{} is fragmented. Healing before continuing.", neuron.name);
                    neuron.heal()?;
                }
            }
        }

        for neuron in &mut neurons {
            tracing::info!("Transforming {}", neuron.name);
            neuron.name.push_str(" - elastic transform");
            if elastic.left_right_flip {
                neuron.name.push_str(" - flipped");
                neuron.annotations.push("left-right flipped".to_string());
            }
            let nodes = transform.transform(&neuron.node_positions()).await?;
            neuron.set_node_positions(&nodes)?;
            if elastic.include_connectors {
                let connectors = transform.transform(&neuron.connector_positions()).await?;
                neuron.set_connector_positions(&connectors)?;
            }
        }
        Ok(neurons)
    }

    pub async fn elastictransform_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        elastic: &ElasticOptions,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let relation = if elastic.left_right_flip {
            LinkRelation::ElasticFlipped
        } else {
            LinkRelation::Elastic
        };
        let elastic = ElasticOptions {
            include_connectors: elastic.include_connectors || options.import_connectors,
            ..elastic.clone()
        };
        let neurons = self
            .get_elastictransformed_neurons_by_skid(skids, &elastic)
            .await?;
        self.upload_or_update_neurons(neurons, &options.with_relation(relation))
            .await
    }

    pub async fn elastictransform_neurons_by_annotations(
        &self,
        annotations: &[String],
        elastic: &ElasticOptions,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let skids = self
            .skids_after_confirmation(annotations, "Elastically transforming")
            .await?;
        self.elastictransform_neurons_by_skid(&skids, elastic, options)
            .await
    }

    // Volume pruning

    async fn volume(&self, volume_id: VolumeId) -> Result<Volume> {
        if let Some(volume) = self.volumes.lock().ok().and_then(|v| v.get(&volume_id).cloned()) {
            tracing::debug!("Loading volume {} from cache.", volume_id);
            return Ok(volume);
        }
        tracing::info!(
            "Pulling volume {} from project {}.",
            volume_id,
            self.source.project_id()
        );
        let document = self.source.get_volume(volume_id).await?;
        let volume = Volume::from_json(volume_id, &document)?;
        if let Ok(mut cache) = self.volumes.lock() {
            cache.insert(volume_id, volume.clone());
        }
        Ok(volume)
    }

    pub async fn get_volume_pruned_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        volume_id: VolumeId,
        mode: PruneMode,
        only_keep_largest_fragment: bool,
    ) -> Result<Vec<Neuron>> {
        let mut neurons = self.fetch_source_neurons(skids).await?;
        let volume = self.volume(volume_id).await?;

        for neuron in &mut neurons {
            if neuron.name.contains("pruned by vol") {
                return Err(AddonsError::validation(format!(
                    "Volume pruning was requested for \"{}\", which was already pruned.",
                    neuron.name
                )));
            }
            tracing::info!("Pruning neuron {}", neuron.name);
            match mode {
                PruneMode::FirstEntryLastExit => {
                    prune_first_entry_last_exit(neuron, &volume, self.confirm)?
                }
                PruneMode::Strict => {
                    let keep: HashSet<NodeId> = neuron
                        .nodes
                        .iter()
                        .filter(|n| volume.contains(n.position()))
                        .map(|n| n.id)
                        .collect();
                    neuron.subset(&keep);
                }
            }

            if neuron.n_fragments() > 1 && only_keep_largest_fragment {
                tracing::info!(
                    "Neuron has multiple disconnected fragments after pruning. \
                     Only the largest fragment will be kept."
                );
                neuron.keep_largest_fragment();
            } else if neuron.n_fragments() > 1 {
                tracing::info!("{} is fragmented. Healing before upload.", neuron.name);
                neuron.heal()?;
            }

            neuron.annotations.push(mode.annotation(volume_id));
            neuron
                .name
                .push_str(&format!(" - pruned by vol {}", volume_id));
        }
        Ok(neurons)
    }

    pub async fn volume_prune_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        volume_id: VolumeId,
        mode: PruneMode,
        only_keep_largest_fragment: bool,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let neurons = self
            .get_volume_pruned_neurons_by_skid(skids, volume_id, mode, only_keep_largest_fragment)
            .await?;
        let relation = LinkRelation::VolumePruned { volume_id, mode };
        self.upload_or_update_neurons(neurons, &options.with_relation(relation))
            .await
    }

    pub async fn volume_prune_neurons_by_annotations(
        &self,
        annotations: &[String],
        volume_id: VolumeId,
        mode: PruneMode,
        only_keep_largest_fragment: bool,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let skids = self.skids_after_confirmation(annotations, "Volume pruning").await?;
        self.volume_prune_neurons_by_skid(&skids, volume_id, mode, only_keep_largest_fragment, options)
            .await
    }

    // Radius pruning

    pub async fn get_radius_pruned_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        radius_to_keep: f64,
        keep_larger_radii: bool,
    ) -> Result<Vec<Neuron>> {
        let mut neurons = self.fetch_source_neurons(skids).await?;
        for neuron in &mut neurons {
            radius_prune(neuron, radius_to_keep, keep_larger_radii)?;
        }
        Ok(neurons)
    }

    pub async fn radius_prune_neurons_by_skid(
        &self,
        skids: &[SkeletonId],
        radius_to_keep: f64,
        keep_larger_radii: bool,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let neurons = self
            .get_radius_pruned_neurons_by_skid(skids, radius_to_keep, keep_larger_radii)
            .await?;
        self.upload_or_update_neurons(neurons, &options.with_relation(LinkRelation::RadiusPruned))
            .await
    }

    pub async fn radius_prune_neurons_by_annotations(
        &self,
        annotations: &[String],
        radius_to_keep: f64,
        keep_larger_radii: bool,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let skids = self.skids_after_confirmation(annotations, "Radius pruning").await?;
        self.radius_prune_neurons_by_skid(&skids, radius_to_keep, keep_larger_radii, options)
            .await
    }

    // Skeleton replacement

    /// Replace the nodes of `skid` with the skeleton in an SWC file, keeping
    /// the old skeleton id, neuron id, name and root radius.
    pub async fn replace_skeleton_from_swc(
        &self,
        skid: SkeletonId,
        swc_file: &Path,
        which: ProjectSelector,
        fake: bool,
    ) -> Result<Option<UploadResponse>> {
        let api = self.project(which);
        tracing::info!("Performing skeleton replacement in the {:?} project.", which);

        let mut new_neuron = swc::read_swc(swc_file)?;
        let old_neuron = api.get_neuron(skid).await?;

        tracing::info!("Neuron to be replaced: {}", old_neuron.name);
        if let (Some(old), Some(new)) = (old_neuron.mean_position(), new_neuron.mean_position()) {
            tracing::info!(
                "Distance between mean coordinate of old neuron and mean coordinate of new \
                 neuron: {:.0}nm",
                crate::domain::model::squared_distance(old, new).sqrt()
            );
        }

        let neuron_id = api.neuron_id(skid).await?;
        if old_neuron.n_connectors() != 0 {
            tracing::warn!(
                "⚠️ Connectors on the old neuron will become unlinked \
                 (they will not be linked to the new neuron)."
            );
        }
        if !old_neuron.tags.is_empty() {
            tracing::warn!("⚠️ Tags on the old neuron will be deleted.");
        }

        if fake {
            return Ok(None);
        }

        if let Some(radius) = old_neuron.root_radius() {
            let roots: HashSet<NodeId> = new_neuron.roots().into_iter().collect();
            for node in &mut new_neuron.nodes {
                if roots.contains(&node.id) {
                    node.radius = radius;
                }
            }
        }
        new_neuron.name = old_neuron.name;
        new_neuron.skeleton_id = skid;

        let request = UploadRequest {
            skeleton_id: Some(skid),
            neuron_id: Some(neuron_id),
            force_id: true,
            ..UploadRequest::default()
        };
        Ok(Some(api.upload_neuron(&new_neuron, &request).await?))
    }
}

/// Keep the primary neurite between its first entry into and last exit
/// from `volume`, stopping early at branch points.
fn prune_first_entry_last_exit<C: Confirm + ?Sized>(
    neuron: &mut Neuron,
    volume: &Volume,
    confirm: &C,
) -> Result<()> {
    let fat_parents: HashSet<NodeId> = neuron
        .nodes
        .iter()
        .filter(|n| n.radius == PRIMARY_NEURITE_RADIUS)
        .filter_map(|n| n.parent_id)
        .collect();
    let ends: Vec<NodeId> = neuron
        .nodes
        .iter()
        .filter(|n| n.radius == PRIMARY_NEURITE_RADIUS && !fat_parents.contains(&n.id))
        .map(|n| n.id)
        .collect();
    let primary_neurite_end = match ends.as_slice() {
        [] => {
            return Err(AddonsError::validation(format!(
                "{} doesn't look like a motor neuron: no primary neurite nodes",
                neuron.name
            )))
        }
        [end] => *end,
        several => {
            return Err(AddonsError::validation(format!(
                "Multiple primary neurite ends for {}: {:?}",
                neuron.name, several
            )))
        }
    };

    let in_volume: HashMap<NodeId, bool> = neuron
        .nodes
        .iter()
        .map(|n| (n.id, volume.contains(n.position())))
        .collect();
    let parent_of: HashMap<NodeId, Option<NodeId>> =
        neuron.nodes.iter().map(|n| (n.id, n.parent_id)).collect();

    // Walk back from the end until the parent is inside or is a branch point.
    let types = neuron.node_types();
    let mut current = primary_neurite_end;
    while let Some(parent) = parent_of.get(&current).copied().flatten() {
        if types.get(&parent) == Some(&NodeType::Branch) || in_volume[&parent] {
            break;
        }
        current = parent;
        tracing::debug!("Walk back to {}", current);
    }
    tracing::debug!("Pruning distal to {}", current);
    neuron.prune_distal_to(current)?;

    // Walk forward from the root's primary child until inside the volume or
    // off the unbranched stretch.
    let root = neuron
        .root()
        .ok_or_else(|| AddonsError::validation(format!("{} has no root", neuron.name)))?;
    let children = neuron.children();
    let types = neuron.node_types();
    let mut current = children
        .get(&root)
        .into_iter()
        .flatten()
        .copied()
        .find(|c| neuron.node(*c).is_some_and(|n| n.radius > 0.0))
        .ok_or_else(|| {
            AddonsError::validation(format!("{} has no child of the root with a radius", neuron.name))
        })?;
    while !in_volume[&current] && types.get(&current) == Some(&NodeType::Slab) {
        match children.get(&current).and_then(|c| c.first()) {
            Some(child) => current = *child,
            None => break,
        }
        tracing::debug!("Walk forward to {}", current);
    }
    if !in_volume[&current] {
        confirm.acknowledge(&format!(
            "Hit a branch before hitting the volume for neuron {}. This is unusual.",
            neuron.name
        ));
    }
    tracing::debug!("Pruning proximal to {}", current);
    neuron.prune_proximal_to(current)
}

fn radius_prune(neuron: &mut Neuron, radius_to_keep: f64, keep_larger_radii: bool) -> Result<()> {
    if neuron.name.contains("radius") {
        return Err(AddonsError::validation(format!(
            "Radius pruning was requested for \"{}\", which was already pruned.",
            neuron.name
        )));
    }
    let keep: HashSet<NodeId> = neuron
        .nodes
        .iter()
        .filter(|n| {
            if keep_larger_radii {
                n.radius >= radius_to_keep
            } else {
                n.radius == radius_to_keep
            }
        })
        .map(|n| n.id)
        .collect();
    neuron.subset(&keep);

    if neuron.n_fragments() > 1 {
        return Err(AddonsError::processing(format!(
            "Radius pruning cut {} into {} fragments.",
            neuron.name,
            neuron.n_fragments()
        )));
    }
    neuron
        .annotations
        .push(format!("pruned to nodes with radius {}", radius_to_keep));
    neuron.name.push_str(&format!(" - radius {}", radius_to_keep));
    Ok(())
}

// Dummy nodes

/// Give single-node skeletons a second node at `(-1, -1, z)`.
pub async fn add_dummy_nodes_by_skid<A: CatmaidApi>(
    api: &A,
    skids: &[SkeletonId],
    fake: bool,
) -> Result<Vec<NodeId>> {
    api.clear_cache();
    let mut added = Vec::new();
    for &skid in skids {
        let neuron = api.get_neuron(skid).await?;
        let [node] = neuron.nodes.as_slice() else {
            tracing::info!(
                "Dummy node requested for a neuron with {} nodes. Skipping \"{}\".",
                neuron.n_nodes(),
                neuron.name
            );
            continue;
        };
        let position = [DUMMY_NODE_XY[0], DUMMY_NODE_XY[1], node.z];
        if fake {
            tracing::info!("Would add a node at {:?} under node {}", position, node.id);
            continue;
        }
        added.push(api.add_node(position, Some(node.id), 1).await?);
    }
    Ok(added)
}

/// Dummy nodes for every skeleton carrying all of `annotations`.
pub async fn add_dummy_nodes_by_annotations<A: CatmaidApi>(
    api: &A,
    annotations: &[String],
    fake: bool,
) -> Result<Vec<NodeId>> {
    let skids = api.skids_by_annotation(annotations, true).await?;
    add_dummy_nodes_by_skid(api, &skids, fake).await
}

/// Remove the dummy node from two-node skeletons.
pub async fn delete_dummy_nodes_by_skid<A: CatmaidApi>(
    api: &A,
    skids: &[SkeletonId],
    dummy_xy: [f64; 2],
    fake: bool,
) -> Result<Vec<NodeId>> {
    api.clear_cache();
    let is_dummy = |x: f64, y: f64| {
        (x - dummy_xy[0]).abs() < DUMMY_NODE_TOLERANCE && (y - dummy_xy[1]).abs() < DUMMY_NODE_TOLERANCE
    };

    let mut to_delete = Vec::new();
    for &skid in skids {
        let neuron = api.get_neuron(skid).await?;
        if neuron.n_nodes() != 2 {
            tracing::info!("\"{}\" doesn't have exactly 2 nodes. Skipping.", neuron.name);
            continue;
        }
        let dummies: Vec<NodeId> = neuron
            .nodes
            .iter()
            .filter(|n| is_dummy(n.x, n.y))
            .map(|n| n.id)
            .collect();
        if dummies.is_empty() {
            tracing::info!(
                "\"{}\" has no nodes at (x, y) = {:?}. Skipping.",
                neuron.name,
                dummy_xy
            );
            continue;
        }
        to_delete.extend(dummies);
    }

    if to_delete.is_empty() {
        return Err(AddonsError::validation("No neurons appear to have dummy nodes."));
    }
    if fake {
        tracing::info!("Would delete nodes {:?}", to_delete);
        return Ok(to_delete);
    }
    for &node in &to_delete {
        api.delete_treenode(node).await?;
    }
    Ok(to_delete)
}

pub async fn delete_dummy_nodes_by_annotations<A: CatmaidApi>(
    api: &A,
    annotations: &[String],
    dummy_xy: [f64; 2],
    fake: bool,
) -> Result<Vec<NodeId>> {
    let skids = api.skids_by_annotation(annotations, true).await?;
    delete_dummy_nodes_by_skid(api, &skids, dummy_xy, fake).await
}
