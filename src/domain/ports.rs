use crate::domain::model::{
    AnnotationInfo, ConnectorId, ConnectorInfo, Neuron, NeuronId, NodeDetail, NodeId, ProjectId,
    ProjectInfo, SkeletonId, UploadRequest, UploadResponse, UserInfo, VolumeId,
};
use crate::transforms::Points;
use crate::utils::error::{AddonsError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// One project on a remote annotation server.
#[async_trait]
pub trait CatmaidApi: Send + Sync {
    fn server(&self) -> &str;
    fn project_id(&self) -> ProjectId;
    fn set_project_id(&mut self, project_id: ProjectId);

    /// Drop any responses held from earlier requests.
    fn clear_cache(&self);

    async fn list_projects(&self) -> Result<Vec<ProjectInfo>>;
    async fn annotation_list(&self) -> Result<Vec<AnnotationInfo>>;

    /// Skeletons annotated with the given annotations. With `intersect`,
    /// only skeletons carrying all of them.
    async fn skids_by_annotation(
        &self,
        annotations: &[String],
        intersect: bool,
    ) -> Result<Vec<SkeletonId>>;

    /// Entities of any type (neurons, annotations, volumes) carrying
    /// `annotation`. Zero when the annotation doesn't exist.
    async fn annotated_entity_count(&self, annotation: &str) -> Result<usize>;

    async fn get_neuron(&self, skeleton_id: SkeletonId) -> Result<Neuron>;
    async fn get_annotations(
        &self,
        skeleton_ids: &[SkeletonId],
    ) -> Result<BTreeMap<SkeletonId, Vec<String>>>;
    async fn neuron_id(&self, skeleton_id: SkeletonId) -> Result<NeuronId>;
    async fn node_details(&self, node_ids: &[NodeId]) -> Result<Vec<NodeDetail>>;
    async fn user_list(&self) -> Result<Vec<UserInfo>>;

    async fn upload_neuron(&self, neuron: &Neuron, request: &UploadRequest)
        -> Result<UploadResponse>;
    async fn add_annotations(&self, skeleton_ids: &[SkeletonId], annotations: &[String])
        -> Result<()>;
    async fn remove_annotations(
        &self,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> Result<()>;

    async fn connectors(&self) -> Result<Vec<ConnectorInfo>>;
    async fn delete_connector(&self, connector_id: ConnectorId) -> Result<()>;
    async fn delete_treenode(&self, node_id: NodeId) -> Result<()>;
    async fn add_node(
        &self,
        position: [f64; 3],
        parent_id: Option<NodeId>,
        confidence: u8,
    ) -> Result<NodeId>;

    /// Raw volume document; see `core::volume::Volume::from_json`.
    async fn get_volume(&self, volume_id: VolumeId) -> Result<serde_json::Value>;

    /// Title of the current project, which also proves the credentials can
    /// see it.
    async fn project_title(&self) -> Result<String> {
        let pid = self.project_id();
        self.list_projects()
            .await?
            .into_iter()
            .find(|p| p.id == pid)
            .map(|p| p.title)
            .ok_or_else(|| AddonsError::AuthError {
                message: format!(
                    "project {} is not visible on {} with these credentials",
                    pid,
                    self.server()
                ),
            })
    }
}

/// Maps an Nx3 point set to another Nx3 point set in the same units, row for row.
#[async_trait]
pub trait PointTransform: Send + Sync {
    async fn transform(&self, points: &Points) -> Result<Points>;
}

/// Yes/no decisions and warnings that need a human in the loop.
pub trait Confirm: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
    fn acknowledge(&self, message: &str);
}
