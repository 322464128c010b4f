#![allow(dead_code)]

use async_trait::async_trait;
use catmaid_addons::domain::{
    AnnotationInfo, CatmaidApi, ConnectorId, ConnectorInfo, ConnectorLink, ConnectorRelation,
    Neuron, NeuronId, Node, NodeDetail, NodeId, ProjectId, ProjectInfo, SkeletonId,
    UploadRequest, UploadResponse, UserInfo, VolumeId,
};
use catmaid_addons::{AddonsError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct FakeState {
    pub neurons: BTreeMap<SkeletonId, Neuron>,
    /// Annotations that exist on the server without any skeleton using them.
    pub orphan_annotations: BTreeSet<String>,
    /// Uses on entities other than neurons, such as meta-annotations.
    pub other_annotation_uses: BTreeMap<String, usize>,
    pub connectors: Vec<ConnectorInfo>,
    pub volumes: HashMap<VolumeId, Value>,
    /// Nodes touched after the skeleton was first created.
    pub edited_nodes: HashSet<NodeId>,
    pub uploads: Vec<UploadRequest>,
    pub next_id: u64,
}

/// In-memory stand-in for one project on a CATMAID server.
pub struct FakeCatmaid {
    server: String,
    project_id: ProjectId,
    state: Mutex<FakeState>,
}

impl FakeCatmaid {
    pub fn new(server: &str, project_id: ProjectId) -> Self {
        Self {
            server: server.to_string(),
            project_id,
            state: Mutex::new(FakeState {
                next_id: 1000,
                ..FakeState::default()
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn insert(&self, neuron: Neuron) {
        self.state().neurons.insert(neuron.skeleton_id, neuron);
    }

    pub fn neuron(&self, skid: SkeletonId) -> Neuron {
        self.state().neurons[&skid].clone()
    }

    pub fn skids(&self) -> Vec<SkeletonId> {
        self.state().neurons.keys().copied().collect()
    }

    fn missing(&self, what: String) -> AddonsError {
        AddonsError::not_found(format!("{} in project {}", what, self.project_id))
    }
}

fn created_at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_600_000_000, 0).unwrap()
}

#[async_trait]
impl CatmaidApi for FakeCatmaid {
    fn server(&self) -> &str {
        &self.server
    }

    fn project_id(&self) -> ProjectId {
        self.project_id
    }

    fn set_project_id(&mut self, project_id: ProjectId) {
        self.project_id = project_id;
    }

    fn clear_cache(&self) {}

    async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        Ok(vec![ProjectInfo {
            id: self.project_id,
            title: format!("fake project {}", self.project_id),
        }])
    }

    async fn annotation_list(&self) -> Result<Vec<AnnotationInfo>> {
        let state = self.state();
        let names: BTreeSet<String> = state
            .neurons
            .values()
            .flat_map(|n| n.annotations.iter().cloned())
            .chain(state.orphan_annotations.iter().cloned())
            .chain(state.other_annotation_uses.keys().cloned())
            .collect();
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, name)| AnnotationInfo {
                id: i as u64 + 1,
                name,
            })
            .collect())
    }

    async fn skids_by_annotation(
        &self,
        annotations: &[String],
        intersect: bool,
    ) -> Result<Vec<SkeletonId>> {
        let skids: Vec<SkeletonId> = self
            .state()
            .neurons
            .values()
            .filter(|n| {
                let has = |a: &String| n.annotations.contains(a);
                if intersect {
                    annotations.iter().all(has)
                } else {
                    annotations.iter().any(has)
                }
            })
            .map(|n| n.skeleton_id)
            .collect();
        if skids.is_empty() {
            return Err(self.missing(format!("annotation(s) {:?}", annotations)));
        }
        Ok(skids)
    }

    async fn annotated_entity_count(&self, annotation: &str) -> Result<usize> {
        let state = self.state();
        let neurons = state
            .neurons
            .values()
            .filter(|n| n.annotations.iter().any(|a| a == annotation))
            .count();
        Ok(neurons + state.other_annotation_uses.get(annotation).copied().unwrap_or(0))
    }

    async fn get_neuron(&self, skeleton_id: SkeletonId) -> Result<Neuron> {
        self.state()
            .neurons
            .get(&skeleton_id)
            .cloned()
            .ok_or_else(|| self.missing(format!("skeleton {}", skeleton_id)))
    }

    async fn get_annotations(
        &self,
        skeleton_ids: &[SkeletonId],
    ) -> Result<BTreeMap<SkeletonId, Vec<String>>> {
        let state = self.state();
        Ok(skeleton_ids
            .iter()
            .map(|id| {
                let annotations = state
                    .neurons
                    .get(id)
                    .map(|n| n.annotations.clone())
                    .unwrap_or_default();
                (*id, annotations)
            })
            .collect())
    }

    async fn neuron_id(&self, skeleton_id: SkeletonId) -> Result<NeuronId> {
        Ok(skeleton_id + 1)
    }

    async fn node_details(&self, node_ids: &[NodeId]) -> Result<Vec<NodeDetail>> {
        let state = self.state();
        let owner: HashMap<NodeId, SkeletonId> = state
            .neurons
            .values()
            .flat_map(|n| n.nodes.iter().map(move |node| (node.id, n.skeleton_id)))
            .collect();
        Ok(node_ids
            .iter()
            .map(|id| {
                let edited = state.edited_nodes.contains(id);
                NodeDetail {
                    id: *id,
                    skeleton_id: owner.get(id).copied().unwrap_or_default(),
                    edition_time: if edited {
                        created_at() + chrono::Duration::days(3)
                    } else {
                        created_at()
                    },
                    editor: if edited { 2 } else { 1 },
                }
            })
            .collect())
    }

    async fn user_list(&self) -> Result<Vec<UserInfo>> {
        Ok(vec![
            UserInfo {
                id: 1,
                login: "importer".to_string(),
            },
            UserInfo {
                id: 2,
                login: "tracer".to_string(),
            },
        ])
    }

    async fn upload_neuron(
        &self,
        neuron: &Neuron,
        request: &UploadRequest,
    ) -> Result<UploadResponse> {
        let mut state = self.state();
        state.uploads.push(request.clone());

        let skeleton_id = match request.skeleton_id {
            Some(skid) if request.force_id => skid,
            _ => {
                state.next_id += 1;
                state.next_id
            }
        };
        let mut stored = neuron.clone();
        stored.skeleton_id = skeleton_id;
        if !request.import_annotations {
            stored.annotations = state
                .neurons
                .get(&skeleton_id)
                .map(|n| n.annotations.clone())
                .unwrap_or_default();
        }
        if !request.import_tags {
            stored.tags.clear();
        }
        if !request.import_connectors {
            stored.connectors.clear();
        }
        for node in &stored.nodes {
            state.edited_nodes.remove(&node.id);
        }
        state.neurons.insert(skeleton_id, stored);

        Ok(UploadResponse {
            skeleton_id,
            neuron_id: skeleton_id + 1,
            node_id_map: HashMap::new(),
        })
    }

    async fn add_annotations(
        &self,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> Result<()> {
        let mut state = self.state();
        for skid in skeleton_ids {
            let neuron = state
                .neurons
                .get_mut(skid)
                .ok_or_else(|| AddonsError::not_found(format!("skeleton {}", skid)))?;
            for annotation in annotations {
                if !neuron.annotations.contains(annotation) {
                    neuron.annotations.push(annotation.clone());
                }
            }
        }
        Ok(())
    }

    async fn remove_annotations(
        &self,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> Result<()> {
        let mut state = self.state();
        for skid in skeleton_ids {
            if let Some(neuron) = state.neurons.get_mut(skid) {
                neuron.annotations.retain(|a| !annotations.contains(a));
            }
        }
        // The server deletes an annotation once its last use is removed.
        for annotation in annotations {
            state.orphan_annotations.remove(annotation);
        }
        Ok(())
    }

    async fn connectors(&self) -> Result<Vec<ConnectorInfo>> {
        Ok(self.state().connectors.clone())
    }

    async fn delete_connector(&self, connector_id: ConnectorId) -> Result<()> {
        self.state().connectors.retain(|c| c.id != connector_id);
        Ok(())
    }

    async fn delete_treenode(&self, node_id: NodeId) -> Result<()> {
        let mut state = self.state();
        for neuron in state.neurons.values_mut() {
            let parent = neuron.node(node_id).and_then(|n| n.parent_id);
            neuron.nodes.retain(|n| n.id != node_id);
            for node in &mut neuron.nodes {
                if node.parent_id == Some(node_id) {
                    node.parent_id = parent;
                }
            }
        }
        Ok(())
    }

    async fn add_node(
        &self,
        position: [f64; 3],
        parent_id: Option<NodeId>,
        confidence: u8,
    ) -> Result<NodeId> {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        let owner = parent_id.and_then(|p| {
            state
                .neurons
                .values()
                .find(|n| n.node(p).is_some())
                .map(|n| n.skeleton_id)
        });
        let skid = owner.ok_or_else(|| AddonsError::not_found("parent node"))?;
        if let Some(neuron) = state.neurons.get_mut(&skid) {
            neuron.nodes.push(Node {
                id,
                parent_id,
                x: position[0],
                y: position[1],
                z: position[2],
                radius: -1.0,
                confidence,
            });
        }
        Ok(id)
    }

    async fn get_volume(&self, volume_id: VolumeId) -> Result<Value> {
        self.state()
            .volumes
            .get(&volume_id)
            .cloned()
            .ok_or_else(|| self.missing(format!("volume {}", volume_id)))
    }
}

pub fn node(id: NodeId, parent: Option<NodeId>, pos: [f64; 3], radius: f64) -> Node {
    Node {
        id,
        parent_id: parent,
        x: pos[0],
        y: pos[1],
        z: pos[2],
        radius,
        confidence: 5,
    }
}

/// Primary neurite 1-2-3-4 (radius 500) with a thin twig 3-5-6 carrying a
/// presynapse at node 6.
pub fn motor_neuron(skid: SkeletonId, name: &str, annotations: &[&str]) -> Neuron {
    let base = skid * 100;
    let mut n = Neuron::new(skid, name);
    n.nodes = vec![
        node(base + 1, None, [1000.0, 400_000.0, 2000.0], 500.0),
        node(base + 2, Some(base + 1), [2000.0, 400_000.0, 2000.0], 500.0),
        node(base + 3, Some(base + 2), [3000.0, 400_000.0, 2000.0], 500.0),
        node(base + 4, Some(base + 3), [4000.0, 400_000.0, 2000.0], 500.0),
        node(base + 5, Some(base + 3), [3000.0, 401_000.0, 2000.0], 100.0),
        node(base + 6, Some(base + 5), [3000.0, 402_000.0, 2000.0], 100.0),
    ];
    n.connectors = vec![ConnectorLink {
        connector_id: base + 50,
        node_id: base + 6,
        relation: ConnectorRelation::Presynaptic,
        x: 3000.0,
        y: 402_100.0,
        z: 2000.0,
    }];
    n.tags.insert("soma".to_string(), vec![base + 1]);
    n.annotations = annotations.iter().map(|a| a.to_string()).collect();
    n
}

pub const SOURCE_SERVER: &str = "https://source.example.org";
pub const TARGET_SERVER: &str = "https://target.example.org";

/// Source project 1 and target project 2.
pub fn projects() -> (FakeCatmaid, FakeCatmaid) {
    (
        FakeCatmaid::new(SOURCE_SERVER, 1),
        FakeCatmaid::new(TARGET_SERVER, 2),
    )
}
