use crate::transforms::Points;
use crate::utils::error::{AddonsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub type ProjectId = u64;
pub type SkeletonId = u64;
pub type NeuronId = u64;
pub type NodeId = u64;
pub type ConnectorId = u64;
pub type AnnotationId = u64;
pub type UserId = u64;
pub type VolumeId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub radius: f64,
    pub confidence: u8,
}

impl Node {
    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    fn set_position(&mut self, p: [f64; 3]) {
        self.x = p[0];
        self.y = p[1];
        self.z = p[2];
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorRelation {
    Presynaptic,
    Postsynaptic,
    Other(i64),
}

impl ConnectorRelation {
    /// Relation codes used by compact skeleton responses.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Presynaptic,
            1 => Self::Postsynaptic,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Presynaptic => 0,
            Self::Postsynaptic => 1,
            Self::Other(code) => *code,
        }
    }

    /// Link type name understood by the link creation endpoint.
    pub fn link_type(&self) -> Option<&'static str> {
        match self {
            Self::Presynaptic => Some("presynaptic_to"),
            Self::Postsynaptic => Some("postsynaptic_to"),
            Self::Other(2) => Some("gapjunction_with"),
            Self::Other(3) => Some("abutting"),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorLink {
    pub connector_id: ConnectorId,
    pub node_id: NodeId,
    pub relation: ConnectorRelation,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ConnectorLink {
    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Root,
    Slab,
    Branch,
    End,
}

/// A skeleton plus the metadata that travels with it on upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neuron {
    pub skeleton_id: SkeletonId,
    pub name: String,
    pub nodes: Vec<Node>,
    pub connectors: Vec<ConnectorLink>,
    pub tags: BTreeMap<String, Vec<NodeId>>,
    pub annotations: Vec<String>,
}

impl Neuron {
    pub fn new(skeleton_id: SkeletonId, name: impl Into<String>) -> Self {
        Self {
            skeleton_id,
            name: name.into(),
            nodes: Vec::new(),
            connectors: Vec::new(),
            tags: BTreeMap::new(),
            annotations: Vec::new(),
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_connectors(&self) -> usize {
        self.connectors.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_index(&self) -> HashMap<NodeId, usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect()
    }

    fn require_node(&self, id: NodeId) -> Result<()> {
        if self.node(id).is_none() {
            return Err(AddonsError::not_found(format!(
                "node {} in skeleton {}",
                id, self.skeleton_id
            )));
        }
        Ok(())
    }

    /// Child ids per node, in node order.
    pub fn children(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in &self.nodes {
            if let Some(parent) = node.parent_id {
                children.entry(parent).or_default().push(node.id);
            }
        }
        children
    }

    /// Nodes without a parent inside this skeleton. One per fragment.
    pub fn roots(&self) -> Vec<NodeId> {
        let ids: HashSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        self.nodes
            .iter()
            .filter(|n| n.parent_id.map_or(true, |p| !ids.contains(&p)))
            .map(|n| n.id)
            .collect()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.roots().into_iter().next()
    }

    pub fn n_fragments(&self) -> usize {
        self.roots().len()
    }

    pub fn node_types(&self) -> HashMap<NodeId, NodeType> {
        let children = self.children();
        let roots: HashSet<NodeId> = self.roots().into_iter().collect();
        self.nodes
            .iter()
            .map(|n| {
                let kind = if roots.contains(&n.id) {
                    NodeType::Root
                } else {
                    match children.get(&n.id).map_or(0, Vec::len) {
                        0 => NodeType::End,
                        1 => NodeType::Slab,
                        _ => NodeType::Branch,
                    }
                };
                (n.id, kind)
            })
            .collect()
    }

    /// All nodes downstream of `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let children = self.children();
        let mut out = Vec::new();
        let mut stack = children.get(&id).cloned().unwrap_or_default();
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(grandchildren) = children.get(&next) {
                stack.extend(grandchildren.iter().copied());
            }
        }
        out
    }

    /// Keep only the given nodes. Nodes whose parent was dropped become roots;
    /// connectors and tags on dropped nodes go with them.
    pub fn subset(&mut self, keep: &HashSet<NodeId>) {
        self.nodes.retain(|n| keep.contains(&n.id));
        for node in &mut self.nodes {
            if node.parent_id.is_some_and(|p| !keep.contains(&p)) {
                node.parent_id = None;
            }
        }
        self.connectors.retain(|c| keep.contains(&c.node_id));
        for ids in self.tags.values_mut() {
            ids.retain(|id| keep.contains(id));
        }
        self.tags.retain(|_, ids| !ids.is_empty());
    }

    /// Drop everything distal to `id`; `id` itself is kept.
    pub fn prune_distal_to(&mut self, id: NodeId) -> Result<()> {
        self.require_node(id)?;
        let distal: HashSet<NodeId> = self.descendants(id).into_iter().collect();
        let keep = self
            .nodes
            .iter()
            .map(|n| n.id)
            .filter(|n| !distal.contains(n))
            .collect();
        self.subset(&keep);
        Ok(())
    }

    /// Keep `id` and everything distal to it; `id` becomes the root.
    pub fn prune_proximal_to(&mut self, id: NodeId) -> Result<()> {
        self.require_node(id)?;
        let mut keep: HashSet<NodeId> = self.descendants(id).into_iter().collect();
        keep.insert(id);
        self.subset(&keep);
        Ok(())
    }

    /// Make `id` the root of its fragment by reversing the path to the old root.
    pub fn reroot(&mut self, id: NodeId) -> Result<()> {
        self.require_node(id)?;
        let index = self.node_index();
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[index[&current]]
            .parent_id
            .filter(|p| index.contains_key(p))
        {
            path.push(parent);
            current = parent;
        }

        self.nodes[index[&id]].parent_id = None;
        for pair in path.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            self.nodes[index[&parent]].parent_id = Some(child);
        }
        Ok(())
    }

    /// Node ids of each fragment, one entry per root.
    pub fn fragments(&self) -> Vec<Vec<NodeId>> {
        self.roots()
            .into_iter()
            .map(|root| {
                let mut ids = vec![root];
                ids.extend(self.descendants(root));
                ids
            })
            .collect()
    }

    pub fn keep_largest_fragment(&mut self) {
        let largest = self
            .fragments()
            .into_iter()
            .max_by_key(Vec::len)
            .unwrap_or_default();
        let keep = largest.into_iter().collect();
        self.subset(&keep);
    }

    /// Reconnect fragments into one tree, always joining the closest pair of
    /// nodes between the growing main fragment and the rest.
    pub fn heal(&mut self) -> Result<()> {
        let mut fragments = self.fragments();
        if fragments.len() < 2 {
            return Ok(());
        }
        fragments.sort_by_key(|f| std::cmp::Reverse(f.len()));
        let mut main: HashSet<NodeId> = fragments.remove(0).into_iter().collect();

        while !fragments.is_empty() {
            let positions: HashMap<NodeId, [f64; 3]> =
                self.nodes.iter().map(|n| (n.id, n.position())).collect();
            let mut best: Option<(f64, usize, NodeId, NodeId)> = None;
            for (fi, fragment) in fragments.iter().enumerate() {
                for &candidate in fragment {
                    let p = positions[&candidate];
                    for &anchor in &main {
                        let d = squared_distance(p, positions[&anchor]);
                        if best.map_or(true, |(bd, ..)| d < bd) {
                            best = Some((d, fi, candidate, anchor));
                        }
                    }
                }
            }
            let Some((_, fi, candidate, anchor)) = best else {
                break;
            };
            self.reroot(candidate)?;
            let index = self.node_index();
            self.nodes[index[&candidate]].parent_id = Some(anchor);
            main.extend(fragments.remove(fi));
        }
        Ok(())
    }

    pub fn mean_position(&self) -> Option<[f64; 3]> {
        if self.nodes.is_empty() {
            return None;
        }
        let n = self.nodes.len() as f64;
        let sum = self.nodes.iter().fold([0.0; 3], |acc, node| {
            [acc[0] + node.x, acc[1] + node.y, acc[2] + node.z]
        });
        Some([sum[0] / n, sum[1] / n, sum[2] / n])
    }

    pub fn root_radius(&self) -> Option<f64> {
        let root = self.root()?;
        self.node(root).map(|n| n.radius)
    }

    pub fn node_positions(&self) -> Points {
        Points::new(self.nodes.iter().map(Node::position).collect())
    }

    pub fn set_node_positions(&mut self, points: &Points) -> Result<()> {
        check_row_count("node", self.nodes.len(), points.len())?;
        for (node, p) in self.nodes.iter_mut().zip(points.rows()) {
            node.set_position(*p);
        }
        Ok(())
    }

    pub fn connector_positions(&self) -> Points {
        Points::new(self.connectors.iter().map(ConnectorLink::position).collect())
    }

    pub fn set_connector_positions(&mut self, points: &Points) -> Result<()> {
        check_row_count("connector", self.connectors.len(), points.len())?;
        for (c, p) in self.connectors.iter_mut().zip(points.rows()) {
            c.x = p[0];
            c.y = p[1];
            c.z = p[2];
        }
        Ok(())
    }

    pub fn translate(&mut self, offset: [f64; 3]) {
        for node in &mut self.nodes {
            node.x += offset[0];
            node.y += offset[1];
            node.z += offset[2];
        }
        for c in &mut self.connectors {
            c.x += offset[0];
            c.y += offset[1];
            c.z += offset[2];
        }
    }
}

fn check_row_count(what: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(AddonsError::processing(format!(
            "transform returned {} {} positions for {} {}s",
            got, what, expected, what
        )));
    }
    Ok(())
}

pub(crate) fn squared_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: ProjectId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationInfo {
    pub id: AnnotationId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDetail {
    pub id: NodeId,
    pub skeleton_id: SkeletonId,
    pub edition_time: DateTime<Utc>,
    pub editor: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorInfo {
    pub id: ConnectorId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub linked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub skeleton_id: SkeletonId,
    pub neuron_id: NeuronId,
    #[serde(default)]
    pub node_id_map: HashMap<NodeId, NodeId>,
}

/// How an upload should treat ids and attached data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadRequest {
    pub skeleton_id: Option<SkeletonId>,
    pub neuron_id: Option<NeuronId>,
    pub force_id: bool,
    pub import_tags: bool,
    pub import_annotations: bool,
    pub import_connectors: bool,
    pub reuse_existing_connectors: bool,
}
