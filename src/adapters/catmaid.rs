//! HTTP client for one project on a CATMAID server.

use crate::adapters::swc;
use crate::domain::model::{
    AnnotationInfo, ConnectorId, ConnectorInfo, ConnectorLink, ConnectorRelation, Neuron,
    NeuronId, Node, NodeDetail, NodeId, ProjectId, ProjectInfo, SkeletonId, UploadRequest,
    UploadResponse, UserInfo, VolumeId,
};
use crate::domain::ports::CatmaidApi;
use crate::utils::error::{AddonsError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

/// Tolerance for treating two connectors as the same object on upload.
const SAME_CONNECTOR_TOLERANCE_NM: f64 = 1e-3;

pub struct CatmaidInstance {
    client: Client,
    server: String,
    api_token: String,
    http_auth: Option<(String, String)>,
    project_id: ProjectId,
    cache: Mutex<HashMap<String, Value>>,
}

impl CatmaidInstance {
    pub fn new(server: &str, api_token: &str, project_id: ProjectId) -> Self {
        Self {
            client: Client::new(),
            server: server.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            http_auth: None,
            project_id,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_http_auth(mut self, username: &str, password: &str) -> Self {
        self.http_auth = Some((username.to_string(), password.to_string()));
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Result<Self> {
        self.client = Client::builder()
            .timeout(Duration::from_secs(seconds))
            .build()?;
        Ok(self)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.server, path.trim_start_matches('/'))
    }

    fn project_path(&self, path: &str) -> String {
        format!("{}/{}", self.project_id, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("X-Authorization", format!("Token {}", self.api_token));
        match &self.http_auth {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    fn cached(&self, key: &str) -> Option<Value> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn store(&self, key: String, value: &Value) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, value.clone());
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        if let Some(hit) = self.cached(&url) {
            tracing::debug!("Cache hit for {}", url);
            return Ok(hit);
        }
        tracing::debug!("GET {}", url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let value = read_response(path, response).await?;
        self.store(url, &value);
        Ok(value)
    }

    /// Read-only POST; not cached.
    async fn post_query(&self, path: &str, form: &[(String, String)]) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(&url))
            .form(form)
            .send()
            .await?;
        read_response(path, response).await
    }

    /// POST that changes server state. Cached reads may now be stale, so the
    /// cache is dropped.
    async fn post_write(&self, path: &str, form: &[(String, String)]) -> Result<Value> {
        let value = self.post_query(path, form).await?;
        self.clear_cache();
        Ok(value)
    }

    async fn neuron_name_and_id(&self, skeleton_id: SkeletonId) -> Result<(String, NeuronId)> {
        let path = self.project_path(&format!("skeleton/{}/neuronname", skeleton_id));
        let value = self.get_json(&path).await?;
        let name = value
            .get("neuronname")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(&path, "neuronname"))?
            .to_string();
        let id = value
            .get("neuronid")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed(&path, "neuronid"))?;
        Ok((name, id))
    }

    async fn annotation_ids(&self, names: &[String]) -> Result<Vec<Option<u64>>> {
        let known: HashMap<String, u64> = self
            .annotation_list()
            .await?
            .into_iter()
            .map(|a| (a.name, a.id))
            .collect();
        Ok(names.iter().map(|n| known.get(n).copied()).collect())
    }

    async fn create_connector(&self, position: [f64; 3]) -> Result<ConnectorId> {
        let path = self.project_path("connector/create");
        let form = vec![
            ("x".to_string(), position[0].to_string()),
            ("y".to_string(), position[1].to_string()),
            ("z".to_string(), position[2].to_string()),
        ];
        let value = self.post_write(&path, &form).await?;
        value
            .get("connector_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed(&path, "connector_id"))
    }

    async fn link(&self, node_id: NodeId, link_type: &str, connector_id: ConnectorId) -> Result<()> {
        let path = self.project_path("link/create");
        let form = vec![
            ("from_id".to_string(), node_id.to_string()),
            ("link_type".to_string(), link_type.to_string()),
            ("to_id".to_string(), connector_id.to_string()),
        ];
        self.post_write(&path, &form).await?;
        Ok(())
    }

    async fn add_tags(&self, node_id: NodeId, tags: &[&str]) -> Result<()> {
        let path = self.project_path(&format!("label/treenode/{}/update", node_id));
        let form = vec![
            ("tags".to_string(), tags.join(",")),
            ("delete_existing".to_string(), "false".to_string()),
        ];
        self.post_write(&path, &form).await?;
        Ok(())
    }

    async fn import_connectors(
        &self,
        neuron: &Neuron,
        node_id_map: &HashMap<NodeId, NodeId>,
        reuse_existing: bool,
    ) -> Result<()> {
        let existing = if reuse_existing {
            self.connectors().await?
        } else {
            Vec::new()
        };
        let mut created: HashMap<ConnectorId, ConnectorId> = HashMap::new();

        for link in &neuron.connectors {
            let Some(link_type) = link.relation.link_type() else {
                tracing::warn!(
                    "⚠️ Skipping connector {} with unsupported relation {}",
                    link.connector_id,
                    link.relation.code()
                );
                continue;
            };
            let Some(&node_id) = node_id_map.get(&link.node_id) else {
                tracing::warn!(
                    "⚠️ Node {} of connector {} was not in the upload response",
                    link.node_id,
                    link.connector_id
                );
                continue;
            };

            let target_connector = match created.get(&link.connector_id) {
                Some(id) => *id,
                None => {
                    let reused = existing.iter().find(|c| {
                        (c.x - link.x).abs() < SAME_CONNECTOR_TOLERANCE_NM
                            && (c.y - link.y).abs() < SAME_CONNECTOR_TOLERANCE_NM
                            && (c.z - link.z).abs() < SAME_CONNECTOR_TOLERANCE_NM
                    });
                    let id = match reused {
                        Some(c) => c.id,
                        None => self.create_connector(link.position()).await?,
                    };
                    created.insert(link.connector_id, id);
                    id
                }
            };
            self.link(node_id, link_type, target_connector).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CatmaidApi for CatmaidInstance {
    fn server(&self) -> &str {
        &self.server
    }

    fn project_id(&self) -> ProjectId {
        self.project_id
    }

    fn set_project_id(&mut self, project_id: ProjectId) {
        self.project_id = project_id;
    }

    fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        Ok(serde_json::from_value(self.get_json("projects/").await?)?)
    }

    async fn annotation_list(&self) -> Result<Vec<AnnotationInfo>> {
        let path = self.project_path("annotations/");
        let mut value = self.get_json(&path).await?;
        let list = value
            .get_mut("annotations")
            .map(Value::take)
            .ok_or_else(|| malformed(&path, "annotations"))?;
        Ok(serde_json::from_value(list)?)
    }

    async fn skids_by_annotation(
        &self,
        annotations: &[String],
        intersect: bool,
    ) -> Result<Vec<SkeletonId>> {
        let ids = self.annotation_ids(annotations).await?;
        let missing: Vec<&str> = annotations
            .iter()
            .zip(&ids)
            .filter(|(_, id)| id.is_none())
            .map(|(name, _)| name.as_str())
            .collect();
        let found: Vec<u64> = ids.into_iter().flatten().collect();
        if found.is_empty() || (intersect && !missing.is_empty()) {
            return Err(AddonsError::not_found(format!(
                "annotation(s) {:?} in project {}",
                missing, self.project_id
            )));
        }

        let mut form = vec![("types[0]".to_string(), "neuron".to_string())];
        if intersect {
            form.extend(indexed("annotated_with", &found));
        } else {
            let joined = found
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            form.push(("annotated_with[0]".to_string(), joined));
        }

        let path = self.project_path("annotations/query-targets");
        let value = self.post_query(&path, &form).await?;
        parse_query_targets(&path, &value)
    }

    async fn annotated_entity_count(&self, annotation: &str) -> Result<usize> {
        let name = [annotation.to_string()];
        let Some(id) = self.annotation_ids(&name).await?.into_iter().flatten().next() else {
            return Ok(0);
        };
        let path = self.project_path("annotations/query-targets");
        let form = indexed("annotated_with", &[id]);
        let value = self.post_query(&path, &form).await?;
        value
            .get("entities")
            .and_then(Value::as_array)
            .map(Vec::len)
            .ok_or_else(|| malformed(&path, "entities"))
    }

    async fn get_neuron(&self, skeleton_id: SkeletonId) -> Result<Neuron> {
        let path = self.project_path(&format!(
            "skeletons/{}/compact-detail?with_connectors=true&with_tags=true",
            skeleton_id
        ));
        let value = self.get_json(&path).await?;
        let mut neuron = parse_compact_skeleton(&path, skeleton_id, &value)?;
        neuron.name = self.neuron_name_and_id(skeleton_id).await?.0;
        neuron.annotations = self
            .get_annotations(&[skeleton_id])
            .await?
            .remove(&skeleton_id)
            .unwrap_or_default();
        Ok(neuron)
    }

    async fn get_annotations(
        &self,
        skeleton_ids: &[SkeletonId],
    ) -> Result<BTreeMap<SkeletonId, Vec<String>>> {
        let path = self.project_path("annotations/forskeletons");
        let value = self
            .post_query(&path, &indexed("skeleton_ids", skeleton_ids))
            .await?;
        parse_annotations_for_skeletons(&path, skeleton_ids, &value)
    }

    async fn neuron_id(&self, skeleton_id: SkeletonId) -> Result<NeuronId> {
        Ok(self.neuron_name_and_id(skeleton_id).await?.1)
    }

    async fn node_details(&self, node_ids: &[NodeId]) -> Result<Vec<NodeDetail>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let path = self.project_path("treenodes/compact-detail");
        let value = self
            .post_query(&path, &indexed("treenode_ids", node_ids))
            .await?;
        parse_node_details(&path, &value)
    }

    async fn user_list(&self) -> Result<Vec<UserInfo>> {
        Ok(serde_json::from_value(self.get_json("user-list").await?)?)
    }

    async fn upload_neuron(
        &self,
        neuron: &Neuron,
        request: &UploadRequest,
    ) -> Result<UploadResponse> {
        let path = self.project_path("skeletons/import");
        let file = reqwest::multipart::Part::text(swc::to_swc(neuron)).file_name("skeleton.swc");
        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("name", neuron.name.clone());
        match request.skeleton_id {
            Some(skid) => {
                form = form.text("skeleton_id", skid.to_string());
                if let Some(nid) = request.neuron_id {
                    form = form.text("neuron_id", nid.to_string());
                }
                if request.force_id {
                    form = form.text("force", "true");
                }
            }
            None => form = form.text("auto_id", "true"),
        }

        tracing::debug!("POST {} ({} nodes)", path, neuron.n_nodes());
        let response = self
            .authorize(self.client.post(self.url(&path)))
            .multipart(form)
            .send()
            .await?;
        let value = read_response(&path, response).await?;
        self.clear_cache();
        let uploaded: UploadResponse = serde_json::from_value(value)?;
        tracing::info!(
            "📤 Uploaded '{}' as skeleton {}",
            neuron.name,
            uploaded.skeleton_id
        );

        if request.import_tags && !neuron.tags.is_empty() {
            let mut by_node: BTreeMap<NodeId, Vec<&str>> = BTreeMap::new();
            for (tag, nodes) in &neuron.tags {
                for node in nodes {
                    if let Some(new_id) = uploaded.node_id_map.get(node) {
                        by_node.entry(*new_id).or_default().push(tag);
                    }
                }
            }
            for (node, tags) in by_node {
                self.add_tags(node, &tags).await?;
            }
        }

        if request.import_annotations && !neuron.annotations.is_empty() {
            self.add_annotations(&[uploaded.skeleton_id], &neuron.annotations)
                .await?;
        }

        if request.import_connectors && !neuron.connectors.is_empty() {
            self.import_connectors(
                neuron,
                &uploaded.node_id_map,
                request.reuse_existing_connectors,
            )
            .await?;
        }

        Ok(uploaded)
    }

    async fn add_annotations(
        &self,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> Result<()> {
        if skeleton_ids.is_empty() || annotations.is_empty() {
            return Ok(());
        }
        let mut form = indexed("annotations", annotations);
        form.extend(indexed("skeleton_ids", skeleton_ids));
        self.post_write(&self.project_path("annotations/add"), &form)
            .await?;
        Ok(())
    }

    async fn remove_annotations(
        &self,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> Result<()> {
        let ids: Vec<u64> = self
            .annotation_ids(annotations)
            .await?
            .into_iter()
            .flatten()
            .collect();
        if skeleton_ids.is_empty() || ids.is_empty() {
            return Ok(());
        }
        let mut form = indexed("skeleton_ids", skeleton_ids);
        form.extend(indexed("annotation_ids", &ids));
        self.post_write(&self.project_path("annotations/remove"), &form)
            .await?;
        Ok(())
    }

    async fn connectors(&self) -> Result<Vec<ConnectorInfo>> {
        let path = self.project_path("connectors/");
        let form = vec![("with_partners".to_string(), "true".to_string())];
        let value = self.post_query(&path, &form).await?;
        parse_connectors(&path, &value)
    }

    async fn delete_connector(&self, connector_id: ConnectorId) -> Result<()> {
        let form = vec![("connector_id".to_string(), connector_id.to_string())];
        self.post_write(&self.project_path("connector/delete"), &form)
            .await?;
        Ok(())
    }

    async fn delete_treenode(&self, node_id: NodeId) -> Result<()> {
        let form = vec![("treenode_id".to_string(), node_id.to_string())];
        self.post_write(&self.project_path("treenode/delete"), &form)
            .await?;
        Ok(())
    }

    async fn add_node(
        &self,
        position: [f64; 3],
        parent_id: Option<NodeId>,
        confidence: u8,
    ) -> Result<NodeId> {
        let path = self.project_path("treenode/create");
        let form = vec![
            ("x".to_string(), position[0].to_string()),
            ("y".to_string(), position[1].to_string()),
            ("z".to_string(), position[2].to_string()),
            (
                "parent_id".to_string(),
                parent_id.map_or_else(|| "-1".to_string(), |p| p.to_string()),
            ),
            ("radius".to_string(), "-1".to_string()),
            ("confidence".to_string(), confidence.to_string()),
        ];
        let value = self.post_write(&path, &form).await?;
        value
            .get("treenode_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed(&path, "treenode_id"))
    }

    async fn get_volume(&self, volume_id: VolumeId) -> Result<Value> {
        self.get_json(&self.project_path(&format!("volumes/{}/", volume_id)))
            .await
    }
}

/// `name[0]=a`, `name[1]=b`, ... as the server expects list parameters.
fn indexed<T: ToString>(name: &str, values: &[T]) -> Vec<(String, String)> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("{}[{}]", name, i), v.to_string()))
        .collect()
}

fn malformed(endpoint: &str, what: &str) -> AddonsError {
    AddonsError::RemoteError {
        endpoint: endpoint.to_string(),
        status: 200,
        message: format!("unexpected response shape: missing or invalid {}", what),
    }
}

async fn read_response(endpoint: &str, response: Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AddonsError::AuthError {
                message: format!("{} returned {}: {}", endpoint, status, body),
            },
            StatusCode::NOT_FOUND => AddonsError::not_found(endpoint.to_string()),
            _ => AddonsError::RemoteError {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: body,
            },
        });
    }

    let value: Value = response.json().await?;
    if let Some(error) = value.get("error") {
        let message = error.as_str().map_or_else(|| error.to_string(), str::to_string);
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        if kind.contains("PermissionError") {
            return Err(AddonsError::AuthError { message });
        }
        return Err(AddonsError::RemoteError {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        });
    }
    Ok(value)
}

fn parse_query_targets(endpoint: &str, value: &Value) -> Result<Vec<SkeletonId>> {
    let entities = value
        .get("entities")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(endpoint, "entities"))?;
    let mut skids: Vec<SkeletonId> = Vec::new();
    for entity in entities {
        let ids = entity
            .get("skeleton_ids")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_u64);
        for id in ids {
            if !skids.contains(&id) {
                skids.push(id);
            }
        }
    }
    Ok(skids)
}

/// `[nodes, connectors, tags]` where nodes are
/// `[id, parent, user, x, y, z, radius, confidence]` and connectors are
/// `[node, connector, relation, x, y, z]`.
pub(crate) fn parse_compact_skeleton(
    endpoint: &str,
    skeleton_id: SkeletonId,
    value: &Value,
) -> Result<Neuron> {
    let parts = value
        .as_array()
        .ok_or_else(|| malformed(endpoint, "skeleton array"))?;
    let rows = |i: usize| -> Result<&Vec<Value>> {
        parts
            .get(i)
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(endpoint, "skeleton section"))
    };
    let num = |row: &Value, i: usize| -> Result<f64> {
        row.get(i)
            .and_then(Value::as_f64)
            .ok_or_else(|| malformed(endpoint, "numeric column"))
    };

    let mut neuron = Neuron::new(skeleton_id, "");
    for row in rows(0)? {
        neuron.nodes.push(Node {
            id: num(row, 0)? as NodeId,
            parent_id: row.get(1).and_then(Value::as_u64),
            x: num(row, 3)?,
            y: num(row, 4)?,
            z: num(row, 5)?,
            radius: num(row, 6)?,
            confidence: num(row, 7)? as u8,
        });
    }
    for row in rows(1)? {
        neuron.connectors.push(ConnectorLink {
            node_id: num(row, 0)? as NodeId,
            connector_id: num(row, 1)? as ConnectorId,
            relation: ConnectorRelation::from_code(num(row, 2)? as i64),
            x: num(row, 3)?,
            y: num(row, 4)?,
            z: num(row, 5)?,
        });
    }
    if let Some(tags) = parts.get(2).and_then(Value::as_object) {
        for (tag, nodes) in tags {
            let ids = nodes
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_u64)
                .collect();
            neuron.tags.insert(tag.clone(), ids);
        }
    }
    Ok(neuron)
}

fn parse_annotations_for_skeletons(
    endpoint: &str,
    skeleton_ids: &[SkeletonId],
    value: &Value,
) -> Result<BTreeMap<SkeletonId, Vec<String>>> {
    let names = value
        .get("annotations")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed(endpoint, "annotations"))?;
    let skeletons = value
        .get("skeletons")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed(endpoint, "skeletons"))?;

    let mut out: BTreeMap<SkeletonId, Vec<String>> =
        skeleton_ids.iter().map(|id| (*id, Vec::new())).collect();
    for (skid, entries) in skeletons {
        let skid: SkeletonId = skid.parse().map_err(|_| malformed(endpoint, "skeleton id"))?;
        let annotations = out.entry(skid).or_default();
        for entry in entries.as_array().into_iter().flatten() {
            let name = entry
                .get("id")
                .and_then(Value::as_u64)
                .and_then(|id| names.get(&id.to_string()))
                .and_then(Value::as_str);
            if let Some(name) = name {
                annotations.push(name.to_string());
            }
        }
    }
    Ok(out)
}

/// Rows of `[id, parent, x, y, z, confidence, radius, skeleton, edition_time, user]`,
/// edition time in epoch seconds.
fn parse_node_details(endpoint: &str, value: &Value) -> Result<Vec<NodeDetail>> {
    value
        .as_array()
        .ok_or_else(|| malformed(endpoint, "node rows"))?
        .iter()
        .map(|row| {
            let get_u64 = |i: usize| {
                row.get(i)
                    .and_then(Value::as_u64)
                    .ok_or_else(|| malformed(endpoint, "node detail column"))
            };
            let seconds = row
                .get(8)
                .and_then(Value::as_f64)
                .ok_or_else(|| malformed(endpoint, "edition_time"))?;
            let edition_time = chrono::DateTime::from_timestamp(
                seconds.trunc() as i64,
                (seconds.fract() * 1e9) as u32,
            )
            .ok_or_else(|| malformed(endpoint, "edition_time"))?;
            Ok(NodeDetail {
                id: get_u64(0)?,
                skeleton_id: get_u64(7)?,
                edition_time,
                editor: get_u64(9)?,
            })
        })
        .collect()
}

/// Connectors with their partner lists; a connector without partners is
/// unlinked.
fn parse_connectors(endpoint: &str, value: &Value) -> Result<Vec<ConnectorInfo>> {
    let rows = value
        .get("connectors")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(endpoint, "connectors"))?;
    let partners = value.get("partners").and_then(Value::as_object);

    rows.iter()
        .map(|row| {
            let num = |i: usize| {
                row.get(i)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| malformed(endpoint, "connector column"))
            };
            let id = num(0)? as ConnectorId;
            let linked = partners
                .and_then(|p| p.get(&id.to_string()))
                .and_then(Value::as_array)
                .is_some_and(|links| !links.is_empty());
            Ok(ConnectorInfo {
                id,
                x: num(1)?,
                y: num(2)?,
                z: num(3)?,
                linked,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_indexed_form_fields() {
        let form = indexed("skeleton_ids", &[10u64, 20]);
        assert_eq!(
            form,
            vec![
                ("skeleton_ids[0]".to_string(), "10".to_string()),
                ("skeleton_ids[1]".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_compact_skeleton() {
        let value = json!([
            [[1, null, 3, 0.0, 0.0, 0.0, 500.0, 5], [2, 1, 3, 10.0, 0.0, 0.0, 100.0, 5]],
            [[2, 77, 0, 10.0, 1.0, 0.0]],
            {"soma": [1]}
        ]);
        let neuron = parse_compact_skeleton("x", 42, &value).unwrap();
        assert_eq!(neuron.skeleton_id, 42);
        assert_eq!(neuron.n_nodes(), 2);
        assert_eq!(neuron.node(2).unwrap().parent_id, Some(1));
        assert_eq!(neuron.connectors[0].connector_id, 77);
        assert_eq!(neuron.connectors[0].relation, ConnectorRelation::Presynaptic);
        assert_eq!(neuron.tags["soma"], vec![1]);
    }

    #[test]
    fn test_parse_annotations_fills_requested_ids() {
        let value = json!({
            "skeletons": {"5": [{"id": 1, "uid": 3}, {"id": 2, "uid": 3}]},
            "annotations": {"1": "DN", "2": "left"}
        });
        let out = parse_annotations_for_skeletons("x", &[5, 6], &value).unwrap();
        assert_eq!(out[&5], vec!["DN".to_string(), "left".to_string()]);
        assert!(out[&6].is_empty());
    }

    #[test]
    fn test_parse_connectors_linked_flag() {
        let value = json!({
            "connectors": [[1, 0.0, 1.0, 2.0, 5], [2, 3.0, 4.0, 5.0, 5]],
            "partners": {"1": [[9, 100, 200, 0, 5]], "2": []}
        });
        let out = parse_connectors("x", &value).unwrap();
        assert!(out[0].linked);
        assert!(!out[1].linked);
        assert_eq!(out[1].z, 5.0);
    }

    #[test]
    fn test_parse_node_details_times() {
        let value = json!([[1, null, 0.0, 0.0, 0.0, 5, 1.0, 10, 1600000000.5, 3]]);
        let out = parse_node_details("x", &value).unwrap();
        assert_eq!(out[0].skeleton_id, 10);
        assert_eq!(out[0].editor, 3);
        assert_eq!(out[0].edition_time.timestamp(), 1600000000);
    }

    #[test]
    fn test_server_url_is_trimmed() {
        let instance = CatmaidInstance::new("https://catmaid.example.org/", "abc", 2);
        assert_eq!(instance.server(), "https://catmaid.example.org");
        assert_eq!(instance.url("/projects/"), "https://catmaid.example.org/projects/");
    }
}
