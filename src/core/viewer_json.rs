//! Documents the server's 3D viewer loads to show a coloured set of skeletons:
//!
//! `[{"skeleton_id": 12, "color": "#ff0000", "opacity": 1.0}, ...]`

use crate::domain::model::SkeletonId;
use crate::domain::ports::CatmaidApi;
use crate::utils::error::{AddonsError, Result};
use crate::utils::validation::{validate_hex_color, validate_range};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerEntry {
    pub skeleton_id: SkeletonId,
    pub color: String,
    pub opacity: f64,
}

/// One entry per skeleton annotated with any of a colour's annotations,
/// colours in input order. A skeleton is listed once per colour it matches.
pub async fn make_json_by_annotations<A: CatmaidApi + ?Sized>(
    api: &A,
    groups: &[(String, Vec<String>)],
    opacity: f64,
) -> Result<Vec<ViewerEntry>> {
    validate_range("opacity", opacity, 0.0, 1.0)?;
    let mut entries = Vec::new();
    for (color, annotations) in groups {
        validate_hex_color("color", color)?;
        let skids = match api.skids_by_annotation(annotations, false).await {
            Ok(skids) => skids,
            Err(AddonsError::NotFoundError { what }) => {
                tracing::warn!("⚠️ Nothing to draw in {}: {}", color, what);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        tracing::debug!("{} skeletons for {} ({:?})", skids.len(), color, annotations);
        let mut seen = HashSet::new();
        entries.extend(
            skids
                .into_iter()
                .filter(|s| seen.insert(*s))
                .map(|skeleton_id| ViewerEntry {
                    skeleton_id,
                    color: color.clone(),
                    opacity,
                }),
        );
    }
    Ok(entries)
}

pub fn make_json_by_skids(
    groups: &[(String, Vec<SkeletonId>)],
    opacity: f64,
) -> Result<Vec<ViewerEntry>> {
    validate_range("opacity", opacity, 0.0, 1.0)?;
    let mut entries = Vec::new();
    for (color, skids) in groups {
        validate_hex_color("color", color)?;
        let mut seen = HashSet::new();
        for &skeleton_id in skids {
            if seen.insert(skeleton_id) {
                entries.push(ViewerEntry {
                    skeleton_id,
                    color: color.clone(),
                    opacity,
                });
            }
        }
    }
    Ok(entries)
}

pub fn to_json_string(entries: &[ViewerEntry]) -> Result<String> {
    Ok(serde_json::to_string(entries)?)
}

pub fn write_viewer_json<P: AsRef<Path>>(path: P, entries: &[ViewerEntry]) -> Result<()> {
    std::fs::write(path.as_ref(), to_json_string(entries)?)?;
    tracing::info!(
        "📁 Wrote {} viewer entries to {}",
        entries.len(),
        path.as_ref().display()
    );
    Ok(())
}

pub fn read_viewer_json<P: AsRef<Path>>(path: P) -> Result<Vec<ViewerEntry>> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<ViewerEntry> = serde_json::from_str(&content)?;
    for entry in &entries {
        validate_hex_color("color", &entry.color)?;
    }
    Ok(entries)
}

pub fn group_by_color(entries: &[ViewerEntry]) -> BTreeMap<String, Vec<SkeletonId>> {
    let mut groups: BTreeMap<String, Vec<SkeletonId>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(entry.color.clone())
            .or_default()
            .push(entry.skeleton_id);
    }
    groups
}

/// Parse `{"#ff0000": ["annotation", ...], ...}`, keeping the file's order.
pub fn parse_color_mapping(content: &str) -> Result<Vec<(String, Vec<String>)>> {
    let Value::Object(map) = serde_json::from_str::<Value>(content)? else {
        return Err(AddonsError::validation(
            "colour mapping must be a JSON object of colour to annotations",
        ));
    };
    map.into_iter()
        .map(|(color, annotations)| {
            validate_hex_color("color", &color)?;
            let annotations: Vec<String> = match annotations {
                Value::String(one) => vec![one],
                other => serde_json::from_value(other)?,
            };
            Ok((color, annotations))
        })
        .collect()
}

pub fn read_color_mapping<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<String>)>> {
    parse_color_mapping(&std::fs::read_to_string(path)?)
}
