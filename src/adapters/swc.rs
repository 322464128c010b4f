//! SWC skeleton files: one `id type x y z radius parent` line per node,
//! `-1` as the root's parent, `#` comments.

use crate::domain::model::{Neuron, Node, NodeId};
use crate::utils::error::{AddonsError, Result};
use std::fmt::Write as _;
use std::path::Path;

/// SWC structure type for undefined segments.
const UNDEFINED_TYPE: u8 = 0;
const SOMA_TYPE: u8 = 1;

/// Serialise the skeleton. Connectors, tags and annotations are not part of
/// the format and are dropped.
pub fn to_swc(neuron: &Neuron) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", neuron.name);
    let _ = writeln!(out, "# skeleton id {}", neuron.skeleton_id);
    let roots = neuron.roots();
    for node in &neuron.nodes {
        let kind = if roots.contains(&node.id) {
            SOMA_TYPE
        } else {
            UNDEFINED_TYPE
        };
        let parent = node
            .parent_id
            .filter(|_| !roots.contains(&node.id))
            .map_or_else(|| "-1".to_string(), |p| p.to_string());
        let _ = writeln!(
            out,
            "{} {} {} {} {} {} {}",
            node.id, kind, node.x, node.y, node.z, node.radius, parent
        );
    }
    out
}

pub fn from_swc(text: &str) -> Result<Neuron> {
    let mut neuron = Neuron::new(0, "");
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            return Err(AddonsError::validation(format!(
                "SWC line {} has {} fields, expected 7",
                lineno + 1,
                fields.len()
            )));
        }
        let number = |i: usize| -> Result<f64> {
            fields[i].parse::<f64>().map_err(|e| {
                AddonsError::validation(format!(
                    "SWC line {} field {} '{}': {}",
                    lineno + 1,
                    i + 1,
                    fields[i],
                    e
                ))
            })
        };
        let id = number(0)? as NodeId;
        let parent = number(6)?;
        neuron.nodes.push(Node {
            id,
            parent_id: (parent >= 0.0).then_some(parent as NodeId),
            x: number(2)?,
            y: number(3)?,
            z: number(4)?,
            radius: number(5)?,
            confidence: 5,
        });
    }
    if neuron.nodes.is_empty() {
        return Err(AddonsError::validation("SWC file contains no nodes"));
    }
    Ok(neuron)
}

pub fn read_swc<P: AsRef<Path>>(path: P) -> Result<Neuron> {
    let path = path.as_ref();
    let mut neuron = from_swc(&std::fs::read_to_string(path)?)?;
    neuron.name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(neuron)
}

pub fn write_swc<P: AsRef<Path>>(path: P, neuron: &Neuron) -> Result<()> {
    std::fs::write(path, to_swc(neuron))?;
    Ok(())
}
