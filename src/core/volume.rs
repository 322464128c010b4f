//! Triangle-mesh volumes from the server's volume manager and
//! point-in-volume tests.

use crate::domain::model::VolumeId;
use crate::utils::error::{AddonsError, Result};
use nalgebra::Vector3;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Slightly off-axis so rays rarely graze mesh edges exactly.
const RAY_DIRECTION: [f64; 3] = [1.0, 0.012_345_678_9, 0.023_456_789_1];
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub id: VolumeId,
    pub name: String,
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
}

fn x3d_attribute(name: &str) -> &'static Regex {
    static INDEX: OnceLock<Regex> = OnceLock::new();
    static POINT: OnceLock<Regex> = OnceLock::new();
    let cell = if name == "index" { &INDEX } else { &POINT };
    cell.get_or_init(|| {
        Regex::new(&format!(r#"\b{}\s*=\s*["']([^"']*)["']"#, name))
            .expect("valid X3D attribute pattern")
    })
}

fn numbers(text: &str) -> Result<Vec<f64>> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<f64>()
                .map_err(|e| AddonsError::validation(format!("bad mesh number '{}': {}", t, e)))
        })
        .collect()
}

impl Volume {
    pub fn new(id: VolumeId, name: impl Into<String>, vertices: Vec<[f64; 3]>, faces: Vec<[usize; 3]>) -> Result<Self> {
        if let Some(face) = faces.iter().find(|f| f.iter().any(|&i| i >= vertices.len())) {
            return Err(AddonsError::validation(format!(
                "volume {} face {:?} refers to a missing vertex",
                id, face
            )));
        }
        Ok(Self {
            id,
            name: name.into(),
            vertices,
            faces,
        })
    }

    /// Parse a volume document: either an X3D `IndexedTriangleSet` string in
    /// `mesh`, or a `[vertices, faces]` array.
    pub fn from_json(id: VolumeId, value: &Value) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mesh = value.get("mesh").unwrap_or(value);

        match mesh {
            Value::String(x3d) => Self::from_x3d(id, name, x3d),
            Value::Array(parts) if parts.len() == 2 => {
                let vertices = parts[0]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|v| {
                        let xyz: Vec<f64> = v
                            .as_array()
                            .into_iter()
                            .flatten()
                            .filter_map(Value::as_f64)
                            .collect();
                        match xyz[..] {
                            [x, y, z] => Ok([x, y, z]),
                            _ => Err(AddonsError::validation("volume vertex is not x, y, z")),
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                let faces = parts[1]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|f| {
                        let idx: Vec<usize> = f
                            .as_array()
                            .into_iter()
                            .flatten()
                            .filter_map(Value::as_u64)
                            .map(|i| i as usize)
                            .collect();
                        match idx[..] {
                            [a, b, c] => Ok([a, b, c]),
                            _ => Err(AddonsError::validation("volume face is not a triangle")),
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                Self::new(id, name, vertices, faces)
            }
            _ => Err(AddonsError::validation(format!(
                "volume {} has no mesh in a known format",
                id
            ))),
        }
    }

    fn from_x3d(id: VolumeId, name: String, x3d: &str) -> Result<Self> {
        let attribute = |attr: &str| -> Result<Vec<f64>> {
            let caps = x3d_attribute(attr).captures(x3d).ok_or_else(|| {
                AddonsError::validation(format!("volume {} mesh has no {} attribute", id, attr))
            })?;
            numbers(&caps[1])
        };
        let index = attribute("index")?;
        let point = attribute("point")?;
        if index.len() % 3 != 0 || point.len() % 3 != 0 {
            return Err(AddonsError::validation(format!(
                "volume {} mesh is not made of triangles",
                id
            )));
        }
        let vertices = point.chunks(3).map(|c| [c[0], c[1], c[2]]).collect();
        let faces = index
            .chunks(3)
            .map(|c| [c[0] as usize, c[1] as usize, c[2] as usize])
            .collect();
        Self::new(id, name, vertices, faces)
    }

    pub fn bounds(&self) -> Option<([f64; 3], [f64; 3])> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(lo, hi), v| {
            (
                [lo[0].min(v[0]), lo[1].min(v[1]), lo[2].min(v[2])],
                [hi[0].max(v[0]), hi[1].max(v[1]), hi[2].max(v[2])],
            )
        }))
    }

    /// Odd number of ray crossings means inside. The mesh should be closed.
    pub fn contains(&self, point: [f64; 3]) -> bool {
        let Some((lo, hi)) = self.bounds() else {
            return false;
        };
        if (0..3).any(|i| point[i] < lo[i] || point[i] > hi[i]) {
            return false;
        }

        let origin = Vector3::from(point);
        let direction = Vector3::from(RAY_DIRECTION);
        let crossings = self
            .faces
            .iter()
            .filter(|f| {
                ray_hits_triangle(
                    &origin,
                    &direction,
                    Vector3::from(self.vertices[f[0]]),
                    Vector3::from(self.vertices[f[1]]),
                    Vector3::from(self.vertices[f[2]]),
                )
            })
            .count();
        crossings % 2 == 1
    }
}

/// Möller–Trumbore, counting only hits in front of the origin.
fn ray_hits_triangle(
    origin: &Vector3<f64>,
    direction: &Vector3<f64>,
    a: Vector3<f64>,
    b: Vector3<f64>,
    c: Vector3<f64>,
) -> bool {
    let edge1 = b - a;
    let edge2 = c - a;
    let h = direction.cross(&edge2);
    let det = edge1.dot(&h);
    if det.abs() < EPSILON {
        return false;
    }
    let inv = 1.0 / det;
    let s = origin - a;
    let u = inv * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return false;
    }
    let q = s.cross(&edge1);
    let v = inv * direction.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return false;
    }
    inv * edge2.dot(&q) > EPSILON
}
