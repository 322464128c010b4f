//! Affine maps `p' = A p + b` on Nx3 point sets.
//!
//! Transform files use the row-vector convention: four lines of four numbers
//! forming `T` such that `[x' y' z' _] = [x y z 1] · T`. For example
//!
//! ```text
//! -1 0 0 0
//!  0 1 0 0
//!  0 0 1 0
//! 320000 0 0 0
//! ```
//!
//! maps `x' = -x + 320000`, a reflection across the plane `x = 160000`.

use crate::domain::ports::PointTransform;
use crate::transforms::Points;
use crate::utils::error::{AddonsError, Result};
use async_trait::async_trait;
use nalgebra::{Matrix3, Vector3};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: Matrix3<f64>,
    pub b: Vector3<f64>,
}

impl AffineTransform {
    pub fn new(a: Matrix3<f64>, b: Vector3<f64>) -> Self {
        Self { a, b }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    pub fn translation(offset: [f64; 3]) -> Self {
        Self::new(Matrix3::identity(), Vector3::from(offset))
    }

    /// Mirror across the FAFB/FANC midline, `x = 160000` nm.
    pub fn reflect_x() -> Self {
        Self::new(
            Matrix3::from_diagonal(&Vector3::new(-1.0, 1.0, 1.0)),
            Vector3::new(320000.0, 0.0, 0.0),
        )
    }

    /// Named transforms available without a file.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "identity" => Some(Self::identity()),
            "reflect_x" => Some(Self::reflect_x()),
            _ => None,
        }
    }

    /// Parse a row-vector transform matrix (see module docs). Only the first
    /// three columns are used; the fourth may be absent.
    pub fn from_row_vector_matrix(rows: &[Vec<f64>]) -> Result<Self> {
        if rows.len() != 4 {
            return Err(AddonsError::validation(format!(
                "affine transform needs 4 rows, got {}",
                rows.len()
            )));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() < 3 || r.len() > 4) {
            return Err(AddonsError::validation(format!(
                "affine transform row {} has {} entries, expected 3 or 4",
                i,
                row.len()
            )));
        }

        let a = Matrix3::from_fn(|r, c| rows[c][r]);
        let b = Vector3::new(rows[3][0], rows[3][1], rows[3][2]);
        Ok(Self::new(a, b))
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let rows = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| {
                l.split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|t| !t.is_empty())
                    .map(|t| {
                        t.parse::<f64>().map_err(|e| {
                            AddonsError::validation(format!("bad number '{}' in transform: {}", t, e))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_row_vector_matrix(&rows)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)?;
        Self::from_text(&text)
    }

    pub fn inverse(&self) -> Result<Self> {
        let a_inv = self.a.try_inverse().ok_or_else(|| {
            AddonsError::validation("affine transform matrix is singular and has no inverse")
        })?;
        Ok(Self::new(a_inv, -(a_inv * self.b)))
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &AffineTransform) -> Self {
        Self::new(next.a * self.a, next.a * self.b + next.b)
    }

    pub fn apply_point(&self, p: [f64; 3]) -> [f64; 3] {
        let q = self.a * Vector3::from(p) + self.b;
        [q.x, q.y, q.z]
    }

    pub fn apply(&self, points: &Points) -> Points {
        points.clone().map_rows(|p| self.apply_point(p))
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

#[async_trait]
impl PointTransform for AffineTransform {
    async fn transform(&self, points: &Points) -> Result<Points> {
        Ok(self.apply(points))
    }
}

/// `(A · pointsᵀ + b)ᵀ`
pub fn affine_transform(points: &Points, a: &Matrix3<f64>, b: &Vector3<f64>) -> Points {
    AffineTransform::new(*a, *b).apply(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Points {
        Points::new(vec![
            [0.0, 0.0, 0.0],
            [160000.0, 5.0, -3.0],
            [123.25, 456000.5, 78000.0],
        ])
    }

    #[test]
    fn test_identity_is_noop() {
        let points = sample();
        let out = affine_transform(&points, &Matrix3::identity(), &Vector3::zeros());
        assert_eq!(out.len(), points.len());
        assert!(out.max_abs_diff(&points).unwrap() < 1e-9);
    }

    #[test]
    fn test_reflect_x() {
        let out = AffineTransform::reflect_x().apply(&sample());
        assert_eq!(out.rows()[0], [320000.0, 0.0, 0.0]);
        assert_eq!(out.rows()[1], [160000.0, 5.0, -3.0]);
    }

    #[test]
    fn test_inverse_round_trip() {
        let t = AffineTransform::new(
            Matrix3::new(2.0, 0.5, 0.0, 0.0, 1.5, 0.25, 0.1, 0.0, 3.0),
            Vector3::new(10.0, -20.0, 30.0),
        );
        let points = sample();
        let back = t.inverse().unwrap().apply(&t.apply(&points));
        assert!(back.max_abs_diff(&points).unwrap() < 1e-6);
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let t = AffineTransform::new(Matrix3::zeros(), Vector3::zeros());
        assert!(t.inverse().is_err());
    }

    #[test]
    fn test_then_matches_sequential_application() {
        let first = AffineTransform::translation([1.0, 2.0, 3.0]);
        let second = AffineTransform::reflect_x();
        let points = sample();
        let composed = first.then(&second).apply(&points);
        let sequential = second.apply(&first.apply(&points));
        assert!(composed.max_abs_diff(&sequential).unwrap() < 1e-9);
    }

    #[test]
    fn test_parse_row_vector_file_format() {
        let text = "-1 0 0 0\n0 1 0 0\n0 0 1 0\n320000 0 0 0\n";
        let t = AffineTransform::from_text(text).unwrap();
        assert_eq!(t, AffineTransform::reflect_x());
    }

    #[test]
    fn test_parse_uses_row_vector_convention() {
        // x' = x + 2y, i.e. T[1][0] = 2
        let text = "1 0 0\n2 1 0\n0 0 1\n0 0 0\n";
        let t = AffineTransform::from_text(text).unwrap();
        assert_eq!(t.apply_point([1.0, 1.0, 0.0]), [3.0, 1.0, 0.0]);
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(AffineTransform::from_text("1 0 0 0\n0 1 0 0\n").is_err());
        assert!(AffineTransform::from_text("1 0\n0 1\n0 0\n0 0\n").is_err());
        assert!(AffineTransform::from_text("1 0 0\nx 1 0\n0 0 1\n0 0 0\n").is_err());
    }

    #[test]
    fn test_preserves_row_count_and_order() {
        let points = Points::new((0..50).map(|i| [i as f64, 0.0, 0.0]).collect());
        let out = AffineTransform::translation([0.0, 1.0, 0.0]).apply(&points);
        assert_eq!(out.len(), 50);
        for (i, p) in out.iter().enumerate() {
            assert_eq!(p[0], i as f64);
        }
    }
}
