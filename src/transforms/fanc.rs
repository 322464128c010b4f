//! Elastic warps between the FANC EM dataset and the VNC template.
//!
//! The heavy lifting is a B-spline registration applied by transformix. This
//! module owns the unit conversions, voxel rescaling, z flip and left-right
//! reflection on either side of that call.

use crate::adapters::transformix::Transformix;
use crate::domain::ports::PointTransform;
use crate::transforms::points::{check_declared_units, Points, Units};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Template midline, in microns (voxel 329 at 0.4 µm).
pub const TEMPLATE_PLANE_OF_SYMMETRY_X_MICRONS: f64 = 329.0 * 0.4;
/// Position of FANC voxel (0, 0, 0), in nm.
pub const FANC_OFFSET_NM: [f64; 3] = [533.2, 533.2, 945.0];
pub const FANC_VOXEL_SIZE_NM: [f64; 3] = [430.0, 430.0, 450.0];
pub const TEMPLATE_VOXEL_SIZE_NM: [f64; 3] = [300.0, 300.0, 400.0];
/// The template stack has 436 slices of 400 nm.
pub const Z_FLIP_NM: f64 = 435.0 * 400.0;

pub const FANC_TO_TEMPLATE_PARAMETERS: &str = "TransformParameters.FixedFANC.txt";
pub const TEMPLATE_TO_FANC_PARAMETERS: &str = "TransformParameters.FixedTemplate.Bspline.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarpDirection {
    FancToTemplate,
    TemplateToFanc,
}

impl WarpDirection {
    pub fn parameter_file_name(&self) -> &'static str {
        match self {
            Self::FancToTemplate => FANC_TO_TEMPLATE_PARAMETERS,
            Self::TemplateToFanc => TEMPLATE_TO_FANC_PARAMETERS,
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            Self::FancToTemplate => Self::TemplateToFanc,
            Self::TemplateToFanc => Self::FancToTemplate,
        }
    }
}

/// Where to find transformix and its parameter files.
#[derive(Debug, Clone)]
pub struct WarpContext {
    pub transformix: Transformix,
    pub parameter_dir: PathBuf,
}

impl WarpContext {
    pub fn new(transformix: Transformix, parameter_dir: impl Into<PathBuf>) -> Self {
        Self {
            transformix,
            parameter_dir: parameter_dir.into(),
        }
    }

    pub fn parameter_file(&self, direction: WarpDirection) -> PathBuf {
        self.parameter_dir.join(direction.parameter_file_name())
    }
}

fn mirror_about_template_midline(points: Points) -> Points {
    points.map_rows(|[x, y, z]| [2.0 * TEMPLATE_PLANE_OF_SYMMETRY_X_MICRONS - x, y, z])
}

fn flip_z(points: Points) -> Points {
    points.map_rows(|[x, y, z]| [x, y, Z_FLIP_NM - z])
}

fn divide(points: Points, by: [f64; 3]) -> Points {
    points.scale([1.0 / by[0], 1.0 / by[1], 1.0 / by[2]])
}

/// FANC coordinates in `units` to template-grid microns, ready for transformix.
pub fn fanc_to_template_pre(points: Points, units: Units) -> Points {
    let nm = points.scale_all(units.nanometers_per_unit());
    let rescaled = divide(nm.offset(FANC_OFFSET_NM.map(|v| -v)), FANC_VOXEL_SIZE_NM)
        .scale(TEMPLATE_VOXEL_SIZE_NM);
    flip_z(rescaled).scale_all(1.0 / 1000.0)
}

/// transformix output (template microns) to template coordinates in `units`.
pub fn fanc_to_template_post(points: Points, units: Units, reflect: bool) -> Points {
    // The registration itself mirrors left and right, so undo that unless the
    // caller wants the flipped result.
    let points = if reflect {
        points
    } else {
        mirror_about_template_midline(points)
    };
    points.scale_all(1000.0 / units.nanometers_per_unit())
}

/// Template coordinates in `units` to template microns, ready for transformix.
pub fn template_to_fanc_pre(points: Points, units: Units, reflect: bool) -> Points {
    let microns = points.scale_all(units.nanometers_per_unit() / 1000.0);
    if reflect {
        microns
    } else {
        mirror_about_template_midline(microns)
    }
}

/// transformix output (template-grid microns) to FANC coordinates in `units`.
pub fn template_to_fanc_post(points: Points, units: Units) -> Points {
    let nm = flip_z(points.scale_all(1000.0));
    divide(nm, TEMPLATE_VOXEL_SIZE_NM)
        .scale(FANC_VOXEL_SIZE_NM)
        .offset(FANC_OFFSET_NM)
        .scale_all(1.0 / units.nanometers_per_unit())
}

/// Warp FANC points into the template space.
///
/// Points declared as nm that all lie below 1000 are rejected with a unit
/// error rather than silently reinterpreted.
pub async fn warp_points_fanc_to_template(
    context: &WarpContext,
    points: &Points,
    input_units: Units,
    output_units: Units,
    reflect: bool,
) -> Result<Points> {
    if points.is_empty() {
        return Ok(Points::default());
    }
    check_declared_units(points, input_units)?;

    let prepared = fanc_to_template_pre(points.clone(), input_units);
    let warped = context
        .transformix
        .run(&prepared, &context.parameter_file(WarpDirection::FancToTemplate))
        .await?;
    Ok(fanc_to_template_post(warped, output_units, reflect))
}

/// Warp template points into FANC space.
pub async fn warp_points_template_to_fanc(
    context: &WarpContext,
    points: &Points,
    input_units: Units,
    output_units: Units,
    reflect: bool,
) -> Result<Points> {
    if points.is_empty() {
        return Ok(Points::default());
    }
    check_declared_units(points, input_units)?;

    let prepared = template_to_fanc_pre(points.clone(), input_units, reflect);
    let warped = context
        .transformix
        .run(&prepared, &context.parameter_file(WarpDirection::TemplateToFanc))
        .await?;
    Ok(template_to_fanc_post(warped, output_units))
}

/// A configured FANC/template warp usable wherever a `PointTransform` is.
#[derive(Debug, Clone)]
pub struct FancWarp {
    pub context: WarpContext,
    pub direction: WarpDirection,
    pub units: Units,
    pub reflect: bool,
}

impl FancWarp {
    pub fn new(context: WarpContext, direction: WarpDirection) -> Self {
        Self {
            context,
            direction,
            units: Units::Nanometers,
            reflect: false,
        }
    }

    pub fn with_reflect(mut self, reflect: bool) -> Self {
        self.reflect = reflect;
        self
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    pub fn parameter_dir(&self) -> &Path {
        &self.context.parameter_dir
    }
}

#[async_trait]
impl PointTransform for FancWarp {
    async fn transform(&self, points: &Points) -> Result<Points> {
        match self.direction {
            WarpDirection::FancToTemplate => {
                warp_points_fanc_to_template(
                    &self.context,
                    points,
                    self.units,
                    self.units,
                    self.reflect,
                )
                .await
            }
            WarpDirection::TemplateToFanc => {
                warp_points_template_to_fanc(
                    &self.context,
                    points,
                    self.units,
                    self.units,
                    self.reflect,
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::AddonsError;

    fn fanc_points() -> Points {
        Points::new(vec![
            [533.2, 533.2, 945.0],
            [200000.0, 350000.0, 100000.0],
            [48000.5, 100.0, 70000.0],
        ])
    }

    #[test]
    fn test_fanc_origin_maps_to_top_of_template_stack() {
        let out = fanc_to_template_pre(Points::new(vec![[533.2, 533.2, 945.0]]), Units::Nanometers);
        let p = out.rows()[0];
        assert!(p[0].abs() < 1e-9);
        assert!(p[1].abs() < 1e-9);
        assert!((p[2] - Z_FLIP_NM / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_pre_and_post_steps_invert_each_other() {
        let points = fanc_points();
        let template_grid = fanc_to_template_pre(points.clone(), Units::Nanometers);
        let back = template_to_fanc_post(template_grid, Units::Nanometers);
        assert!(back.max_abs_diff(&points).unwrap() < 1e-6);
    }

    #[test]
    fn test_microns_and_nm_agree() {
        let nm = fanc_points();
        let microns = nm.clone().scale_all(1.0 / 1000.0);
        let a = fanc_to_template_pre(nm, Units::Nanometers);
        let b = fanc_to_template_pre(microns, Units::Microns);
        assert!(a.max_abs_diff(&b).unwrap() < 1e-9);
    }

    #[test]
    fn test_post_mirrors_unless_reflect() {
        let warped = Points::new(vec![[100.0, 50.0, 20.0]]);
        let mirrored = fanc_to_template_post(warped.clone(), Units::Microns, false);
        assert!((mirrored.rows()[0][0] - (2.0 * 131.6 - 100.0)).abs() < 1e-9);

        let kept = fanc_to_template_post(warped, Units::Nanometers, true);
        assert_eq!(kept.rows()[0], [100000.0, 50000.0, 20000.0]);
    }

    #[test]
    fn test_template_pre_mirrors_then_converts() {
        let out = template_to_fanc_pre(Points::new(vec![[131600.0, 1000.0, 0.0]]), Units::Nanometers, false);
        let p = out.rows()[0];
        assert!((p[0] - 131.6).abs() < 1e-9);
        assert!((p[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_parameter_file_names() {
        let context = WarpContext::new(Transformix::default(), "/params");
        assert_eq!(
            context.parameter_file(WarpDirection::FancToTemplate),
            PathBuf::from("/params/TransformParameters.FixedFANC.txt")
        );
        assert_eq!(
            WarpDirection::FancToTemplate.reverse(),
            WarpDirection::TemplateToFanc
        );
    }

    #[tokio::test]
    async fn test_empty_input_returns_empty_output() {
        let context = WarpContext::new(Transformix::new("/no/such/binary"), "/no/such/dir");
        let out = warp_points_fanc_to_template(
            &context,
            &Points::default(),
            Units::Nanometers,
            Units::Nanometers,
            false,
        )
        .await
        .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_micron_looking_input_fails_before_running_the_tool() {
        let context = WarpContext::new(Transformix::new("/no/such/binary"), "/no/such/dir");
        let err = warp_points_template_to_fanc(
            &context,
            &Points::new(vec![[10.0, 20.0, 30.0]]),
            Units::Nanometers,
            Units::Nanometers,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AddonsError::UnitError { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_round_trip_through_identity_tool() {
        use std::os::unix::fs::PermissionsExt;

        // Stand-in for transformix that echoes its input points back.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_transformix");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 -out) out=\"$2\"; shift 2 ;;\n\
                 -def) def=\"$2\"; shift 2 ;;\n\
                 *) shift ;;\n\
               esac\n\
             done\n\
             tail -n +3 \"$def\" | while read x y z; do\n\
               echo \"Point ; OutputPoint = [ $x $y $z ]\"\n\
             done > \"$out/outputpoints.txt\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        for name in [FANC_TO_TEMPLATE_PARAMETERS, TEMPLATE_TO_FANC_PARAMETERS] {
            std::fs::write(dir.path().join(name), "(Transform \"BSplineTransform\")\n").unwrap();
        }

        let context = WarpContext::new(Transformix::new(&script), dir.path());
        let points = fanc_points();
        let there = warp_points_fanc_to_template(
            &context,
            &points,
            Units::Nanometers,
            Units::Nanometers,
            false,
        )
        .await
        .unwrap();
        assert_eq!(there.len(), points.len());

        let back = warp_points_template_to_fanc(
            &context,
            &there,
            Units::Nanometers,
            Units::Nanometers,
            false,
        )
        .await
        .unwrap();
        // transformix input is written with six decimals of microns
        assert!(back.max_abs_diff(&points).unwrap() < 0.01);
    }
}
