pub mod affine;
pub mod fanc;
pub mod points;

pub use affine::{affine_transform, AffineTransform};
pub use fanc::{
    warp_points_fanc_to_template, warp_points_template_to_fanc, FancWarp, WarpContext,
    WarpDirection,
};
pub use points::{check_declared_units, Points, Units};
