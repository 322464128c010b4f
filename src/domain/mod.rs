// Domain layer: core models and ports (interfaces). Adapters implement the ports.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::{CatmaidApi, Confirm, PointTransform};
