pub mod connections;
pub mod housekeeping;
pub mod linked_neurons;
pub mod linking;
pub mod reupload;
pub mod viewer_json;
pub mod volume;

pub use crate::domain::model::{Neuron, SkeletonId};
pub use crate::domain::ports::{CatmaidApi, Confirm, PointTransform};
pub use crate::utils::error::Result;
