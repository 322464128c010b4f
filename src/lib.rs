pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod transforms;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{Cli, Command};

pub use adapters::{CatmaidInstance, Transformix};
pub use config::ConnectionConfig;
pub use core::connections::{Connections, ProjectSelector};
pub use core::reupload::{Reuploader, UploadOptions, UploadOutcome};
pub use transforms::{AffineTransform, FancWarp, Points, Units};
pub use utils::error::{AddonsError, Result};
