#[cfg(feature = "cli")]
pub mod cli;
pub mod connection;

#[cfg(feature = "cli")]
pub use cli::{Cli, Command};
pub use connection::{ConnectionConfig, ProjectSettings};
