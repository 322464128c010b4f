// Adapters layer: concrete implementations of the domain ports for the
// CATMAID HTTP API, SWC files, the transformix executable and the terminal.

pub mod catmaid;
pub mod prompt;
pub mod swc;
pub mod transformix;

pub use catmaid::CatmaidInstance;
pub use transformix::Transformix;
