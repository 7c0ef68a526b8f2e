//! Index Builder: turns resource records into stored index entries.
pub mod core;

pub use self::core::{BuildFailure, BuildReport, IndexBuilder};
