//! seqfeed - streaming batch loader for speech feature sequences
//!
//! Groups utterances into fixed-width packages on a background thread,
//! shapes them into padded tensors on a worker pool, and hands batches to a
//! training loop through a bounded queue, one epoch at a time.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod criterion;
pub mod defaults;
pub mod error;
pub mod io;
pub mod labels;
pub mod lattice;
pub mod pipeline;
pub mod transform;

// Collaborator traits (reader → transform → lattices)
pub use io::FeatureReader;
pub use lattice::LatticeProvider;
pub use transform::FeatureTransform;

// Loader
pub use pipeline::orchestrator::{BatchLoader, BatchLoaderBuilder};
pub use pipeline::types::{Batch, FeatureDim, Features, Labels, Package};

// Error handling
pub use error::{Result, SeqfeedError};

// Config
pub use config::LoaderConfig;
pub use criterion::{Criterion, LabelEncoding, Objective, Shaping};

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
