//! Streaming batch pipeline.
//!
//! One builder thread groups utterances into packages, a pool of loader
//! workers shapes packages into batches, and a bounded queue hands batches
//! to the consumer. Each worker runs in its own thread; the queue provides
//! backpressure.

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod shaping;
pub mod station;
pub mod store;
pub mod types;
pub mod worker;

pub use builder::{BuildSource, BuildSummary, PackageBuilder, SkipReason};
pub use error::{CollectingReporter, ErrorReporter, LogReporter, StationError};
pub use orchestrator::{BatchLoader, BatchLoaderBuilder};
pub use queue::{BatchConsumer, BatchProducer, QueueItem, batch_queue};
pub use shaping::{
    ConvShaper, LoadedPackage, Shaper, SliceShaper, TdnnShaper, WholeShaper, shaper_for,
};
pub use station::{RunnerContext, Station, StationRunner, WorkerExit};
pub use store::{Claim, PackageStore};
pub use types::{Batch, FeatureDim, Features, Labels, Package};
pub use worker::{FrameSkip, LoaderStation, PackageLoader};
