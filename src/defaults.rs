//! Default configuration constants for seqfeed.
//!
//! Shared by `LoaderConfig` defaults and the probe binary so both agree.

/// Longest utterance (in frames, after frame skipping) admitted into a package.
///
/// Utterances above this length are dropped by the package builder.
pub const MAX_INPUT_SEQ_LENGTH: usize = 1500;

/// Number of parallel streams (utterances) per package.
pub const BATCH_SIZE: usize = 1;

/// Width of one sub-batch in slice mode, in frames.
pub const NUM_FRAMES_BATCH: usize = 20;

/// Frame decimation factor. 1 keeps every frame.
pub const SKIP_FRAME: usize = 1;

/// Offset of the first kept frame when decimating.
pub const SKIP_OFFSET: usize = 0;

/// Capacity of the batch queue between loader workers and the consumer.
///
/// This is the only backpressure bound: workers block once this many
/// batches are waiting.
pub const QUEUE_CACHE: usize = 10;

/// Number of loader worker threads.
pub const IO_THREAD_NUM: usize = 1;

/// Interval at which an idle worker re-checks the package store while the
/// builder is still producing.
pub const POLL_INTERVAL_MS: u64 = 50;

/// Criterion tag used when none is configured.
pub const CRITERION: &str = "ce";
