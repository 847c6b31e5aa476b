//! Epoch controller: the public face of the loader.
//!
//! Owns the package builder thread, the loader worker pool and the batch
//! queue, counts worker sentinels to detect the end of an epoch, and
//! restarts the workers on reset.

use crate::config::LoaderConfig;
use crate::error::{Result, SeqfeedError};
use crate::io::{
    AlignmentMap, ArkReader, FeatureReader, ScpEntry, read_alignment, read_feature_scp,
    read_scp_index,
};
use crate::lattice::LatticeProvider;
use crate::pipeline::builder::{BuildSource, BuildSummary, PackageBuilder};
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::queue::{BatchConsumer, QueueItem, batch_queue};
use crate::pipeline::shaping::{Shaper, shaper_for};
use crate::pipeline::station::{RunnerContext, StationRunner};
use crate::pipeline::store::PackageStore;
use crate::pipeline::types::{Batch, FeatureDim};
use crate::pipeline::worker::{FrameSkip, LoaderStation, PackageLoader};
use crate::transform::FeatureTransform;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

const BUILDER_THREAD: &str = "seqfeed-builder";

/// Collects the loader's inputs and starts it.
pub struct BatchLoaderBuilder {
    config: LoaderConfig,
    feature_scp: Option<PathBuf>,
    feature_entries: Option<Vec<ScpEntry>>,
    alignment_file: Option<PathBuf>,
    alignments: Option<AlignmentMap>,
    lattice_scp: Option<PathBuf>,
    lattice_index: Option<HashMap<String, String>>,
    lattice_provider: Option<Arc<dyn LatticeProvider>>,
    transform: Option<Arc<dyn FeatureTransform>>,
    reader: Option<Arc<dyn FeatureReader>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl BatchLoaderBuilder {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            feature_scp: None,
            feature_entries: None,
            alignment_file: None,
            alignments: None,
            lattice_scp: None,
            lattice_index: None,
            lattice_provider: None,
            transform: None,
            reader: None,
            reporter: None,
        }
    }

    /// Feature index file (`utt_id path:offset` per line).
    pub fn feature_scp(mut self, path: impl Into<PathBuf>) -> Self {
        self.feature_scp = Some(path.into());
        self
    }

    /// Feature index given directly, instead of an scp file.
    pub fn feature_entries(mut self, entries: Vec<ScpEntry>) -> Self {
        self.feature_entries = Some(entries);
        self
    }

    /// Alignment file, optionally gzip-compressed.
    pub fn alignment_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.alignment_file = Some(path.into());
        self
    }

    pub fn alignments(mut self, alignments: AlignmentMap) -> Self {
        self.alignments = Some(alignments);
        self
    }

    /// Lattice index file. Enables lattice mode.
    pub fn lattice_scp(mut self, path: impl Into<PathBuf>) -> Self {
        self.lattice_scp = Some(path.into());
        self
    }

    /// Lattice index given directly (utterance id → scp line). Enables lattice mode.
    pub fn lattice_index(mut self, index: HashMap<String, String>) -> Self {
        self.lattice_index = Some(index);
        self
    }

    pub fn lattice_provider(mut self, provider: Arc<dyn LatticeProvider>) -> Self {
        self.lattice_provider = Some(provider);
        self
    }

    pub fn transform(mut self, transform: Arc<dyn FeatureTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Feature reader; defaults to [`ArkReader`].
    pub fn feature_reader(mut self, reader: Arc<dyn FeatureReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Error reporter; defaults to [`LogReporter`].
    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Validate inputs, load the indexes and start the first epoch.
    pub fn build(self) -> Result<BatchLoader> {
        self.config.validate()?;
        let transform = self.transform.ok_or(SeqfeedError::MissingFeatureTransform)?;

        let entries = match (self.feature_entries, self.feature_scp) {
            (Some(entries), _) => entries,
            (None, Some(path)) => {
                if !path.exists() {
                    return Err(SeqfeedError::FeatureIndexNotFound {
                        path: path.display().to_string(),
                    });
                }
                read_feature_scp(&path)?
            }
            (None, None) => {
                return Err(SeqfeedError::MissingInput {
                    what: "feature index".to_string(),
                });
            }
        };

        let alignments = match (self.alignments, self.alignment_file) {
            (Some(alignments), _) => alignments,
            (None, Some(path)) => {
                if !path.exists() {
                    return Err(SeqfeedError::AlignmentNotFound {
                        path: path.display().to_string(),
                    });
                }
                read_alignment(&path)?
            }
            (None, None) => {
                return Err(SeqfeedError::MissingInput {
                    what: "alignments".to_string(),
                });
            }
        };

        let lattice_index = match (self.lattice_index, self.lattice_scp) {
            (Some(index), _) => Some(index),
            (None, Some(path)) => {
                if !path.exists() {
                    return Err(SeqfeedError::LatticeIndexNotFound {
                        path: path.display().to_string(),
                    });
                }
                Some(read_scp_index(&path)?)
            }
            (None, None) => None,
        };
        if lattice_index.is_some() && self.lattice_provider.is_none() {
            return Err(SeqfeedError::MissingInput {
                what: "lattice provider".to_string(),
            });
        }

        let criterion = self.config.criterion;
        let (input_dim, output_dim) = (transform.input_dim(), transform.output_dim());
        if criterion.shaping().is_conv() && (input_dim == 0 || output_dim % input_dim != 0) {
            return Err(SeqfeedError::ConfigInvalidValue {
                key: "criterion".to_string(),
                message: format!(
                    "convolutional reshape needs the transform output dim ({}) to be a multiple of its input dim ({})",
                    output_dim, input_dim
                ),
            });
        }

        log::info!(
            "loader: {} utterances, {} alignments, criterion '{}', {} streams, {} workers",
            entries.len(),
            alignments.len(),
            criterion,
            self.config.batch_size,
            self.config.io_thread_num
        );

        let (_, consumer) = batch_queue(self.config.queue_cache, self.config.poll_interval());
        let reader: Arc<dyn FeatureReader> = match self.reader {
            Some(reader) => reader,
            None => Arc::new(ArkReader::new()),
        };
        let reporter: Arc<dyn ErrorReporter> = match self.reporter {
            Some(reporter) => reporter,
            None => Arc::new(LogReporter),
        };
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut loader = BatchLoader {
            shaper: Arc::from(shaper_for(criterion, &self.config, input_dim, output_dim)),
            skip: FrameSkip::new(self.config.skip_frame, self.config.effective_skip_offset()),
            shuffle: self.config.shuffle,
            config: self.config,
            source: Arc::new(BuildSource {
                entries,
                alignments,
                lattice_index,
            }),
            reader,
            transform,
            lattices: self.lattice_provider,
            reporter,
            store: Arc::new(PackageStore::new()),
            builder: None,
            builder_cancel: Arc::new(AtomicBool::new(false)),
            summary: None,
            workers: Vec::new(),
            worker_cancel: Arc::new(AtomicBool::new(false)),
            consumer,
            rng,
            sentinels: 0,
            finished: false,
            poisoned: None,
            epoch: 0,
        };
        loader.start_builder()?;
        loader.start_workers()?;
        Ok(loader)
    }
}

/// Streaming, epoch-aware batch loader.
///
/// Batches come out of [`get_input`](Self::get_input) until it returns
/// `Ok(None)`, which happens exactly once per epoch. [`reset`](Self::reset)
/// then replays the package store, optionally shuffled.
///
/// With more than one worker, batches of different packages interleave;
/// [`Batch::package`] and [`Batch::slice`] identify where each came from.
pub struct BatchLoader {
    config: LoaderConfig,
    source: Arc<BuildSource>,
    reader: Arc<dyn FeatureReader>,
    transform: Arc<dyn FeatureTransform>,
    lattices: Option<Arc<dyn LatticeProvider>>,
    reporter: Arc<dyn ErrorReporter>,
    shaper: Arc<dyn Shaper>,
    store: Arc<PackageStore>,
    builder: Option<JoinHandle<BuildSummary>>,
    builder_cancel: Arc<AtomicBool>,
    summary: Option<BuildSummary>,
    workers: Vec<StationRunner<LoaderStation>>,
    worker_cancel: Arc<AtomicBool>,
    consumer: BatchConsumer,
    skip: FrameSkip,
    shuffle: bool,
    rng: StdRng,
    sentinels: usize,
    finished: bool,
    poisoned: Option<String>,
    epoch: usize,
}

impl BatchLoader {
    pub fn builder(config: LoaderConfig) -> BatchLoaderBuilder {
        BatchLoaderBuilder::new(config)
    }

    /// Next batch of the current epoch.
    ///
    /// Returns `Ok(None)` once every worker has reported exhaustion, and keeps
    /// returning it until [`reset`](Self::reset). A fatal worker error is
    /// returned once as-is; afterwards the loader reports
    /// [`SeqfeedError::PipelineFailed`] until reset.
    pub fn get_input(&mut self) -> Result<Option<Batch>> {
        if let Some(message) = &self.poisoned {
            return Err(SeqfeedError::PipelineFailed {
                message: message.clone(),
            });
        }
        if self.finished {
            return Ok(None);
        }

        loop {
            match self.consumer.get() {
                Some(QueueItem::Batch(batch)) => return Ok(Some(batch)),
                Some(QueueItem::Exhausted) => {
                    self.sentinels += 1;
                    if self.sentinels >= self.config.io_thread_num {
                        self.finished = true;
                        log::info!("epoch {} finished", self.epoch);
                        return Ok(None);
                    }
                }
                Some(QueueItem::Failed(error)) => return Err(self.poison(error)),
                None => {
                    // Every worker is gone without its sentinel
                    let error = self.join_input().err().unwrap_or_else(|| {
                        SeqfeedError::PipelineFailed {
                            message: "loader workers exited before the epoch ended".to_string(),
                        }
                    });
                    return Err(self.poison(error));
                }
            }
        }
    }

    fn poison(&mut self, error: SeqfeedError) -> SeqfeedError {
        let message = match &error {
            SeqfeedError::PipelineFailed { message } => message.clone(),
            other => other.to_string(),
        };
        self.poisoned = Some(message);
        error
    }

    /// Start the next epoch.
    ///
    /// Stops the current workers (discarding anything still queued), rewinds
    /// the store and starts a fresh worker pool. `skip_offset` is taken
    /// modulo `skip_frame`. Shuffling is sticky: once requested, or enabled
    /// in the config, every later reset shuffles too, but only once the
    /// store is complete.
    pub fn reset(&mut self, shuffle: bool, skip_offset: usize) -> Result<()> {
        self.stop_workers();

        self.skip = FrameSkip::new(self.config.skip_frame, skip_offset);
        self.store.rewind();
        self.sentinels = 0;
        self.finished = false;
        self.poisoned = None;
        self.epoch += 1;

        self.shuffle = self.shuffle || shuffle;
        if self.shuffle {
            if self.store.shuffle(&mut self.rng) {
                log::info!("reset epoch {} and shuffled {} packages", self.epoch, self.store.len());
            } else {
                log::info!("reset epoch {}; store incomplete, order kept", self.epoch);
            }
        } else {
            log::info!("reset epoch {}", self.epoch);
        }

        self.start_workers()
    }

    /// Block until every worker thread of the current epoch has exited.
    ///
    /// Returns the first worker panic, if any.
    pub fn join_input(&mut self) -> Result<()> {
        let mut first_error = None;
        for runner in self.workers.drain(..) {
            if let Err(e) = runner.join() {
                log::error!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Block until the package builder has finished this generation.
    pub fn join_builder(&mut self) -> Result<BuildSummary> {
        if let Some(handle) = self.builder.take() {
            let summary = handle.join().map_err(|_| SeqfeedError::WorkerPanicked {
                name: BUILDER_THREAD.to_string(),
            })?;
            self.summary = Some(summary);
        }
        self.summary.ok_or_else(|| SeqfeedError::PipelineFailed {
            message: "package builder never ran".to_string(),
        })
    }

    /// Discard the store and rebuild it from the index with a new builder.
    pub fn rebuild(&mut self) -> Result<()> {
        self.stop_workers();
        self.stop_builder();
        self.store.clear();
        self.sentinels = 0;
        self.finished = false;
        self.poisoned = None;
        self.epoch += 1;
        self.start_builder()?;
        self.start_workers()
    }

    /// Input dimension the network sees.
    pub fn output_dim(&self) -> FeatureDim {
        let (input, output) = (self.transform.input_dim(), self.transform.output_dim());
        if self.config.criterion.shaping().is_conv() {
            FeatureDim::Conv {
                context: output / input.max(1),
                base: input,
            }
        } else {
            FeatureDim::Flat(output)
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Number of resets and rebuilds so far.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    pub fn store_complete(&self) -> bool {
        self.store.is_complete()
    }

    /// Sentinels counted in the current epoch.
    pub fn sentinels_seen(&self) -> usize {
        self.sentinels
    }

    /// Items currently waiting in the batch queue.
    pub fn queued(&self) -> usize {
        self.consumer.len()
    }

    /// Build indices of the stored packages in replay order.
    pub fn package_order(&self) -> Vec<usize> {
        self.store.package_order()
    }

    pub fn skip_offset(&self) -> usize {
        self.skip.offset()
    }

    fn start_builder(&mut self) -> Result<()> {
        self.builder_cancel = Arc::new(AtomicBool::new(false));
        let builder = PackageBuilder::new(
            self.source.clone(),
            self.reader.clone(),
            self.reporter.clone(),
            &self.config,
        );
        self.builder = Some(builder.spawn(self.store.clone(), self.builder_cancel.clone())?);
        self.summary = None;
        log::info!("package builder started");
        Ok(())
    }

    fn start_workers(&mut self) -> Result<()> {
        let (producer, consumer) =
            batch_queue(self.config.queue_cache, self.config.poll_interval());
        self.consumer = consumer;
        self.worker_cancel = Arc::new(AtomicBool::new(false));

        let context = RunnerContext {
            store: self.store.clone(),
            producer,
            cancel: self.worker_cancel.clone(),
            reporter: self.reporter.clone(),
            poll_interval: self.config.poll_interval(),
        };
        for i in 0..self.config.io_thread_num {
            let loader = PackageLoader::new(
                self.reader.clone(),
                self.transform.clone(),
                self.lattices.clone(),
                self.skip,
                self.config.criterion.decimates_labels(),
            );
            let station = LoaderStation::new(loader, self.shaper.clone());
            let runner =
                StationRunner::spawn(station, format!("seqfeed-loader-{}", i), context.clone())?;
            self.workers.push(runner);
        }
        log::info!(
            "started {} loader worker(s) for epoch {} ({} policy)",
            self.workers.len(),
            self.epoch,
            self.shaper.name()
        );
        Ok(())
    }

    fn stop_workers(&mut self) {
        self.worker_cancel.store(true, Ordering::Release);
        self.store.wake_all();
        if let Err(e) = self.join_input() {
            log::error!("loader worker failed during shutdown: {}", e);
        }
        let dropped = self.consumer.drain();
        if dropped > 0 {
            log::debug!("discarded {} queued item(s)", dropped);
        }
    }

    fn stop_builder(&mut self) {
        self.builder_cancel.store(true, Ordering::Release);
        if let Some(handle) = self.builder.take()
            && handle.join().is_err()
        {
            log::error!("{} thread panicked", BUILDER_THREAD);
        }
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        self.stop_workers();
        self.stop_builder();
    }
}
