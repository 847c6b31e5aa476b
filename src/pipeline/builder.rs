//! Package builder: filters utterances and groups them into packages.
//!
//! Runs once per store generation on its own thread and is the only writer
//! to the store's append end.

use crate::config::LoaderConfig;
use crate::criterion::Objective;
use crate::error::Result;
use crate::io::{AlignmentMap, FeatureReader, ScpEntry};
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::store::PackageStore;
use crate::pipeline::types::Package;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;

const STATION_NAME: &str = "builder";

/// Everything the builder scans, loaded before it starts.
#[derive(Debug, Clone, Default)]
pub struct BuildSource {
    /// Feature index in file order.
    pub entries: Vec<ScpEntry>,
    pub alignments: AlignmentMap,
    /// Utterance id → lattice scp line. `None` disables lattice mode.
    pub lattice_index: Option<HashMap<String, String>>,
}

/// Why an utterance was left out of the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("{frames} frames exceed the limit of {max} after skipping")]
    OverLength { frames: usize, max: usize },

    #[error("no alignment")]
    NoAlignment,

    #[error("no lattice")]
    NoLattice,

    #[error("feature length {frames} and label length {labels} differ")]
    LengthMismatch { frames: usize, labels: usize },

    #[error("{frames} frames are too few for {labels} labels")]
    TooShortForLabels { frames: usize, labels: usize },

    #[error("unreadable features: {0}")]
    Unreadable(String),
}

/// An utterance that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    pub labels: Vec<i32>,
    pub lattice: Option<String>,
}

/// Counters for one builder run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub scanned: usize,
    pub accepted: usize,
    pub skipped: usize,
    pub packages: usize,
    /// Streams filled by duplicating the first stream of the last package.
    pub padded: usize,
    pub cancelled: bool,
}

pub struct PackageBuilder {
    source: Arc<BuildSource>,
    reader: Arc<dyn FeatureReader>,
    reporter: Arc<dyn ErrorReporter>,
    nstreams: usize,
    max_input_seq_length: usize,
    skip_frame: usize,
    objective: Objective,
}

impl PackageBuilder {
    pub fn new(
        source: Arc<BuildSource>,
        reader: Arc<dyn FeatureReader>,
        reporter: Arc<dyn ErrorReporter>,
        config: &LoaderConfig,
    ) -> Self {
        Self {
            source,
            reader,
            reporter,
            nstreams: config.batch_size.max(1),
            max_input_seq_length: config.max_input_seq_length,
            skip_frame: config.skip_frame.max(1),
            objective: config.criterion.objective(),
        }
    }

    /// Check one utterance, returning its (possibly trimmed) labels.
    pub fn admit(&self, entry: &ScpEntry) -> std::result::Result<Admitted, SkipReason> {
        let frames = self
            .reader
            .frame_count(entry)
            .map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        log::debug!("{} has {} frames", entry.utt_id, frames);

        if frames / self.skip_frame + 1 > self.max_input_seq_length {
            return Err(SkipReason::OverLength {
                frames,
                max: self.max_input_seq_length,
            });
        }

        let labels = self
            .source
            .alignments
            .get(&entry.utt_id)
            .ok_or(SkipReason::NoAlignment)?;

        let lattice = match &self.source.lattice_index {
            Some(index) => Some(
                index
                    .get(&entry.utt_id)
                    .cloned()
                    .ok_or(SkipReason::NoLattice)?,
            ),
            None => None,
        };

        let labels = if self.objective.is_frame_synchronous() {
            match labels.len() {
                n if n == frames => labels.clone(),
                // Forced alignments sometimes carry one extra trailing label
                n if n == frames + 1 => labels[..frames].to_vec(),
                n => return Err(SkipReason::LengthMismatch { frames, labels: n }),
            }
        } else {
            if frames + 1 < 2 * labels.len() {
                return Err(SkipReason::TooShortForLabels {
                    frames,
                    labels: labels.len(),
                });
            }
            labels.clone()
        };

        Ok(Admitted { labels, lattice })
    }

    /// Scan the whole index into `store`, then mark it complete.
    ///
    /// A raised `cancel` stops the scan early; the store is then left
    /// incomplete.
    pub fn run(&self, store: &PackageStore, cancel: &AtomicBool) -> BuildSummary {
        let start = Instant::now();
        let mut summary = BuildSummary::default();
        let mut pending = PendingPackage::new(self.nstreams, self.source.lattice_index.is_some());
        log::info!(
            "building packages of {} streams from {} utterances",
            self.nstreams,
            self.source.entries.len()
        );

        for entry in &self.source.entries {
            if cancel.load(Ordering::Acquire) {
                log::info!("package builder cancelled after {} utterances", summary.scanned);
                summary.cancelled = true;
                return summary;
            }
            summary.scanned += 1;

            match self.admit(entry) {
                Ok(admitted) => {
                    summary.accepted += 1;
                    pending.add(entry.clone(), admitted);
                    if pending.is_full() {
                        store.push(pending.take());
                        summary.packages += 1;
                    }
                }
                Err(reason) => {
                    summary.skipped += 1;
                    self.reporter.report(
                        STATION_NAME,
                        &StationError::Recoverable(format!("skip {}: {}", entry.utt_id, reason)),
                    );
                }
            }
        }

        let last = if pending.is_empty() {
            None
        } else {
            summary.padded = pending.pad();
            summary.packages += 1;
            Some(pending.take())
        };
        store.finish(last);

        log::info!(
            "package builder done in {:.3}s: {} packages, {} accepted, {} skipped",
            start.elapsed().as_secs_f64(),
            summary.packages,
            summary.accepted,
            summary.skipped
        );
        summary
    }

    /// Run on a dedicated thread.
    ///
    /// If the thread panics the store is aborted, so waiting workers fail
    /// instead of hanging.
    pub fn spawn(
        self,
        store: Arc<PackageStore>,
        cancel: Arc<AtomicBool>,
    ) -> Result<JoinHandle<BuildSummary>> {
        let handle = thread::Builder::new()
            .name("seqfeed-builder".to_string())
            .spawn(move || {
                let guard = AbortOnPanic(&store);
                let summary = self.run(&store, &cancel);
                drop(guard);
                summary
            })?;
        Ok(handle)
    }
}

struct AbortOnPanic<'a>(&'a PackageStore);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort("package builder panicked");
        }
    }
}

/// Accumulator for the package being filled.
struct PendingPackage {
    nstreams: usize,
    features: Vec<ScpEntry>,
    labels: Vec<Vec<i32>>,
    lattices: Option<Vec<String>>,
}

impl PendingPackage {
    fn new(nstreams: usize, with_lattices: bool) -> Self {
        Self {
            nstreams,
            features: Vec::with_capacity(nstreams),
            labels: Vec::with_capacity(nstreams),
            lattices: with_lattices.then(Vec::new),
        }
    }

    fn add(&mut self, entry: ScpEntry, admitted: Admitted) {
        self.features.push(entry);
        self.labels.push(admitted.labels);
        if let (Some(lattices), Some(line)) = (self.lattices.as_mut(), admitted.lattice) {
            lattices.push(line);
        }
    }

    fn is_full(&self) -> bool {
        self.features.len() >= self.nstreams
    }

    fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Fill up to `nstreams` by repeating stream 0. Returns the number added.
    fn pad(&mut self) -> usize {
        let missing = self.nstreams.saturating_sub(self.features.len());
        for _ in 0..missing {
            self.features.push(self.features[0].clone());
            self.labels.push(self.labels[0].clone());
            if let Some(lattices) = self.lattices.as_mut() {
                lattices.push(lattices[0].clone());
            }
        }
        missing
    }

    fn take(&mut self) -> Package {
        Package {
            index: 0,
            features: std::mem::take(&mut self.features),
            labels: std::mem::take(&mut self.labels),
            lattices: self.lattices.as_mut().map(std::mem::take),
        }
    }
}
