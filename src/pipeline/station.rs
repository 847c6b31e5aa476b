//! Core station abstraction and the runner that feeds stations from the
//! package store.

use crate::error::{Result, SeqfeedError};
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::queue::{BatchProducer, QueueItem};
use crate::pipeline::store::{Claim, PackageStore};
use crate::pipeline::types::{Batch, Package};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A processing station in the pipeline.
///
/// Each station receives input, processes it, and produces output.
/// Stations run in their own threads.
pub trait Station: Send + 'static {
    /// The input type this station receives.
    type Input: Send + 'static;
    /// The output type this station produces.
    type Output: Send + 'static;

    /// Processes a single input item.
    ///
    /// Returns:
    /// - `Ok(Some(output))` - Successfully processed and produced output
    /// - `Ok(None)` - Successfully processed but no output
    /// - `Err(StationError)` - Processing failed
    fn process(&mut self, input: Self::Input) -> std::result::Result<Option<Self::Output>, StationError>;

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called when the station is shutting down.
    fn shutdown(&mut self) {}
}

/// How a runner's thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Found the store exhausted and pushed its sentinel.
    Exhausted,
    /// Pushed a fatal error instead of a sentinel.
    Failed,
    /// Cancelled, or the consumer went away.
    Stopped,
}

/// Shared handles a runner needs besides its station.
#[derive(Clone)]
pub struct RunnerContext {
    pub store: Arc<PackageStore>,
    pub producer: BatchProducer,
    pub cancel: Arc<AtomicBool>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub poll_interval: Duration,
}

/// Runs a package-consuming station in a dedicated thread.
///
/// The thread claims packages until the store is exhausted, pushes every
/// batch the station produces, and finishes with exactly one sentinel, or
/// with a `Failed` item if the station hits a fatal error.
pub struct StationRunner<S: Station> {
    handle: Option<JoinHandle<WorkerExit>>,
    thread_name: String,
    _phantom: PhantomData<S>,
}

impl<S> StationRunner<S>
where
    S: Station<Input = Arc<Package>, Output = Vec<Batch>>,
{
    /// Spawns `station` on a thread named `thread_name`.
    pub fn spawn(station: S, thread_name: String, context: RunnerContext) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut station = station;
                Self::run_station(&mut station, &context)
            })?;

        Ok(Self {
            handle: Some(handle),
            thread_name,
            _phantom: PhantomData,
        })
    }

    /// Main processing loop for the station.
    fn run_station(station: &mut S, context: &RunnerContext) -> WorkerExit {
        let station_name = station.name();
        let cancel = context.cancel.as_ref();
        log::debug!("{} worker started", station_name);

        let exit = loop {
            match context.store.claim_wait(context.poll_interval, cancel) {
                Claim::Ready(package) => {
                    let index = package.index;
                    match station.process(package) {
                        Ok(Some(batches)) => {
                            let mut delivered = true;
                            for batch in batches {
                                if !context.producer.put(QueueItem::Batch(batch), cancel) {
                                    delivered = false;
                                    break;
                                }
                            }
                            if !delivered {
                                break WorkerExit::Stopped;
                            }
                        }
                        Ok(None) => {}
                        Err(error @ StationError::Recoverable(_)) => {
                            // Report but continue processing
                            context.reporter.report(station_name, &error);
                        }
                        Err(StationError::Fatal(msg)) => {
                            let message = format!("package {}: {}", index, msg);
                            context
                                .reporter
                                .report(station_name, &StationError::Fatal(message.clone()));
                            context.producer.put(
                                QueueItem::Failed(SeqfeedError::PipelineFailed { message }),
                                cancel,
                            );
                            break WorkerExit::Failed;
                        }
                    }
                }
                Claim::Exhausted => {
                    if context.producer.put(QueueItem::Exhausted, cancel) {
                        break WorkerExit::Exhausted;
                    }
                    break WorkerExit::Stopped;
                }
                Claim::Aborted(reason) => {
                    context
                        .reporter
                        .report(station_name, &StationError::Fatal(reason.clone()));
                    context.producer.put(
                        QueueItem::Failed(SeqfeedError::PipelineFailed { message: reason }),
                        cancel,
                    );
                    break WorkerExit::Failed;
                }
                Claim::Pending => break WorkerExit::Stopped,
            }
        };

        // Cleanup on shutdown
        station.shutdown();
        log::debug!("{} worker exiting: {:?}", station_name, exit);
        exit
    }

    /// Waits for the station thread to complete.
    pub fn join(mut self) -> Result<WorkerExit> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| SeqfeedError::WorkerPanicked {
                name: self.thread_name.clone(),
            }),
            None => Ok(WorkerExit::Stopped),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Returns the name of the runner's thread.
    pub fn name(&self) -> &str {
        &self.thread_name
    }
}
