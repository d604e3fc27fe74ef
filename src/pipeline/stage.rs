//! Generic bounded pipeline stage
//!
//! A stage owns a bounded output queue and a fixed pool of worker tasks.
//! Its driver pulls items from the input queue and hands each one to a
//! worker; workers write zero or more results straight into the output
//! queue. When the driver sees `EndOfStream` it stops pulling, waits for
//! every in-flight worker, then forwards exactly one `EndOfStream`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::config::StageConfig;
use crate::error::{PipelineError, Result};
use crate::model::StageItem;
use crate::pipeline::queue::{QueueReceiver, QueueSender, bounded};
use crate::utils::logging::{log_operation_complete, log_operation_start, log_warning};

/// Work performed on each item a stage receives
pub trait StageProcessor<I, O>: Send + Sync {
    /// Process one item into zero or more outputs
    fn process(&self, item: I) -> BoxFuture<'_, Result<Vec<O>>>;
}

/// Adapts a synchronous closure into a `StageProcessor`
pub struct FnProcessor<F>(pub F);

impl<I, O, F> StageProcessor<I, O> for FnProcessor<F>
where
    F: Fn(I) -> Result<Vec<O>> + Send + Sync,
    O: Send + 'static,
{
    fn process(&self, item: I) -> BoxFuture<'_, Result<Vec<O>>> {
        let result = (self.0)(item);
        Box::pin(async move { result })
    }
}

/// Counts reported by a stage once its driver returns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Stage name
    pub name: String,
    /// Data items taken from the input queue
    pub received: usize,
    /// Items written to the output queue
    pub emitted: usize,
    /// Items dropped by failing, panicking or timed-out workers
    pub dropped: usize,
    /// Whether the stage saw and forwarded end of stream
    pub completed: bool,
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: received {}, emitted {}, dropped {}{}",
            self.name,
            self.received,
            self.emitted,
            self.dropped,
            if self.completed { "" } else { " (incomplete)" }
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicUsize,
    emitted: AtomicUsize,
    dropped: AtomicUsize,
}

impl Counters {
    fn report(&self, name: &str, completed: bool) -> StageReport {
        StageReport {
            name: name.to_string(),
            received: self.received.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed,
        }
    }
}

/// A configured, not yet running stage
pub struct Stage<I, O> {
    name: Arc<str>,
    config: StageConfig,
    processor: Arc<dyn StageProcessor<I, O>>,
    output_tx: QueueSender<O>,
    output_rx: QueueReceiver<O>,
}

impl<I, O> Stage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Allocate the stage's output queue and size its worker pool
    pub fn configure(
        name: &str,
        config: StageConfig,
        processor: Arc<dyn StageProcessor<I, O>>,
    ) -> Result<Self> {
        config.validate(name)?;
        let (output_tx, output_rx) = bounded(config.queue_capacity)?;
        Ok(Self {
            name: Arc::from(name),
            config,
            processor,
            output_tx,
            output_rx,
        })
    }

    /// Stage name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launch the driver loop on `input`
    ///
    /// Returns the stage's output queue and a handle to the driver.
    ///
    /// # Errors
    /// Fails when no Tokio runtime is available to host the worker pool.
    pub fn start(self, input: QueueReceiver<I>) -> Result<(QueueReceiver<O>, StageDriver)> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(PipelineError::Resource(format!(
                "stage '{}' started outside a Tokio runtime",
                self.name
            )));
        }

        let Self {
            name,
            config,
            processor,
            output_tx,
            output_rx,
        } = self;

        let stage_name = name.to_string();
        let handle = tokio::spawn(drive(name, config, processor, input, output_tx));
        Ok((
            output_rx,
            StageDriver {
                name: stage_name,
                handle,
            },
        ))
    }
}

/// Handle to a running stage driver
#[derive(Debug)]
pub struct StageDriver {
    name: String,
    handle: JoinHandle<StageReport>,
}

impl StageDriver {
    /// Wait for the driver to return its report
    pub async fn join(self) -> Result<StageReport> {
        self.handle.await.map_err(|e| {
            PipelineError::Resource(format!("stage '{}' driver failed: {e}", self.name))
        })
    }
}

async fn drive<I, O>(
    name: Arc<str>,
    config: StageConfig,
    processor: Arc<dyn StageProcessor<I, O>>,
    mut input: QueueReceiver<I>,
    output: QueueSender<O>,
) -> StageReport
where
    I: Send + 'static,
    O: Send + 'static,
{
    let start = Instant::now();
    log_operation_start("Stage started", &name);

    let counters = Arc::new(Counters::default());
    let permits = Arc::new(Semaphore::new(config.workers));
    let mut in_flight = JoinSet::new();
    let mut saw_end = false;

    loop {
        match input.recv().await {
            Some(StageItem::Item(item)) => {
                counters.received.fetch_add(1, Ordering::Relaxed);

                // waits while every worker is busy
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                while let Some(finished) = in_flight.try_join_next() {
                    record_join(&name, &counters, finished);
                }

                in_flight.spawn(run_worker(
                    name.clone(),
                    processor.clone(),
                    item,
                    output.clone(),
                    config.task_timeout,
                    counters.clone(),
                    permit,
                ));
            }
            Some(StageItem::EndOfStream) => {
                saw_end = true;
                break;
            }
            None => {
                log_warning(
                    &format!("Stage '{name}' input closed without end of stream"),
                    None,
                );
                break;
            }
        }
    }

    while let Some(finished) = in_flight.join_next().await {
        record_join(&name, &counters, finished);
    }

    // Without an upstream end marker the run is incomplete; closing the
    // queue without forwarding one lets the consumer see that.
    if saw_end {
        if let Err(e) = output.send_end().await {
            log::error!("Stage '{name}' could not forward end of stream: {e}");
        }
    }

    let report = counters.report(&name, saw_end);
    log_operation_complete("processed", &name, report.received, Some(start.elapsed()));
    report
}

fn record_join(name: &str, counters: &Counters, finished: std::result::Result<(), JoinError>) {
    if let Err(e) = finished {
        log::error!("Stage '{name}' worker panicked, item dropped: {e}");
        counters.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

async fn run_worker<I, O>(
    name: Arc<str>,
    processor: Arc<dyn StageProcessor<I, O>>,
    item: I,
    output: QueueSender<O>,
    timeout: Option<Duration>,
    counters: Arc<Counters>,
    _permit: OwnedSemaphorePermit,
) {
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, processor.process(item))
            .await
            .unwrap_or(Err(PipelineError::Timeout(limit))),
        None => processor.process(item).await,
    };

    match result {
        Ok(outputs) => {
            for out in outputs {
                if let Err(e) = output.send(out).await {
                    log::error!("Stage '{name}' worker cannot deliver downstream: {e}");
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                counters.emitted.fetch_add(1, Ordering::Relaxed);
            }
        }
        Err(e) => {
            log::warn!("Stage '{name}' dropped an item: {e}");
            counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
