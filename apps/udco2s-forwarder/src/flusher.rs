use crate::buffer::{AppendOutcome, SampleBuffer};
use crate::metric::{expand_samples, MetricTemplate};
use crate::sample::Sample;
use crate::sink::{MetricSink, SinkError};
use crate::stats::{ForwarderStats, StatsSnapshot};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;

/// Exponential retry delay: `initial`, doubling per consecutive failure, capped at `max`.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl RetryBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Owns the sample buffer and moves its contents to a [`MetricSink`].
///
/// The agent loop calls [`Flusher::submit`] from its own thread. Reaching the
/// buffer threshold spawns a flush task on the runtime without waiting for it.
/// At most one flush task runs at a time; it keeps retrying with backoff until
/// the sink accepts a batch, and picks up whatever accumulated in between.
pub struct Flusher<S> {
    buffer: SampleBuffer,
    sink: S,
    template: MetricTemplate,
    stats: ForwarderStats,
    backoff: Mutex<RetryBackoff>,
    in_flight: AtomicBool,
    runtime: Handle,
}

impl<S: MetricSink> Flusher<S> {
    pub fn new(
        buffer: SampleBuffer,
        sink: S,
        template: MetricTemplate,
        backoff: RetryBackoff,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer,
            sink,
            template,
            stats: ForwarderStats::new(),
            backoff: Mutex::new(backoff),
            in_flight: AtomicBool::new(false),
            runtime,
        })
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> &ForwarderStats {
        &self.stats
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.buffer.len(), self.in_flight())
    }

    pub fn submit(self: &Arc<Self>, sample: Sample) -> AppendOutcome {
        self.stats.samples_parsed.fetch_add(1, Ordering::Relaxed);
        let outcome = self.buffer.append(sample);
        self.stats.record_dropped(outcome.dropped);
        if outcome.threshold_reached {
            self.trigger();
        }
        outcome
    }

    /// Starts a flush task unless one is already running. Returns whether a
    /// task was spawned.
    pub fn trigger(self: &Arc<Self>) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("flush already in flight");
            return false;
        }
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            this.run().await;
        });
        true
    }

    async fn run(self: Arc<Self>) {
        loop {
            match self.flush_once().await {
                Ok(_) => {
                    self.reset_backoff();
                    break;
                }
                Err(err) => {
                    let delay = self.next_retry_delay();
                    tracing::warn!(
                        error = %err,
                        buffered = self.buffer.len(),
                        retry_in_ms = delay.as_millis() as u64,
                        "metrics flush failed; keeping samples for retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        self.in_flight.store(false, Ordering::Release);

        // Samples that crossed the threshold while we were busy didn't get their own task.
        if self.buffer.threshold_reached() {
            self.trigger();
        }
    }

    /// Sends everything currently buffered as one batch. Returns the number of
    /// samples delivered; on failure the batch is back in the buffer.
    pub async fn flush_once(&self) -> Result<usize, SinkError> {
        let batch = self.buffer.take();
        if batch.is_empty() {
            return Ok(0);
        }

        let metrics = expand_samples(&batch, &self.template);
        match self.sink.publish(&metrics).await {
            Ok(()) => {
                self.stats
                    .record_flush_ok(metrics.len(), Utc::now().timestamp());
                tracing::debug!(samples = batch.len(), metrics = metrics.len(), "flushed samples");
                Ok(batch.len())
            }
            Err(err) => {
                self.stats.record_flush_failed(err.to_string());
                let dropped = self.buffer.restore(batch);
                self.stats.record_dropped(dropped);
                Err(err)
            }
        }
    }

    /// Best-effort flush before exit, bounded by `timeout`. Skipped when a
    /// flush task already owns the in-flight slot.
    pub async fn final_flush(&self, timeout: Duration) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!(buffered = self.buffer.len(), "flush in flight at shutdown; not waiting");
            return;
        }

        let batch = self.buffer.take();
        if batch.is_empty() {
            self.in_flight.store(false, Ordering::Release);
            return;
        }

        let samples = batch.len();
        let metrics = expand_samples(&batch, &self.template);
        match tokio::time::timeout(timeout, self.sink.publish(&metrics)).await {
            Ok(Ok(())) => {
                self.stats
                    .record_flush_ok(metrics.len(), Utc::now().timestamp());
                tracing::info!(samples, "flushed remaining samples");
            }
            Ok(Err(err)) => {
                self.stats.record_flush_failed(err.to_string());
                self.stats.record_dropped(samples);
                tracing::warn!(error = %err, samples, "final flush failed; samples lost");
            }
            Err(_) => {
                self.stats.record_dropped(samples);
                tracing::warn!(samples, "final flush timed out; samples lost");
            }
        }
        self.in_flight.store(false, Ordering::Release);
    }

    fn next_retry_delay(&self) -> Duration {
        self.backoff
            .lock()
            .map(|mut backoff| backoff.next_delay())
            .unwrap_or(Duration::from_secs(1))
    }

    fn reset_backoff(&self) {
        if let Ok(mut backoff) = self.backoff.lock() {
            backoff.reset();
        }
    }
}
