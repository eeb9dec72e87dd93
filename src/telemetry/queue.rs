//! Non-blocking telemetry handoff.
//!
//! [`QueuedSink`] moves network latency off the ingestion loop: `submit`
//! only enqueues, and a worker thread drains the queue into the wrapped sink.
//! The queue is bounded; when it is full the oldest pending report is
//! dropped to make room for the newest.

use super::{MetricsSink, TelemetryError, TelemetryReport};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Default)]
struct QueueCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Bounded, drop-oldest queue in front of another sink.
pub struct QueuedSink {
    sender: Option<Sender<TelemetryReport>>,
    /// Kept to evict the oldest report when the queue is full
    receiver: Receiver<TelemetryReport>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<QueueCounters>,
}

impl QueuedSink {
    /// Start a worker that delivers queued reports to `inner`.
    pub fn spawn(mut inner: Box<dyn MetricsSink>, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        let counters = Arc::new(QueueCounters::default());

        let worker_rx = receiver.clone();
        let worker_counters = Arc::clone(&counters);
        let worker = std::thread::spawn(move || {
            for report in worker_rx.iter() {
                match inner.submit(&report) {
                    Ok(()) => {
                        worker_counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            at = %report.timestamp,
                            "queued telemetry delivery failed: {e}"
                        );
                    }
                }
            }
            inner.close();
        });

        Self {
            sender: Some(sender),
            receiver,
            worker: Some(worker),
            counters,
        }
    }

    /// Reports delivered by the worker.
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Reports the worker failed to deliver.
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Reports evicted from a full queue.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Reports waiting for the worker.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl MetricsSink for QueuedSink {
    /// Enqueue a report. `Ok` means accepted for delivery, not delivered.
    fn submit(&self, report: &TelemetryReport) -> Result<(), TelemetryError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| TelemetryError::Client("telemetry queue closed".to_string()))?;

        let mut report = report.clone();
        loop {
            match sender.try_send(report) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) => {
                    if let Ok(oldest) = self.receiver.try_recv() {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            at = %oldest.timestamp,
                            "telemetry queue full, dropped oldest report"
                        );
                    }
                    report = returned;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(TelemetryError::Client(
                        "telemetry worker stopped".to_string(),
                    ))
                }
            }
        }
    }

    /// Stop accepting reports, drain the queue and wait for the worker.
    fn close(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("telemetry worker panicked");
            }
            tracing::info!(
                delivered = self.delivered(),
                failed = self.failed(),
                dropped = self.dropped(),
                "telemetry queue drained"
            );
        }
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        self.close();
    }
}
