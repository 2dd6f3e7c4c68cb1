//! Scan session control: one active scan at a time, progress throttling and
//! cancellation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SpecError;
use crate::events::EventSink;
use crate::ports;
use crate::probe::ProbeSet;
use crate::raw;
use crate::scanner::run_dispatch;
use crate::targets;
use crate::tasks::TaskSpace;
use crate::types::{ProbeResult, ScanOutcome, ScanRequest};

/// Minimum progress advance, in percentage points, between two emissions.
pub const PROGRESS_STEP: f64 = 1.0;
/// Maximum quiet period between two emissions while results keep arriving.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Decides when a progress notification is due.
///
/// Emits when progress advanced by at least [`PROGRESS_STEP`] or
/// [`PROGRESS_INTERVAL`] elapsed since the last emission, and always for the
/// final task.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    total: u64,
    finished: u64,
    last_progress: f64,
    last_update: Instant,
}

impl ProgressThrottle {
    pub fn new(total: u64, now: Instant) -> Self {
        Self {
            total,
            finished: 0,
            last_progress: 0.0,
            last_update: now,
        }
    }

    /// Count one finished task; returns the progress to emit, if any.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.finished += 1;
        if self.total == 0 {
            return None;
        }
        let progress = (self.finished as f64 * 100.0 / self.total as f64).min(100.0);
        let last_task = self.finished >= self.total;
        if last_task
            || progress - self.last_progress >= PROGRESS_STEP
            || now.saturating_duration_since(self.last_update) >= PROGRESS_INTERVAL
        {
            self.last_progress = progress;
            self.last_update = now;
            return Some(progress);
        }
        None
    }

    pub fn finished(&self) -> u64 {
        self.finished
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// State of the scan currently driven by a controller.
#[derive(Debug)]
pub struct ScanSession {
    pub id: u64,
    pub progress: ProgressThrottle,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct ActiveScan {
    id: u64,
    cancel: CancellationToken,
}

/// Owns at most one active scan and pushes its events to a sink.
pub struct ScanController {
    sink: Arc<dyn EventSink>,
    probes: ProbeSet,
    active: Mutex<Option<ActiveScan>>,
    next_id: AtomicU64,
}

impl ScanController {
    /// Controller with connect probing and nmap-backed raw probing.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_probes(sink, ProbeSet::default())
    }

    pub fn with_probes(sink: Arc<dyn EventSink>, probes: ProbeSet) -> Self {
        Self {
            sink,
            probes,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// True iff this process may use raw probing.
    pub fn check_permission(&self) -> bool {
        raw::check_permission().is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.lock_active().is_some()
    }

    /// Run one scan to its terminal outcome, cancelling any scan already active.
    ///
    /// Results and progress are pushed to the sink as they arrive. A malformed
    /// address or port specification produces a single result carrying the
    /// error text and completes without probing.
    pub async fn run_scan(&self, request: &ScanRequest) -> ScanOutcome {
        self.run_scan_with_sink(request, Arc::clone(&self.sink)).await
    }

    /// Like [`run_scan`](Self::run_scan), but this scan's results, progress and
    /// stragglers go to `sink` instead of the controller's own sink.
    ///
    /// The `cancelled` marker from [`cancel_scan`](Self::cancel_scan) still goes
    /// to the controller's sink.
    pub async fn run_scan_with_sink(
        &self,
        request: &ScanRequest,
        sink: Arc<dyn EventSink>,
    ) -> ScanOutcome {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let previous = self.lock_active().replace(ActiveScan {
            id,
            cancel: cancel.clone(),
        });
        if let Some(prev) = previous {
            info!(previous = prev.id, next = id, "cancelling active scan");
            prev.cancel.cancel();
        }

        let outcome = self.drive(id, request, cancel, sink).await;

        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
        outcome
    }

    /// Cancel the active scan, if any, and emit the `cancelled` marker result.
    ///
    /// Returns whether a scan was active.
    pub fn cancel_scan(&self) -> bool {
        let Some(active) = self.lock_active().take() else {
            return false;
        };
        info!(scan = active.id, "scan cancelled");
        active.cancel.cancel();
        self.sink.emit_result(ProbeResult::cancelled());
        true
    }

    async fn drive(
        &self,
        id: u64,
        request: &ScanRequest,
        cancel: CancellationToken,
        sink: Arc<dyn EventSink>,
    ) -> ScanOutcome {
        let space = match build_task_space(request) {
            Ok(space) => space,
            Err(entry) => {
                info!(scan = id, state = %entry.state, "rejected scan specification");
                sink.emit_result(entry);
                return ScanOutcome::ScanComplete;
            }
        };

        let mut session = ScanSession {
            id,
            progress: ProgressThrottle::new(space.len(), Instant::now()),
            cancel,
        };
        let probe = self.probes.select(request.use_raw);
        info!(
            scan = id,
            total = space.len(),
            threads = request.worker_count(),
            timeout_ms = request.timeout_ms,
            probe = probe.name(),
            "scan started"
        );

        let (tx, mut rx) = mpsc::channel(1);
        let dispatch = tokio::spawn(run_dispatch(
            Arc::new(space),
            probe,
            request.worker_count(),
            request.timeout(),
            session.cancel.clone(),
            tx,
        ));

        let cancelled = loop {
            tokio::select! {
                biased;
                _ = session.cancel.cancelled() => break true,
                next = rx.recv() => match next {
                    Some(result) => {
                        sink.emit_result(result);
                        if let Some(progress) = session.progress.record(Instant::now()) {
                            sink.emit_progress(progress);
                        }
                    }
                    None => break false,
                },
            }
        };

        if cancelled {
            info!(
                scan = session.id,
                finished = session.progress.finished(),
                total = session.progress.total(),
                "scan cancelled before completion"
            );
            // Probes already in flight may still deliver; forward them as stragglers.
            tokio::spawn(async move {
                let mut stragglers = 0u64;
                while let Some(result) = rx.recv().await {
                    stragglers += 1;
                    sink.emit_result(result);
                }
                if let Ok(stats) = dispatch.await {
                    debug!(stragglers, dispatched = stats.dispatched, "cancelled scan drained");
                }
            });
            return ScanOutcome::ScanCancelled;
        }

        if let Ok(stats) = dispatch.await {
            debug!(scan = session.id, dispatched = stats.dispatched, delivered = stats.delivered, "dispatch finished");
        }
        info!(scan = session.id, finished = session.progress.finished(), "scan complete");
        ScanOutcome::ScanComplete
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveScan>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Parse both specifications into a task space, or the synthetic result that
/// reports why they could not be parsed.
fn build_task_space(request: &ScanRequest) -> Result<TaskSpace, ProbeResult> {
    let segments = targets::parse_address_segments(&request.addresses)
        .map_err(|e| spec_error_entry(e.fragment(), &e))?;
    let ports = ports::parse_ports(&request.ports).map_err(|e| spec_error_entry("", &e))?;
    Ok(TaskSpace::new(segments, ports))
}

fn spec_error_entry(address: &str, err: &SpecError) -> ProbeResult {
    ProbeResult::new(address, 0, err.to_string())
}
