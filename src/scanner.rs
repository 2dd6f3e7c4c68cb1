use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::probe::Probe;
use crate::tasks::{Task, TaskSpace};
use crate::types::{ProbeResult, MAX_THREADS};

/// Counters reported once every worker has exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Tasks handed to the worker queue.
    pub dispatched: u64,
    /// Results accepted by the consumer.
    pub delivered: u64,
}

/// Probe every task in `space` with up to `threads` probes in flight, sending
/// one result per dispatched task to `results`.
///
/// - Tasks are queued in generator order through a queue of depth `threads`;
///   the dispatcher waits while the queue is full.
/// - Each of the `threads` workers pulls a task, probes it, then waits until
///   the consumer accepts the result.
/// - `cancel` stops new task pickup and pending deliveries. Probes already
///   running finish on their own timeout.
///
/// Returns only after every worker has exited, so when the last clone of
/// `results` is dropped the consumer has seen every delivered result.
pub async fn run_dispatch(
    space: Arc<TaskSpace>,
    probe: Arc<dyn Probe>,
    threads: usize,
    timeout: Duration,
    cancel: CancellationToken,
    results: mpsc::Sender<ProbeResult>,
) -> DispatchStats {
    let threads = threads.clamp(1, MAX_THREADS);
    let (task_tx, task_rx) = mpsc::channel::<Task>(threads);
    let task_rx = Arc::new(Mutex::new(task_rx));

    let mut set = JoinSet::new();
    for worker in 0..threads {
        set.spawn(run_worker(
            worker,
            task_rx.clone(),
            probe.clone(),
            timeout,
            cancel.clone(),
            results.clone(),
        ));
    }
    drop(results);

    let dispatcher = tokio::spawn(dispatch_tasks(space, task_tx, cancel.clone()));

    let mut stats = DispatchStats::default();
    while let Some(res) = set.join_next().await {
        match res {
            Ok(delivered) => stats.delivered += delivered,
            Err(e) => warn!(error = %e, "worker task failed"),
        }
    }
    stats.dispatched = match dispatcher.await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "dispatcher task failed");
            0
        }
    };
    debug!(
        dispatched = stats.dispatched,
        delivered = stats.delivered,
        cancelled = cancel.is_cancelled(),
        "all workers joined"
    );
    stats
}

async fn dispatch_tasks(
    space: Arc<TaskSpace>,
    task_tx: mpsc::Sender<Task>,
    cancel: CancellationToken,
) -> u64 {
    let mut sent = 0u64;
    for task in space.iter() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = task_tx.send(task) => {
                if res.is_err() {
                    break;
                }
            }
        }
        sent += 1;
    }
    // Dropping the sender lets idle workers observe the end of the queue.
    sent
}

async fn run_worker(
    worker: usize,
    tasks: Arc<Mutex<mpsc::Receiver<Task>>>,
    probe: Arc<dyn Probe>,
    timeout: Duration,
    cancel: CancellationToken,
    results: mpsc::Sender<ProbeResult>,
) -> u64 {
    let mut delivered = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            task = async { tasks.lock().await.recv().await } => task,
        };
        let Some(task) = next else {
            break;
        };

        let result = probe.probe(&task.address, task.port, timeout).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = results.send(result) => {
                if sent.is_err() {
                    break;
                }
                delivered += 1;
            }
        }
    }
    debug!(worker, delivered, probe = probe.name(), "worker exiting");
    delivered
}
