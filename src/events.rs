//! Event sinks that receive scan results and progress.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::ProbeResult;

/// One event pushed to a consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanResult(ProbeResult),
    /// Percentage in `0.0..=100.0`.
    ScanProgress(f64),
}

/// Destination for scan events. Calls must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ScanEvent);

    fn emit_result(&self, result: ProbeResult) {
        self.emit(ScanEvent::ScanResult(result));
    }

    fn emit_progress(&self, progress: f64) {
        self.emit(ScanEvent::ScanProgress(progress));
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ScanEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Keeps every result and optionally echoes each event as one JSON line on stdout.
#[derive(Debug, Default)]
pub struct LogSink {
    results: Mutex<Vec<ProbeResult>>,
    echo: bool,
}

impl LogSink {
    pub fn new(echo: bool) -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            echo,
        }
    }

    pub fn results(&self) -> Vec<ProbeResult> {
        self.results
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

impl EventSink for LogSink {
    fn emit(&self, event: ScanEvent) {
        if let ScanEvent::ScanResult(r) = &event {
            if let Ok(mut g) = self.results.lock() {
                g.push(r.clone());
            }
        }
        if !self.echo {
            return;
        }
        if let Ok(line) = serde_json::to_string(&event) {
            println!("{line}");
        }
    }
}
