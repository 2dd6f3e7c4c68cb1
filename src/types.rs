use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const STATE_OPEN: &str = "open";
pub const STATE_CLOSED: &str = "closed";
pub const STATE_CANCELLED: &str = "cancelled";

/// Outcome of probing one address:port, or a synthetic entry reporting a
/// specification error or a cancellation.
///
/// `state` is `open`/`closed`/a backend-reported state, or the text of the
/// error that replaced the probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub address: String,
    pub port: u16,
    pub state: String,
}

impl ProbeResult {
    pub fn new(address: impl Into<String>, port: u16, state: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            state: state.into(),
        }
    }

    /// The out-of-band entry emitted when a scan is cancelled.
    pub fn cancelled() -> Self {
        Self::new("", 0, STATE_CANCELLED)
    }

    pub fn is_open(&self) -> bool {
        self.state == STATE_OPEN
    }
}

/// Terminal outcome of one scan session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    ScanComplete,
    ScanCancelled,
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanComplete => "scan_complete",
            Self::ScanCancelled => "scan_cancelled",
        }
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_THREADS: usize = 100;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const MAX_THREADS: usize = 5_000;

/// Parameters of one scan, as received from a caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub addresses: String,
    pub ports: String,
    #[serde(default)]
    pub use_raw: bool,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ScanRequest {
    pub fn new(addresses: impl Into<String>, ports: impl Into<String>) -> Self {
        Self {
            addresses: addresses.into(),
            ports: ports.into(),
            use_raw: false,
            threads: DEFAULT_THREADS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_raw(mut self, use_raw: bool) -> Self {
        self.use_raw = use_raw;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Worker count clamped to `1..=MAX_THREADS`.
    pub fn worker_count(&self) -> usize {
        self.threads.clamp(1, MAX_THREADS)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}
