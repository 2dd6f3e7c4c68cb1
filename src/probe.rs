//! Probe strategies.
//!
//! Every strategy resolves within roughly its timeout and encodes failures in
//! the returned [`ProbeResult::state`] instead of returning an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time;
use tracing::trace;

use crate::nmap::{NmapBackend, ProbeBackend};
use crate::raw::RawProbe;
use crate::types::{ProbeResult, STATE_CLOSED, STATE_OPEN};

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, address: &str, port: u16, timeout: Duration) -> ProbeResult;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

/// TCP connect probe. Reports `open` on an established connection and
/// `closed` on any failure (refused, unreachable, timed out).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectProbe;

#[async_trait]
impl Probe for ConnectProbe {
    async fn probe(&self, address: &str, port: u16, timeout: Duration) -> ProbeResult {
        let state = match time::timeout(timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(_stream)) => STATE_OPEN,
            Ok(Err(e)) => {
                trace!(address, port, error = %e, "connect failed");
                STATE_CLOSED
            }
            Err(_) => STATE_CLOSED,
        };
        ProbeResult::new(address, port, state)
    }

    fn name(&self) -> &'static str {
        "connect"
    }
}

/// The two strategies available to a scan, built once and selected per scan.
#[derive(Clone)]
pub struct ProbeSet {
    connect: Arc<dyn Probe>,
    raw: Arc<dyn Probe>,
}

impl ProbeSet {
    pub fn new(connect: Arc<dyn Probe>, raw: Arc<dyn Probe>) -> Self {
        Self { connect, raw }
    }

    /// Connect probing plus raw probing through `backend`.
    ///
    /// Process privileges are checked once here; an unprivileged raw probe still
    /// runs, failing each task with the permission error text.
    pub fn with_backend(backend: Arc<dyn ProbeBackend>) -> Self {
        Self::new(Arc::new(ConnectProbe), Arc::new(RawProbe::new(backend)))
    }

    pub fn select(&self, use_raw: bool) -> Arc<dyn Probe> {
        if use_raw {
            Arc::clone(&self.raw)
        } else {
            Arc::clone(&self.connect)
        }
    }
}

impl Default for ProbeSet {
    fn default() -> Self {
        Self::with_backend(Arc::new(NmapBackend::default()))
    }
}
