//! Raw (SYN) probing through an external backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{Result, ScanError};
use crate::nmap::{BackendReport, ProbeBackend};
use crate::probe::Probe;
use crate::types::{ProbeResult, STATE_CLOSED};

/// Whether this process may run the raw strategy.
///
/// Requires root everywhere except Windows, where the backend's driver handles
/// privilege itself.
pub fn check_permission() -> Result<()> {
    if cfg!(windows) || is_root::is_root() {
        Ok(())
    } else {
        Err(ScanError::Permission)
    }
}

/// Map a backend report onto a port state.
///
/// Warnings take precedence over host data. A port missing from every host
/// counts as closed.
pub fn classify_report(report: &BackendReport, port: u16) -> String {
    if !report.warnings.is_empty() {
        return report.warnings.join("; ");
    }
    report
        .hosts
        .iter()
        .flat_map(|h| h.ports.iter())
        .find(|p| p.port == port)
        .map(|p| p.state.clone())
        .unwrap_or_else(|| STATE_CLOSED.to_string())
}

pub struct RawProbe {
    backend: Arc<dyn ProbeBackend>,
    permission: std::result::Result<(), String>,
}

impl RawProbe {
    /// Build a raw probe, checking process privileges once.
    pub fn new(backend: Arc<dyn ProbeBackend>) -> Self {
        let permission = check_permission().map_err(|e| e.to_string());
        Self { backend, permission }
    }

    /// Build a raw probe with a known privilege state.
    pub fn with_permission(backend: Arc<dyn ProbeBackend>, privileged: bool) -> Self {
        let permission = if privileged {
            Ok(())
        } else {
            Err(ScanError::Permission.to_string())
        };
        Self { backend, permission }
    }
}

#[async_trait]
impl Probe for RawProbe {
    async fn probe(&self, address: &str, port: u16, timeout: Duration) -> ProbeResult {
        if let Err(msg) = &self.permission {
            return ProbeResult::new(address, port, msg.as_str());
        }
        let state = match self.backend.scan(address, port, timeout).await {
            Ok(report) => {
                if !report.warnings.is_empty() {
                    warn!(address, port, backend = self.backend.name(), warnings = ?report.warnings, "backend reported warnings");
                }
                classify_report(&report, port)
            }
            Err(e) => e.to_string(),
        };
        ProbeResult::new(address, port, state)
    }

    fn name(&self) -> &'static str {
        "raw"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmap::{HostRecord, PortRecord};

    struct FixedBackend(std::result::Result<BackendReport, String>);

    #[async_trait]
    impl ProbeBackend for FixedBackend {
        async fn scan(&self, _: &str, _: u16, _: Duration) -> Result<BackendReport> {
            self.0.clone().map_err(|m| ScanError::backend("fixed", m))
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn host(ports: &[(u16, &str)]) -> HostRecord {
        HostRecord {
            address: "10.0.0.1".into(),
            ports: ports
                .iter()
                .map(|&(port, state)| PortRecord {
                    port,
                    state: state.into(),
                })
                .collect(),
        }
    }

    #[test]
    fn no_hosts_is_closed() {
        assert_eq!(classify_report(&BackendReport::default(), 22), "closed");
    }

    #[test]
    fn matching_port_state_is_verbatim() {
        let report = BackendReport {
            hosts: vec![host(&[(80, "open"), (22, "filtered")])],
            warnings: vec![],
        };
        assert_eq!(classify_report(&report, 22), "filtered");
    }

    #[test]
    fn absent_port_is_closed() {
        let report = BackendReport {
            hosts: vec![host(&[(80, "open")])],
            warnings: vec![],
        };
        assert_eq!(classify_report(&report, 22), "closed");
    }

    #[test]
    fn warnings_are_joined() {
        let report = BackendReport {
            hosts: vec![host(&[(22, "open")])],
            warnings: vec!["first".into(), "second".into()],
        };
        assert_eq!(classify_report(&report, 22), "first; second");
    }

    #[tokio::test]
    async fn unprivileged_probe_fails_only_that_task() {
        let backend = Arc::new(FixedBackend(Ok(BackendReport::default())));
        let probe = RawProbe::with_permission(backend, false);
        let r = probe.probe("10.0.0.1", 22, Duration::from_millis(10)).await;
        assert_eq!(r.state, ScanError::Permission.to_string());
    }

    #[tokio::test]
    async fn backend_error_becomes_state() {
        let backend = Arc::new(FixedBackend(Err("boom".into())));
        let probe = RawProbe::with_permission(backend, true);
        let r = probe.probe("10.0.0.1", 22, Duration::from_millis(10)).await;
        assert_eq!(r.address, "10.0.0.1");
        assert_eq!(r.port, 22);
        assert!(r.state.contains("boom"));
    }

    #[tokio::test]
    async fn privileged_probe_reports_backend_state() {
        let backend = Arc::new(FixedBackend(Ok(BackendReport {
            hosts: vec![host(&[(22, "open")])],
            warnings: vec![],
        })));
        let probe = RawProbe::with_permission(backend, true);
        let r = probe.probe("10.0.0.1", 22, Duration::from_millis(10)).await;
        assert_eq!(r.state, "open");
    }
}
