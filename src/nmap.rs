//! External raw-probe backend.
//!
//! The raw strategy never builds packets itself. It asks an external scanning
//! engine (nmap, SYN scan with the aggressive timing template) about one
//! target/port and reads back a structured report.

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use roxmltree::Document;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

use crate::error::{Result, ScanError};

/// State the backend reported for one port of one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub port: u16,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRecord {
    pub address: String,
    pub ports: Vec<PortRecord>,
}

/// Everything one backend invocation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendReport {
    pub hosts: Vec<HostRecord>,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait ProbeBackend: Send + Sync {
    /// Probe a single `target:port`. Errors describe a failed invocation, not a
    /// closed port.
    async fn scan(&self, target: &str, port: u16, timeout: Duration) -> Result<BackendReport>;

    fn name(&self) -> &'static str;
}

/// Runs the `nmap` binary and parses its XML report from stdout.
#[derive(Debug, Clone)]
pub struct NmapBackend {
    binary: PathBuf,
    /// Extra wall-clock allowance on top of the host timeout for process
    /// start-up and teardown.
    grace: Duration,
}

impl Default for NmapBackend {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("nmap"),
            grace: Duration::from_secs(5),
        }
    }
}

impl NmapBackend {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    fn interpret(output: &Output) -> Result<BackendReport> {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let warnings: Vec<String> = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if !output.status.success() && output.stdout.is_empty() {
            let message = if warnings.is_empty() {
                format!("exited with {}", output.status)
            } else {
                warnings.join("; ")
            };
            return Err(ScanError::backend("nmap", message));
        }

        let xml = String::from_utf8_lossy(&output.stdout);
        let hosts = parse_nmap_xml(&xml)?;
        Ok(BackendReport { hosts, warnings })
    }
}

/// Command-line arguments for probing one port of one target.
pub fn build_nmap_args(target: &str, port: u16, timeout: Duration) -> Vec<String> {
    vec![
        "-sS".to_string(),
        "-T4".to_string(),
        "--host-timeout".to_string(),
        format!("{}ms", timeout.as_millis().max(1)),
        "-p".to_string(),
        port.to_string(),
        "-oX".to_string(),
        "-".to_string(),
        target.to_string(),
    ]
}

#[async_trait]
impl ProbeBackend for NmapBackend {
    async fn scan(&self, target: &str, port: u16, timeout: Duration) -> Result<BackendReport> {
        let args = build_nmap_args(target, port, timeout);
        debug!(binary = %self.binary.display(), ?args, "invoking backend");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).kill_on_drop(true);

        let limit = timeout + self.grace;
        let output = time::timeout(limit, cmd.output())
            .await
            .map_err(|_| ScanError::Timeout {
                duration_ms: limit.as_millis() as u64,
            })?
            .map_err(|e| ScanError::backend("nmap", e.to_string()))?;

        Self::interpret(&output)
    }

    fn name(&self) -> &'static str {
        "nmap"
    }
}

/// Parse an nmap XML report into per-host port records.
pub fn parse_nmap_xml(xml: &str) -> Result<Vec<HostRecord>> {
    // roxmltree rejects DTDs; nmap always emits a bare DOCTYPE line.
    let cleaned: String = xml
        .lines()
        .filter(|line| !line.trim_start().starts_with("<!DOCTYPE"))
        .collect::<Vec<_>>()
        .join("\n");

    let doc = Document::parse(&cleaned)
        .map_err(|e| ScanError::backend("nmap", format!("unreadable XML report: {e}")))?;
    let root = doc.root_element();
    if root.tag_name().name() != "nmaprun" {
        return Err(ScanError::backend("nmap", "report is not an nmaprun document"));
    }

    let hosts = root
        .children()
        .filter(|n| n.has_tag_name("host"))
        .map(|host| {
            let address = host
                .children()
                .find(|n| n.has_tag_name("address"))
                .and_then(|n| n.attribute("addr"))
                .unwrap_or_default()
                .to_string();
            let ports = host
                .children()
                .filter(|n| n.has_tag_name("ports"))
                .flat_map(|ports| ports.children().filter(|n| n.has_tag_name("port")))
                .filter_map(|port| {
                    let id = port.attribute("portid")?.parse::<u16>().ok()?;
                    let state = port
                        .children()
                        .find(|n| n.has_tag_name("state"))
                        .and_then(|n| n.attribute("state"))?;
                    Some(PortRecord {
                        port: id,
                        state: state.to_string(),
                    })
                })
                .collect();
            HostRecord { address, ports }
        })
        .collect();
    Ok(hosts)
}
