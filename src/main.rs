use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portsweep::events::LogSink;
use portsweep::session::ScanController;
use portsweep::types::{ProbeResult, ScanRequest, DEFAULT_THREADS, DEFAULT_TIMEOUT_MS, STATE_CLOSED};
use portsweep::{netdetect, ports, raw, server};

/// portsweep — concurrent TCP port prober with connect and raw (nmap) strategies.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "portsweep",
    version,
    about = "Concurrent TCP port prober with connect and raw (nmap) strategies.",
    long_about = None
)]
struct Cli {
    /// Addresses: comma-separated IPs or inclusive ranges (10.0.0.1-10.0.0.20).
    /// If omitted, every detected local /24 is used.
    #[arg(long)]
    targets: Option<String>,

    /// Ports: comma-separated ports or inclusive ranges (22,80-90). Defaults to a common list.
    #[arg(long)]
    ports: Option<String>,

    /// Use raw SYN probing through nmap (requires root).
    #[arg(long, default_value_t = false)]
    raw: bool,

    /// Number of concurrent probe workers.
    #[arg(long, default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Per-probe timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Stream every result and progress event as JSON lines on stdout.
    #[arg(long = "json-events", default_value_t = false)]
    json_events: bool,

    /// Write all results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Run the embedded HTTP UI server instead of a one-shot scan.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Bind address for the HTTP UI server.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portsweep=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.serve_ui {
        info!(bind = %cli.bind, "UI server starting (Ctrl+C to stop)");
        tokio::select! {
            res = server::spawn_server(&cli.bind) => res?,
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
        }
        return Ok(());
    }

    if cli.raw {
        raw::check_permission()?;
    }

    let targets = match cli.targets.clone() {
        Some(t) => t,
        None => netdetect::local_address_spec()
            .context("failed to detect local networks")?
            .context("no local IPv4 network found; pass --targets")?,
    };
    let ports = cli.ports.clone().unwrap_or_else(ports::default_port_spec);

    info!(
        targets = %targets,
        ports = %ports,
        raw = cli.raw,
        threads = cli.threads,
        timeout_ms = cli.timeout_ms,
        "configuration"
    );

    let request = ScanRequest::new(targets, ports)
        .with_raw(cli.raw)
        .with_threads(cli.threads)
        .with_timeout_ms(cli.timeout_ms);

    let sink = Arc::new(LogSink::new(cli.json_events));
    let controller = Arc::new(ScanController::new(sink.clone()));

    // Ctrl-C cancels the scan.
    let ctrlc = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc.cancel_scan();
        }
    });

    let outcome = controller.run_scan(&request).await;
    info!(%outcome, "scan finished");

    let results = sink.results();
    if !cli.json_events {
        print_results_table(&results);
    }
    if let Some(path) = cli.output.as_deref() {
        match write_results_json(path, &results) {
            Ok(()) => info!(path = %path.display(), "wrote JSON results"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write JSON results"),
        }
    }
    println!("{outcome}");
    Ok(())
}

/// Print every result that is not plainly closed.
fn print_results_table(results: &[ProbeResult]) {
    let shown: Vec<&ProbeResult> = results
        .iter()
        .filter(|r| r.state != STATE_CLOSED)
        .collect();
    let mut addr_w = "address".len();
    let mut state_w = "state".len();
    for r in &shown {
        addr_w = addr_w.max(r.address.len());
        state_w = state_w.max(r.state.len().min(60));
    }
    let port_w = 5usize;

    let open = results.iter().filter(|r| r.is_open()).count();
    println!(
        "\nOpen ports: {} ({} not closed, {} probed)",
        open,
        shown.len(),
        results.len()
    );
    println!("{:<addr_w$}  {:>port_w$}  {:<state_w$}", "address", "port", "state");
    println!("{:-<addr_w$}  {:-<port_w$}  {:-<state_w$}", "", "", "");
    for r in shown {
        let state: String = r.state.chars().take(60).collect();
        println!("{:<addr_w$}  {:>port_w$}  {:<state_w$}", r.address, r.port, state);
    }
}

fn write_results_json(path: &std::path::Path, results: &[ProbeResult]) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}
