use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

use portsweep::events::{ChannelSink, ScanEvent};
use portsweep::nmap::{BackendReport, HostRecord, PortRecord, ProbeBackend};
use portsweep::probe::{ConnectProbe, Probe, ProbeSet};
use portsweep::raw::RawProbe;
use portsweep::session::ScanController;
use portsweep::types::{ProbeResult, ScanOutcome, ScanRequest};

/// Reports every port open after a fixed delay.
struct SlowProbe(Duration);

#[async_trait]
impl Probe for SlowProbe {
    async fn probe(&self, address: &str, port: u16, _timeout: Duration) -> ProbeResult {
        tokio::time::sleep(self.0).await;
        ProbeResult::new(address, port, "open")
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

fn slow_controller(delay: Duration) -> (Arc<ScanController>, UnboundedReceiver<ScanEvent>) {
    let (sink, rx) = ChannelSink::new();
    let slow: Arc<dyn Probe> = Arc::new(SlowProbe(delay));
    let controller = ScanController::with_probes(Arc::new(sink), ProbeSet::new(slow.clone(), slow));
    (Arc::new(controller), rx)
}

fn connect_controller() -> (ScanController, UnboundedReceiver<ScanEvent>) {
    let (sink, rx) = ChannelSink::new();
    (ScanController::new(Arc::new(sink)), rx)
}

fn drain(rx: &mut UnboundedReceiver<ScanEvent>) -> (Vec<ProbeResult>, Vec<f64>) {
    let mut results = Vec::new();
    let mut progress = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        match ev {
            ScanEvent::ScanResult(r) => results.push(r),
            ScanEvent::ScanProgress(p) => progress.push(p),
        }
    }
    (results, progress)
}

async fn wait_for_results(rx: &mut UnboundedReceiver<ScanEvent>, n: usize) -> Vec<ProbeResult> {
    let mut got = Vec::new();
    while got.len() < n {
        match rx.recv().await {
            Some(ScanEvent::ScanResult(r)) => got.push(r),
            Some(ScanEvent::ScanProgress(_)) => {}
            None => break,
        }
    }
    got
}

#[tokio::test]
async fn connect_scan_reports_open_and_closed() {
    let open_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (pa, pb, pc) = (
        open_a.local_addr().unwrap().port(),
        open_b.local_addr().unwrap().port(),
        closed.local_addr().unwrap().port(),
    );
    drop(closed);

    let (controller, mut rx) = connect_controller();
    let req = ScanRequest::new("127.0.0.1", format!("{pa},{pb},{pc}"))
        .with_threads(2)
        .with_timeout_ms(500);
    let outcome = controller.run_scan(&req).await;
    assert_eq!(outcome, ScanOutcome::ScanComplete);

    let (mut results, progress) = drain(&mut rx);
    results.sort_by_key(|r| r.port);
    let mut expected = vec![
        ProbeResult::new("127.0.0.1", pa, "open"),
        ProbeResult::new("127.0.0.1", pb, "open"),
        ProbeResult::new("127.0.0.1", pc, "closed"),
    ];
    expected.sort_by_key(|r| r.port);
    assert_eq!(results, expected);
    assert_eq!(progress.last().copied(), Some(100.0));
    assert!(!controller.is_active());
}

#[tokio::test]
async fn every_task_yields_one_result() {
    let (controller, mut rx) = slow_controller(Duration::from_millis(1));
    let req = ScanRequest::new("10.0.0.1-10.0.0.5", "20-29").with_threads(7);
    assert_eq!(controller.run_scan(&req).await, ScanOutcome::ScanComplete);

    let (results, progress) = drain(&mut rx);
    assert_eq!(results.len(), 50);
    let mut pairs: Vec<(String, u16)> = results.into_iter().map(|r| (r.address, r.port)).collect();
    pairs.sort();
    pairs.dedup();
    assert_eq!(pairs.len(), 50);

    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(100.0));
}

#[tokio::test]
async fn cancel_mid_scan() {
    let (controller, mut rx) = slow_controller(Duration::from_millis(20));
    let req = ScanRequest::new("10.0.0.1-10.0.0.10", "1-100").with_threads(4);
    let c = controller.clone();
    let handle = tokio::spawn(async move { c.run_scan(&req).await });

    wait_for_results(&mut rx, 3).await;
    assert!(controller.cancel_scan());
    assert_eq!(handle.await.unwrap(), ScanOutcome::ScanCancelled);
    assert!(!controller.is_active());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (results, _) = drain(&mut rx);
    assert!(results.contains(&ProbeResult::cancelled()));
    let probed = results.iter().filter(|r| r.state != "cancelled").count();
    assert!(probed + 3 < 1000);
}

#[tokio::test]
async fn cancel_without_active_scan_is_noop() {
    let (controller, mut rx) = slow_controller(Duration::from_millis(1));
    assert!(!controller.cancel_scan());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn new_scan_cancels_previous() {
    let (controller, mut rx) = slow_controller(Duration::from_millis(20));
    let big = ScanRequest::new("10.0.0.1-10.0.0.10", "1-100").with_threads(2);
    let c = controller.clone();
    let first = tokio::spawn(async move { c.run_scan(&big).await });

    wait_for_results(&mut rx, 1).await;
    let small = ScanRequest::new("10.9.9.9", "7,9").with_threads(2);
    assert_eq!(controller.run_scan(&small).await, ScanOutcome::ScanComplete);
    assert_eq!(first.await.unwrap(), ScanOutcome::ScanCancelled);

    let (results, _) = drain(&mut rx);
    let second: Vec<_> = results.iter().filter(|r| r.address == "10.9.9.9").collect();
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn malformed_address_reports_fragment_and_completes() {
    let (controller, mut rx) = slow_controller(Duration::from_millis(1));
    let req = ScanRequest::new("10.0.0.1,10.0.0.5-10.0.0.1", "80");
    assert_eq!(controller.run_scan(&req).await, ScanOutcome::ScanComplete);

    let (results, progress) = drain(&mut rx);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].address, "10.0.0.5-10.0.0.1");
    assert_eq!(results[0].port, 0);
    assert!(results[0].state.contains("invalid range"));
    assert!(progress.is_empty());
}

#[tokio::test]
async fn malformed_ports_report_single_entry() {
    let (controller, mut rx) = slow_controller(Duration::from_millis(1));
    let req = ScanRequest::new("10.0.0.1", "80,abc");
    assert_eq!(controller.run_scan(&req).await, ScanOutcome::ScanComplete);

    let (results, _) = drain(&mut rx);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].address, "");
    assert!(results[0].state.contains("invalid port"));
}

struct FakeBackend;

#[async_trait]
impl ProbeBackend for FakeBackend {
    async fn scan(
        &self,
        target: &str,
        port: u16,
        _timeout: Duration,
    ) -> portsweep::error::Result<BackendReport> {
        let report = match port {
            22 => BackendReport {
                hosts: vec![HostRecord {
                    address: target.to_string(),
                    ports: vec![PortRecord {
                        port,
                        state: "filtered".into(),
                    }],
                }],
                warnings: vec![],
            },
            23 => BackendReport {
                hosts: vec![],
                warnings: vec!["RTTVAR has grown".into()],
            },
            _ => BackendReport::default(),
        };
        Ok(report)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[tokio::test]
async fn raw_strategy_maps_backend_reports() {
    let (sink, mut rx) = ChannelSink::new();
    let raw: Arc<dyn Probe> = Arc::new(RawProbe::with_permission(Arc::new(FakeBackend), true));
    let controller = ScanController::with_probes(
        Arc::new(sink),
        ProbeSet::new(Arc::new(ConnectProbe), raw),
    );
    let req = ScanRequest::new("10.0.0.1", "22,23,24").with_raw(true);
    assert_eq!(controller.run_scan(&req).await, ScanOutcome::ScanComplete);

    let (mut results, _) = drain(&mut rx);
    results.sort_by_key(|r| r.port);
    let states: Vec<&str> = results.iter().map(|r| r.state.as_str()).collect();
    assert_eq!(states, vec!["filtered", "RTTVAR has grown", "closed"]);
}
