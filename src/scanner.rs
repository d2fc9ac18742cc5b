use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::DiagError;
use crate::probe::{error_result, probe_port};
use crate::services;
use crate::types::{PortProbeResult, PortStatus};

/// Parallel probes per scan when the caller has no preference.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Probe every port in `ports` against `host` with at most `max_concurrency` probes in flight.
///
/// - Duplicate ports are probed once; the output holds one result per distinct port.
/// - Results are sorted ascending by port, whatever order probes finish in.
/// - A probe that faults internally becomes an `Error` result for its port; siblings keep running.
/// - An empty port set returns an empty list.
pub async fn scan_ports(
    host: &str,
    ports: &[u32],
    timeout: Duration,
    max_concurrency: usize,
) -> Vec<PortProbeResult> {
    scan_ports_internal(host, ports, timeout, max_concurrency, None, None, connect_probe).await
}

/// Variant that accepts a `CancellationToken` to allow external cancellation.
///
/// Once cancelled, ports that were queued or still in flight come back as
/// `Error` results with `cancelled` set; finished results are kept.
pub async fn scan_ports_with_cancel(
    host: &str,
    ports: &[u32],
    timeout: Duration,
    max_concurrency: usize,
    cancel: CancellationToken,
) -> Vec<PortProbeResult> {
    scan_ports_internal(
        host,
        ports,
        timeout,
        max_concurrency,
        Some(cancel),
        None,
        connect_probe,
    )
    .await
}

/// Live counters and results, readable while a scan is still running.
#[derive(Clone, Debug)]
pub struct SharedProgress {
    pub total: Arc<AtomicU64>,
    pub scanned_done: Arc<AtomicU64>,
    pub open_count: Arc<AtomicU64>,
    pub entries: Arc<Mutex<Vec<PortProbeResult>>>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self {
            total: Arc::new(AtomicU64::new(0)),
            scanned_done: Arc::new(AtomicU64::new(0)),
            open_count: Arc::new(AtomicU64::new(0)),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for SharedProgress {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn scan_ports_with_shared(
    host: &str,
    ports: &[u32],
    timeout: Duration,
    max_concurrency: usize,
    cancel: CancellationToken,
    shared: SharedProgress,
) -> Vec<PortProbeResult> {
    scan_ports_internal(
        host,
        ports,
        timeout,
        max_concurrency,
        Some(cancel),
        Some(shared),
        connect_probe,
    )
    .await
}

/// Scan every port in the service table.
pub async fn scan_common_ports(
    host: &str,
    timeout: Duration,
    max_concurrency: usize,
) -> Vec<PortProbeResult> {
    let ports: Vec<u32> = services::common_service_ports()
        .into_iter()
        .map(|(p, _)| u32::from(p))
        .collect();
    scan_ports(host, &ports, timeout, max_concurrency).await
}

/// Scan the inclusive range `start..=end` and keep only open ports.
///
/// Reversed bounds are swapped. Bounds outside 1..=65535 are rejected before any probe runs.
pub async fn scan_port_range(
    host: &str,
    start: u32,
    end: u32,
    timeout: Duration,
    max_concurrency: usize,
) -> Result<Vec<PortProbeResult>, DiagError> {
    let valid = 1..=65535u32;
    if !valid.contains(&start) || !valid.contains(&end) {
        return Err(DiagError::InvalidPortRange(start, end));
    }
    let (lo, hi) = if start > end { (end, start) } else { (start, end) };
    let ports: Vec<u32> = (lo..=hi).collect();
    let results = scan_ports(host, &ports, timeout, max_concurrency).await;
    Ok(results.into_iter().filter(|r| r.is_open()).collect())
}

async fn connect_probe(host: Arc<str>, port: u32, timeout: Duration) -> PortProbeResult {
    probe_port(&host, port, timeout).await
}

/// Shared scan loop; `probe` runs once per distinct port.
async fn scan_ports_internal<P, Fut>(
    host: &str,
    ports: &[u32],
    timeout: Duration,
    max_concurrency: usize,
    cancel_opt: Option<CancellationToken>,
    shared_opt: Option<SharedProgress>,
    probe: P,
) -> Vec<PortProbeResult>
where
    P: Fn(Arc<str>, u32, Duration) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PortProbeResult> + Send + 'static,
{
    let unique: BTreeSet<u32> = ports.iter().copied().collect();
    if unique.is_empty() {
        return Vec::new();
    }

    let shared = shared_opt.unwrap_or_default();
    shared.total.store(unique.len() as u64, Ordering::Relaxed);

    let host: Arc<str> = Arc::from(host.trim());
    let sem = Arc::new(Semaphore::new(max_concurrency.clamp(1, 5_000)));
    let mut set = JoinSet::new();
    let cancel = cancel_opt.unwrap_or_default();
    let probe = Arc::new(probe);
    let scan_start = Instant::now();

    info!(
        host = %host,
        ports = unique.len(),
        concurrency = max_concurrency,
        timeout_ms = timeout.as_millis() as u64,
        "starting port scan"
    );

    for &port in &unique {
        // Queued ports wait here for a free slot; cancellation stops the queue.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = sem.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        let host = host.clone();
        let cancel = cancel.clone();
        let shared = shared.clone();
        let probe = probe.clone();

        set.spawn(async move {
            // Released on every exit path, including unwinding.
            let _permit = permit;
            let started = Instant::now();

            let attempt = AssertUnwindSafe((*probe)(host.clone(), port, timeout)).catch_unwind();
            let result = tokio::select! {
                _ = cancel.cancelled() => cancelled_result(&host, port, started.elapsed()),
                outcome = attempt => match outcome {
                    Ok(r) => r,
                    Err(panic) => error_result(
                        &host,
                        port,
                        format!("internal fault while probing: {}", panic_message(&*panic)),
                        started.elapsed(),
                    ),
                },
            };

            if result.status == PortStatus::Open {
                shared.open_count.fetch_add(1, Ordering::Relaxed);
            }
            shared.scanned_done.fetch_add(1, Ordering::Relaxed);
            shared.entries.lock().await.push(result.clone());
            result
        });
    }

    let mut results = Vec::with_capacity(unique.len());
    while let Some(res) = set.join_next().await {
        match res {
            Ok(r) => results.push(r),
            Err(e) => warn!("probe task ended abnormally: {e}"),
        }
    }

    // Ports never spawned (cancelled queue) or lost to an aborted task still get a result.
    let seen: HashSet<u32> = results.iter().map(|r| r.port).collect();
    for &port in unique.iter().filter(|p| !seen.contains(p)) {
        let r = if cancel.is_cancelled() {
            cancelled_result(&host, port, Duration::ZERO)
        } else {
            error_result(
                &host,
                port,
                "probe task stopped before reporting an outcome",
                Duration::ZERO,
            )
        };
        results.push(r);
    }

    results.sort_by_key(|r| r.port);

    info!(
        host = %host,
        scanned = results.len(),
        open = results.iter().filter(|r| r.is_open()).count(),
        cancelled = cancel.is_cancelled(),
        elapsed_ms = scan_start.elapsed().as_millis() as u64,
        "port scan finished"
    );
    results
}

fn cancelled_result(host: &str, port: u32, elapsed: Duration) -> PortProbeResult {
    let mut r = error_result(host, port, "scan cancelled before this port was probed", elapsed);
    r.cancelled = true;
    r
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
