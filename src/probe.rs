use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{self, Instant};
use tracing::debug;

use crate::services;
use crate::types::{PortProbeResult, PortStatus};

/// Stand-in deadline for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How a bounded connect attempt ended, before classification.
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected,
    Failed(io::Error),
    /// Our own deadline passed with no answer from the peer.
    Elapsed,
}

/// Map a connect outcome onto a port status, first match wins.
///
/// - handshake completed: `Open`
/// - peer answered with a reset: `Closed`
/// - our deadline passed silently: `Filtered`
/// - the OS itself reported ETIMEDOUT before our deadline: `Timeout`
/// - host/network unreachable (ICMP from a router): `Filtered`
/// - anything else: `Error`, with the cause attached
pub fn classify(outcome: &ConnectOutcome, timeout: Duration) -> (PortStatus, Option<String>) {
    match outcome {
        ConnectOutcome::Connected => (PortStatus::Open, None),
        ConnectOutcome::Elapsed => {
            debug!("no answer within {}ms", timeout.as_millis());
            (PortStatus::Filtered, None)
        }
        ConnectOutcome::Failed(e) => match e.kind() {
            io::ErrorKind::ConnectionRefused => (PortStatus::Closed, None),
            io::ErrorKind::TimedOut => (PortStatus::Timeout, None),
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                (PortStatus::Filtered, None)
            }
            _ => (
                PortStatus::Error,
                Some(format!("connection failed: {e}")),
            ),
        },
    }
}

/// Attempt one TCP connection to `host:port` and classify the outcome.
///
/// Never fails: invalid input, resolution problems and unexpected socket errors
/// all come back as `PortStatus::Error` with `error_detail` set. The socket is
/// dropped on every path.
pub async fn probe_port(host: &str, port: u32, timeout: Duration) -> PortProbeResult {
    let start = Instant::now();
    let host = host.trim();

    if host.is_empty() {
        return error_result(host, port, "host must not be empty", start.elapsed());
    }
    let port16 = match u16::try_from(port) {
        Ok(p) if p != 0 => p,
        _ => {
            return error_result(
                host,
                port,
                format!("invalid port {port}: must be between 1 and 65535"),
                start.elapsed(),
            )
        }
    };

    // Resolution and connect share one deadline.
    let deadline = start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE);
    let addr = match resolve(host, port16, deadline, timeout).await {
        Ok(addr) => addr,
        Err(detail) => return error_result(host, port, detail, start.elapsed()),
    };

    let connect_start = Instant::now();
    let outcome = match time::timeout_at(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            ConnectOutcome::Connected
        }
        Ok(Err(e)) => ConnectOutcome::Failed(e),
        Err(_) => ConnectOutcome::Elapsed,
    };
    let elapsed = connect_start.elapsed();

    let (status, error_detail) = classify(&outcome, timeout);
    debug!(%host, port, %status, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "probe finished");

    PortProbeResult {
        host: host.to_string(),
        port,
        status,
        service_name: services::service_name(port16).map(str::to_string),
        response_time_ms: elapsed.as_secs_f64() * 1000.0,
        error_detail,
        cancelled: false,
        timestamp: now_rfc3339(),
    }
}

/// First IPv4 address for `host`, else the first address of any family.
async fn resolve(
    host: &str,
    port: u16,
    deadline: Instant,
    timeout: Duration,
) -> Result<SocketAddr, String> {
    match time::timeout_at(deadline, lookup_host((host, port))).await {
        Ok(Ok(addrs)) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
                .ok_or_else(|| format!("host '{host}' resolved to no addresses"))
        }
        Ok(Err(e)) => Err(format!(
            "could not resolve host '{host}': {e}; check the hostname or DNS settings"
        )),
        Err(_) => Err(format!(
            "resolving host '{host}' took longer than {}ms; check DNS settings",
            timeout.as_millis()
        )),
    }
}

/// Build an `Error` result for `port`.
pub(crate) fn error_result(
    host: &str,
    port: u32,
    detail: impl Into<String>,
    elapsed: Duration,
) -> PortProbeResult {
    PortProbeResult {
        host: host.to_string(),
        port,
        status: PortStatus::Error,
        service_name: u16::try_from(port)
            .ok()
            .and_then(services::service_name)
            .map(str::to_string),
        response_time_ms: elapsed.as_secs_f64() * 1000.0,
        error_detail: Some(detail.into()),
        cancelled: false,
        timestamp: now_rfc3339(),
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(500);

    #[test]
    fn classify_connected_is_open() {
        assert_eq!(classify(&ConnectOutcome::Connected, T), (PortStatus::Open, None));
    }

    #[test]
    fn classify_refused_is_closed() {
        let e = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify(&ConnectOutcome::Failed(e), T).0, PortStatus::Closed);
    }

    #[test]
    fn classify_deadline_vs_os_timeout() {
        assert_eq!(classify(&ConnectOutcome::Elapsed, T).0, PortStatus::Filtered);
        let e = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(classify(&ConnectOutcome::Failed(e), T).0, PortStatus::Timeout);
    }

    #[test]
    fn classify_unreachable_is_filtered() {
        let e = io::Error::from(io::ErrorKind::HostUnreachable);
        assert_eq!(classify(&ConnectOutcome::Failed(e), T).0, PortStatus::Filtered);
    }

    #[test]
    fn classify_other_failure_is_error_with_detail() {
        let e = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let (status, detail) = classify(&ConnectOutcome::Failed(e), T);
        assert_eq!(status, PortStatus::Error);
        assert!(detail.unwrap().contains("denied"));
    }

    #[tokio::test]
    async fn out_of_range_ports_error_without_connecting() {
        for port in [0u32, 65536, 99999] {
            let r = probe_port("127.0.0.1", port, T).await;
            assert_eq!(r.status, PortStatus::Error);
            assert_eq!(r.port, port);
            assert!(r.error_detail.unwrap().contains("between 1 and 65535"));
        }
    }

    #[tokio::test]
    async fn empty_host_is_error() {
        let r = probe_port("  ", 22, T).await;
        assert_eq!(r.status, PortStatus::Error);
        assert_eq!(r.service_name.as_deref(), Some("SSH"));
    }

    #[tokio::test]
    async fn localhost_resolves_to_ipv4_first() {
        let deadline = Instant::now() + Duration::from_secs(2);
        let addr = resolve("localhost", 80, deadline, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 80);
    }

    #[tokio::test]
    async fn connect_past_deadline_is_filtered() {
        // Non-routable address: the handshake cannot finish within 1ms.
        let r = probe_port("10.255.255.1", 81, Duration::from_millis(1)).await;
        assert_eq!(r.status, PortStatus::Filtered);
        assert_eq!(r.error_detail, None);
        assert!(r.response_time_ms < 1000.0);
    }

    #[tokio::test]
    async fn huge_timeout_does_not_overflow_deadline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = u32::from(listener.local_addr().unwrap().port());
        drop(listener);
        let r = probe_port("127.0.0.1", port, Duration::MAX).await;
        assert_eq!(r.status, PortStatus::Closed);
    }
}
