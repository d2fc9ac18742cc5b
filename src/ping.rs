//! Ping sampler: runs the platform `ping` and turns its text into [`PingStatistics`].
//!
//! Parsing is split in two independent passes over the output lines: one collects
//! per-reply round-trip times, the other looks for the transmitted/received summary.
//! Either may be missing without affecting the other.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{DiagError, ToolError};
use crate::latency;
use crate::platform::{self, Platform, ToolOutput};
use crate::types::{PingStatistics, PingStatus};

pub const DEFAULT_COUNT: u32 = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Slack added on top of the expected run time before the process is killed.
const OVERALL_SLACK: Duration = Duration::from_secs(5);

static RTT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btime[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("valid regex"));

static UNIX_SUMMARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received.*?([0-9.]+)% packet loss")
        .expect("valid regex")
});

static WINDOWS_SUMMARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Sent = (\d+), Received = (\d+), Lost = (\d+) \((\d+)% loss\)")
        .expect("valid regex")
});

/// Transmitted/received counts as reported by the tool's summary line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingSummaryLine {
    pub transmitted: u32,
    pub received: u32,
    pub loss_percent: f64,
}

/// Command-line arguments for `ping` on `platform`.
pub fn ping_args(
    platform: Platform,
    host: &str,
    count: u32,
    timeout: Duration,
    interval: Duration,
) -> Vec<String> {
    let count = count.to_string();
    match platform {
        Platform::Linux => {
            // Unprivileged iputils refuses intervals below 200ms.
            let interval = interval.max(Duration::from_millis(200));
            vec![
                "-c".into(),
                count,
                "-i".into(),
                interval.as_secs_f64().to_string(),
                "-W".into(),
                platform::ceil_secs(timeout).to_string(),
                host.to_string(),
            ]
        }
        Platform::MacOs | Platform::OtherUnix => {
            let interval = interval.max(Duration::from_millis(100));
            vec![
                "-c".into(),
                count,
                "-i".into(),
                interval.as_secs_f64().to_string(),
                "-W".into(),
                timeout.as_millis().to_string(),
                host.to_string(),
            ]
        }
        // Windows ping has no interval flag; replies are one second apart.
        Platform::Windows => vec![
            "-n".into(),
            count,
            "-w".into(),
            timeout.as_millis().to_string(),
            host.to_string(),
        ],
    }
}

/// Upper bound on how long a whole run may take before it is killed.
pub fn overall_limit(count: u32, timeout: Duration, interval: Duration) -> Duration {
    timeout
        .saturating_add(interval)
        .saturating_mul(count)
        .saturating_add(OVERALL_SLACK)
}

/// Round-trip times from every reply line, in output order.
///
/// Duplicate replies flagged `DUP!` are skipped so each probe counts once.
pub fn parse_rtts(output: &str) -> Vec<f64> {
    output
        .lines()
        .filter(|line| !line.contains("DUP!"))
        .filter_map(|line| RTT_RE.captures(line))
        .filter_map(|caps| caps[1].parse::<f64>().ok())
        .collect()
}

/// The transmitted/received summary line, if the output has a well-formed one.
pub fn parse_summary(platform: Platform, output: &str) -> Option<PingSummaryLine> {
    output.lines().find_map(|line| match platform {
        Platform::Windows => WINDOWS_SUMMARY_RE.captures(line).and_then(|c| {
            Some(PingSummaryLine {
                transmitted: c[1].parse().ok()?,
                received: c[2].parse().ok()?,
                loss_percent: c[4].parse().ok()?,
            })
        }),
        _ => UNIX_SUMMARY_RE.captures(line).and_then(|c| {
            Some(PingSummaryLine {
                transmitted: c[1].parse().ok()?,
                received: c[2].parse().ok()?,
                loss_percent: c[3].parse().ok()?,
            })
        }),
    })
}

/// Turn a finished `ping` run into statistics.
///
/// Replies carrying an RTT are authoritative for `packets_received`; the summary
/// line only supplies `packets_sent` when present.
pub fn build_statistics(
    host: &str,
    count: u32,
    platform: Platform,
    out: &ToolOutput,
) -> PingStatistics {
    let rtts = parse_rtts(&out.stdout);
    let summary = parse_summary(platform, &out.stdout);
    if let Some(s) = summary {
        debug!(
            host,
            transmitted = s.transmitted,
            received = s.received,
            loss = s.loss_percent,
            replies_with_rtt = rtts.len(),
            "ping summary line"
        );
    }

    let received = rtts.len() as u32;
    let sent = summary
        .map(|s| s.transmitted)
        .filter(|t| *t > 0)
        .unwrap_or(count)
        .max(received);

    if received == 0 {
        let status = if reports_unreachable(out) {
            PingStatus::Unreachable
        } else {
            PingStatus::Timeout
        };
        let detail = out
            .stderr
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| format!("no reply from {host} ({l})"))
            .unwrap_or_else(|| format!("no reply from {host}; check that it is up and answers ICMP"));
        return PingStatistics::failed(host, sent, status, detail);
    }

    let min = rtts.iter().copied().fold(f64::INFINITY, f64::min);
    let max = rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = rtts.iter().sum::<f64>() / rtts.len() as f64;

    PingStatistics {
        host: host.to_string(),
        packets_sent: sent,
        packets_received: received,
        packet_loss_percent: loss_percent(sent, received),
        min_ms: Some(min),
        avg_ms: Some(avg),
        max_ms: Some(max),
        stddev_ms: Some(latency::sample_stddev(&rtts)),
        individual_rtts: rtts,
        status: PingStatus::Success,
        error_message: None,
    }
}

fn loss_percent(sent: u32, received: u32) -> f64 {
    if sent == 0 || received == 0 {
        return 100.0;
    }
    100.0 * (1.0 - f64::from(received) / f64::from(sent))
}

fn reports_unreachable(out: &ToolOutput) -> bool {
    if !matches!(out.exit_code, Some(0) | Some(1)) {
        return true;
    }
    let text = format!("{}\n{}", out.stdout, out.stderr).to_ascii_lowercase();
    [
        "unreachable",
        "unknown host",
        "could not find host",
        "cannot resolve",
        "name or service not known",
    ]
    .iter()
    .any(|needle| text.contains(needle))
}

/// Send `count` echo requests to `host` and report round-trip statistics.
///
/// Only malformed calls (`count == 0`, empty host) are rejected as `Err`; a missing
/// `ping` binary, a hung process or a silent host all come back as a status.
pub async fn ping_host(
    host: &str,
    count: u32,
    timeout: Duration,
    interval: Duration,
) -> Result<PingStatistics, DiagError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(DiagError::EmptyHost);
    }
    if count == 0 {
        return Err(DiagError::InvalidCount(count));
    }

    let platform = Platform::current();
    let args = ping_args(platform, host, count, timeout, interval);
    let limit = overall_limit(count, timeout, interval);
    info!(host, count, ?platform, "pinging");

    let stats = match platform::run_tool("ping", &args, limit).await {
        Ok(out) => build_statistics(host, count, platform, &out),
        Err(e @ ToolError::TimedOut { .. }) => {
            warn!(host, "{e}");
            PingStatistics::failed(host, count, PingStatus::Timeout, e.to_string())
        }
        Err(e) => {
            warn!(host, "{e}");
            PingStatistics::failed(host, count, PingStatus::Error, e.to_string())
        }
    };
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OK: &str = "\
PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.3 ms
64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=13.1 ms
64 bytes from 8.8.8.8: icmp_seq=4 ttl=117 time=11.9 ms

--- 8.8.8.8 ping statistics ---
4 packets transmitted, 3 received, 25% packet loss, time 3004ms
rtt min/avg/max/mdev = 11.900/12.433/13.100/0.499 ms
";

    const MACOS_OK: &str = "\
PING 1.1.1.1 (1.1.1.1): 56 data bytes
64 bytes from 1.1.1.1: icmp_seq=0 ttl=57 time=9.812 ms
64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=10.204 ms

--- 1.1.1.1 ping statistics ---
2 packets transmitted, 2 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 9.812/10.008/10.204/0.196 ms
";

    const WINDOWS_OK: &str = "\
Pinging 192.168.1.1 with 32 bytes of data:
Reply from 192.168.1.1: bytes=32 time=3ms TTL=64
Reply from 192.168.1.1: bytes=32 time<1ms TTL=64
Request timed out.
Reply from 192.168.1.1: bytes=32 time=2ms TTL=64

Ping statistics for 192.168.1.1:
    Packets: Sent = 4, Received = 3, Lost = 1 (25% loss),
Approximate round trip times in milli-seconds:
    Minimum = 0ms, Maximum = 3ms, Average = 1ms
";

    const LINUX_SILENT: &str = "\
PING 10.255.255.1 (10.255.255.1) 56(84) bytes of data.

--- 10.255.255.1 ping statistics ---
3 packets transmitted, 0 received, 100% packet loss, time 2049ms
";

    fn output(stdout: &str, code: i32) -> ToolOutput {
        ToolOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(code),
        }
    }

    #[test]
    fn linux_rtts_and_summary() {
        assert_eq!(parse_rtts(LINUX_OK), vec![12.3, 13.1, 11.9]);
        let s = parse_summary(Platform::Linux, LINUX_OK).unwrap();
        assert_eq!((s.transmitted, s.received), (4, 3));
        assert_eq!(s.loss_percent, 25.0);
    }

    #[test]
    fn macos_summary_has_packets_received() {
        assert_eq!(parse_rtts(MACOS_OK), vec![9.812, 10.204]);
        let s = parse_summary(Platform::MacOs, MACOS_OK).unwrap();
        assert_eq!((s.transmitted, s.received), (2, 2));
        assert_eq!(s.loss_percent, 0.0);
    }

    #[test]
    fn windows_rtts_including_sub_millisecond() {
        assert_eq!(parse_rtts(WINDOWS_OK), vec![3.0, 1.0, 2.0]);
        let s = parse_summary(Platform::Windows, WINDOWS_OK).unwrap();
        assert_eq!((s.transmitted, s.received, s.loss_percent), (4, 3, 25.0));
    }

    #[test]
    fn rtts_survive_missing_summary() {
        let truncated: String = LINUX_OK.lines().take(4).collect::<Vec<_>>().join("\n");
        assert_eq!(parse_rtts(&truncated).len(), 3);
        assert!(parse_summary(Platform::Linux, &truncated).is_none());
        let stats = build_statistics("8.8.8.8", 4, Platform::Linux, &output(&truncated, 0));
        assert_eq!(stats.packets_sent, 4);
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.packet_loss_percent, 25.0);
    }

    #[test]
    fn duplicates_are_not_counted() {
        let out = "64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=9.8 ms\n\
                   64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=9.9 ms (DUP!)\n";
        assert_eq!(parse_rtts(out), vec![9.8]);
    }

    #[test]
    fn build_from_linux_partial_loss() {
        let stats = build_statistics("8.8.8.8", 4, Platform::Linux, &output(LINUX_OK, 0));
        assert_eq!(stats.status, PingStatus::Success);
        assert_eq!(stats.packets_sent, 4);
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.packet_loss_percent, 25.0);
        assert_eq!(stats.min_ms, Some(11.9));
        assert_eq!(stats.max_ms, Some(13.1));
    }

    #[test]
    fn silent_host_is_timeout_with_full_loss() {
        let stats = build_statistics("10.255.255.1", 3, Platform::Linux, &output(LINUX_SILENT, 1));
        assert_eq!(stats.status, PingStatus::Timeout);
        assert_eq!(stats.packet_loss_percent, 100.0);
        assert_eq!(stats.packets_received, 0);
        assert!(stats.avg_ms.is_none() && stats.stddev_ms.is_none());
    }

    #[test]
    fn unknown_host_is_unreachable() {
        let out = ToolOutput {
            stdout: String::new(),
            stderr: "ping: nosuchhost.invalid: Name or service not known\n".into(),
            exit_code: Some(2),
        };
        let stats = build_statistics("nosuchhost.invalid", 3, Platform::Linux, &out);
        assert_eq!(stats.status, PingStatus::Unreachable);
        assert!(stats.error_message.unwrap().contains("Name or service not known"));
    }

    #[test]
    fn args_follow_platform_flags() {
        let t = Duration::from_millis(5000);
        let i = Duration::from_millis(500);
        assert_eq!(
            ping_args(Platform::Linux, "h", 10, t, i),
            ["-c", "10", "-i", "0.5", "-W", "5", "h"]
        );
        assert_eq!(
            ping_args(Platform::MacOs, "h", 10, t, i),
            ["-c", "10", "-i", "0.5", "-W", "5000", "h"]
        );
        assert_eq!(
            ping_args(Platform::Windows, "h", 10, t, i),
            ["-n", "10", "-w", "5000", "h"]
        );
    }

    #[test]
    fn overall_limit_scales_with_count() {
        let limit = overall_limit(10, Duration::from_secs(5), Duration::from_millis(500));
        assert_eq!(limit, Duration::from_secs(60));
    }

    #[test]
    fn overall_limit_saturates_on_huge_inputs() {
        let limit = overall_limit(10_000, Duration::from_millis(u64::MAX), DEFAULT_INTERVAL);
        assert_eq!(limit, Duration::MAX);
    }

    #[tokio::test]
    async fn zero_count_rejected_before_running() {
        let err = ping_host("127.0.0.1", 0, DEFAULT_TIMEOUT, DEFAULT_INTERVAL)
            .await
            .unwrap_err();
        assert_eq!(err, DiagError::InvalidCount(0));
        assert_eq!(
            ping_host("", 1, DEFAULT_TIMEOUT, DEFAULT_INTERVAL).await.unwrap_err(),
            DiagError::EmptyHost
        );
    }
}
