//! Path tracer: hop-by-hop latency along the route to a host.
//!
//! Tool selection walks [`TOOL_CHAIN`] in order and commits to the first tool
//! found on `PATH`:
//!
//! 1. `mtr` in raw mode, which reports every probe's RTT per hop in one pass.
//! 2. `traceroute` (`tracert` on Windows) to discover the path, followed by a
//!    few targeted pings per responding hop to measure it.
//!
//! Once a tool is chosen there is no second attempt with the next one.

use std::net::IpAddr;
use std::time::Duration;

use tokio::net::lookup_host;
use tracing::{debug, info, warn};

use crate::error::{DiagError, ToolError};
use crate::ping;
use crate::platform::{self, find_executable, Platform};
use crate::types::{HopStatus, PingStatus, TraceReport, TraceStatus, TracerouteHop};

pub const DEFAULT_MAX_HOPS: u32 = 30;
pub const DEFAULT_HOP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Probes per hop, for both tools and for the targeted pings.
const PROBES_PER_HOP: u32 = 3;
const HOP_PING_INTERVAL: Duration = Duration::from_millis(200);
const OVERALL_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceTool {
    /// Reports hop and RTT together.
    Mtr,
    /// Hop discovery only; latency comes from follow-up pings.
    Traceroute,
}

/// Tools in order of preference.
pub const TOOL_CHAIN: [TraceTool; 2] = [TraceTool::Mtr, TraceTool::Traceroute];

impl TraceTool {
    pub fn binary(&self, platform: Platform) -> &'static str {
        match (self, platform) {
            (TraceTool::Mtr, _) => "mtr",
            (TraceTool::Traceroute, Platform::Windows) => "tracert",
            (TraceTool::Traceroute, _) => "traceroute",
        }
    }
}

/// First tool in `chain` whose binary `is_available` accepts.
pub fn select_tool(
    chain: &[TraceTool],
    platform: Platform,
    is_available: impl Fn(&str) -> bool,
) -> Option<TraceTool> {
    chain
        .iter()
        .copied()
        .find(|tool| is_available(tool.binary(platform)))
}

pub fn mtr_args(host: &str, max_hops: u32, timeout: Duration) -> Vec<String> {
    vec![
        "--raw".into(),
        "--report-cycles".into(),
        PROBES_PER_HOP.to_string(),
        "--max-ttl".into(),
        max_hops.to_string(),
        "--gracetime".into(),
        platform::ceil_secs(timeout).to_string(),
        host.to_string(),
    ]
}

pub fn traceroute_args(platform: Platform, host: &str, max_hops: u32, timeout: Duration) -> Vec<String> {
    match platform {
        Platform::Windows => vec![
            "-h".into(),
            max_hops.to_string(),
            "-w".into(),
            timeout.as_millis().to_string(),
            host.to_string(),
        ],
        _ => vec![
            "-m".into(),
            max_hops.to_string(),
            "-w".into(),
            platform::ceil_secs(timeout).to_string(),
            "-q".into(),
            PROBES_PER_HOP.to_string(),
            host.to_string(),
        ],
    }
}

/// Parse `mtr --raw` output.
///
/// Lines are `h <pos> <ip>`, `d <pos> <name>` and `p <pos> <usec> <seq>`, with
/// `pos` the zero-based TTL index. Positions that never answered produce no
/// lines at all; [`finalize_hops`] fills them in.
pub fn parse_mtr_raw(output: &str) -> Vec<TracerouteHop> {
    let mut hops: Vec<TracerouteHop> = Vec::new();

    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(kind), Some(pos)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(pos) = pos.parse::<u32>() else {
            continue;
        };
        let value = parts.next();
        let hop_number = pos + 1;

        let idx = match hops.iter().position(|h| h.hop_number == hop_number) {
            Some(i) => i,
            None => {
                hops.push(TracerouteHop::silent(hop_number));
                hops.len() - 1
            }
        };
        let hop = &mut hops[idx];

        match (kind, value) {
            ("h", Some(ip)) if hop.ip_address.is_none() => {
                hop.ip_address = Some(ip.to_string());
                hop.status = HopStatus::Responsive;
            }
            ("d", Some(name)) if hop.hostname.is_none() => {
                if hop.ip_address.as_deref() != Some(name) {
                    hop.hostname = Some(name.to_string());
                }
            }
            ("p", Some(usec)) => {
                if let Ok(usec) = usec.parse::<f64>() {
                    if hop.rtt_ms.len() < TracerouteHop::MAX_SAMPLES {
                        hop.rtt_ms.push(usec / 1000.0);
                    }
                }
            }
            _ => {}
        }
    }

    hops.sort_by_key(|h| h.hop_number);
    hops
}

/// Parse Unix `traceroute` output (Linux and BSD/macOS share the layout).
///
/// ```text
///  1  _gateway (192.168.1.1)  0.512 ms  0.470 ms  0.455 ms
///  2  * * *
///  3  10.0.0.1 (10.0.0.1)  8.1 ms !H  * *
/// ```
pub fn parse_traceroute(output: &str) -> Vec<TracerouteHop> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let hop_number = tokens.first()?.parse::<u32>().ok()?;
            let mut hop = TracerouteHop::silent(hop_number);
            let mut flagged = false;
            let mut name: Option<&str> = None;

            let mut i = 1;
            while i < tokens.len() {
                let tok = tokens[i];
                if tok == "*" || tok == "ms" {
                    // no reply / unit
                } else if tok.starts_with('!') {
                    flagged = true;
                } else if let Some(inner) = tok.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
                    if hop.ip_address.is_none() {
                        hop.ip_address = Some(inner.to_string());
                        hop.hostname = name.filter(|n| *n != inner).map(str::to_string);
                    }
                } else if tokens.get(i + 1) == Some(&"ms") {
                    if let Ok(v) = tok.parse::<f64>() {
                        if hop.rtt_ms.len() < TracerouteHop::MAX_SAMPLES {
                            hop.rtt_ms.push(v);
                        }
                    }
                } else if tok.parse::<IpAddr>().is_ok() && tokens.get(i + 1).map_or(true, |n| !n.starts_with('(')) {
                    // Numeric output (-n): bare address, no parenthesised copy.
                    if hop.ip_address.is_none() {
                        hop.ip_address = Some(tok.to_string());
                    }
                } else if name.is_none() {
                    name = Some(tok);
                }
                i += 1;
            }

            hop.status = hop_status(!hop.rtt_ms.is_empty(), flagged);
            Some(hop)
        })
        .collect()
}

/// Parse Windows `tracert` output.
///
/// ```text
///   1    <1 ms    <1 ms    <1 ms  192.168.1.1
///   2     *        *        *     Request timed out.
///   3    10 ms     9 ms    11 ms  dns.google [8.8.8.8]
/// ```
pub fn parse_tracert(output: &str) -> Vec<TracerouteHop> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let hop_number = tokens.first()?.parse::<u32>().ok()?;
            let mut hop = TracerouteHop::silent(hop_number);

            // RTT columns first, then the host part.
            let mut i = 1;
            while i < tokens.len() {
                let tok = tokens[i];
                if tok == "*" {
                    i += 1;
                } else if tokens.get(i + 1) == Some(&"ms") {
                    match tok.trim_start_matches('<').parse::<f64>() {
                        Ok(v) => {
                            if hop.rtt_ms.len() < TracerouteHop::MAX_SAMPLES {
                                hop.rtt_ms.push(v);
                            }
                            i += 2;
                        }
                        Err(_) => break,
                    }
                } else if let Some(v) = tok
                    .strip_suffix("ms")
                    .and_then(|t| t.trim_start_matches('<').parse::<f64>().ok())
                {
                    if hop.rtt_ms.len() < TracerouteHop::MAX_SAMPLES {
                        hop.rtt_ms.push(v);
                    }
                    i += 1;
                } else {
                    break;
                }
            }

            let tail = &tokens[i..];
            let flagged = tail.contains(&"reports:");
            let timed_out = tail.join(" ").contains("Request timed out");
            if !timed_out {
                match tail {
                    [name, bracketed, ..] if bracketed.starts_with('[') => {
                        hop.hostname = Some(name.to_string());
                        hop.ip_address =
                            Some(bracketed.trim_matches(|c| c == '[' || c == ']').to_string());
                    }
                    [addr, ..] if addr.parse::<IpAddr>().is_ok() => {
                        hop.ip_address = Some(addr.to_string());
                    }
                    _ => {}
                }
            }

            hop.status = hop_status(!hop.rtt_ms.is_empty(), flagged);
            Some(hop)
        })
        .collect()
}

fn hop_status(answered: bool, flagged: bool) -> HopStatus {
    match (answered, flagged) {
        (_, true) => HopStatus::Error,
        (true, false) => HopStatus::Responsive,
        (false, false) => HopStatus::Timeout,
    }
}

/// Hop-discovery parser for `platform`.
pub fn parse_discovery(platform: Platform, output: &str) -> Vec<TracerouteHop> {
    match platform {
        Platform::Windows => parse_tracert(output),
        _ => parse_traceroute(output),
    }
}

/// Normalize parsed hops into a contiguous trace.
///
/// Hops are ordered and numbered 1.., gaps become silent `Timeout` hops, the
/// trace is capped at `max_hops`, and it ends at the first hop whose address
/// is `destination`.
pub fn finalize_hops(
    mut hops: Vec<TracerouteHop>,
    max_hops: u32,
    destination: Option<IpAddr>,
) -> Vec<TracerouteHop> {
    hops.sort_by_key(|h| h.hop_number);
    hops.dedup_by_key(|h| h.hop_number);

    let mut out = Vec::with_capacity(hops.len());
    let mut expected = 1;
    for hop in hops.into_iter().filter(|h| h.hop_number >= 1) {
        if hop.hop_number > max_hops {
            break;
        }
        while expected < hop.hop_number {
            out.push(TracerouteHop::silent(expected));
            expected += 1;
        }
        let reached = match (destination, hop.ip_address.as_deref()) {
            (Some(dest), Some(ip)) => ip.parse::<IpAddr>().map_or(false, |ip| ip == dest),
            _ => false,
        };
        out.push(hop);
        expected += 1;
        if reached {
            break;
        }
    }
    out
}

/// Upper bound on a whole discovery run before the tool is killed.
pub fn overall_limit(max_hops: u32, timeout: Duration) -> Duration {
    timeout
        .saturating_mul(max_hops.saturating_mul(PROBES_PER_HOP))
        .saturating_add(OVERALL_SLACK)
}

/// Trace the path to `host`, with at most `max_hops` hops and `timeout` per hop.
///
/// Only malformed calls are `Err`. A missing tool, an unresolvable host or a
/// tool failure come back as a report with `TraceStatus::Error` and a message.
pub async fn trace_path(host: &str, max_hops: u32, timeout: Duration) -> Result<TraceReport, DiagError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(DiagError::EmptyHost);
    }
    if !(1..=255).contains(&max_hops) {
        return Err(DiagError::InvalidMaxHops(max_hops));
    }

    let platform = Platform::current();
    let mut report = TraceReport {
        host: host.to_string(),
        destination: None,
        tool: None,
        hops: Vec::new(),
        status: TraceStatus::Error,
        message: String::new(),
    };

    let Some(tool) = select_tool(&TOOL_CHAIN, platform, |bin| find_executable(bin).is_some()) else {
        let discovery = TraceTool::Traceroute.binary(platform);
        report.message = format!(
            "no path tracing tool found: neither mtr nor {discovery} is installed; {}",
            platform::install_hint(discovery)
        );
        warn!(host, "{}", report.message);
        return Ok(report);
    };
    let binary = tool.binary(platform);
    report.tool = Some(binary.to_string());
    info!(host, tool = binary, max_hops, "tracing path");

    let destination = match resolve_destination(host, timeout).await {
        Ok(ip) => ip,
        Err(message) => {
            report.message = message;
            return Ok(report);
        }
    };
    report.destination = Some(destination.to_string());

    let args = match tool {
        TraceTool::Mtr => mtr_args(host, max_hops, timeout),
        TraceTool::Traceroute => traceroute_args(platform, host, max_hops, timeout),
    };
    let limit = overall_limit(max_hops, timeout);

    let out = match platform::run_tool(binary, &args, limit).await {
        Ok(out) => out,
        Err(e) => {
            warn!(host, "{e}");
            report.status = match e {
                ToolError::TimedOut { .. } => TraceStatus::Timeout,
                _ => TraceStatus::Error,
            };
            report.message = e.to_string();
            return Ok(report);
        }
    };

    let parsed = match tool {
        TraceTool::Mtr => parse_mtr_raw(&out.stdout),
        TraceTool::Traceroute => parse_discovery(platform, &out.stdout),
    };
    if parsed.is_empty() {
        let reason = out
            .stderr
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no hops in output");
        report.message = format!("{binary} failed for {host}: {reason}");
        warn!(host, "{}", report.message);
        return Ok(report);
    }

    let mut hops = finalize_hops(parsed, max_hops, Some(destination));
    if tool == TraceTool::Traceroute {
        measure_hops(&mut hops, timeout).await;
    }

    let reached = hops
        .last()
        .and_then(|h| h.ip_address.as_deref())
        .and_then(|ip| ip.parse::<IpAddr>().ok())
        == Some(destination);
    report.message = match tool {
        TraceTool::Mtr => format!("mtr trace completed: {} hops", hops.len()),
        TraceTool::Traceroute => format!(
            "{binary} completed with per-hop ping latency: {} hops",
            hops.len()
        ),
    };
    if !reached {
        report.message.push_str(" (destination not reached)");
    }
    report.status = TraceStatus::Success;
    report.hops = hops;
    info!(host, hops = report.hops.len(), reached, "trace finished");
    Ok(report)
}

/// Replace discovery RTTs with targeted ping samples where the hop answers ping.
async fn measure_hops(hops: &mut [TracerouteHop], timeout: Duration) {
    for hop in hops.iter_mut().filter(|h| h.status == HopStatus::Responsive) {
        let Some(ip) = hop.ip_address.clone() else {
            continue;
        };
        match ping::ping_host(&ip, PROBES_PER_HOP, timeout, HOP_PING_INTERVAL).await {
            Ok(stats) if stats.status == PingStatus::Success => {
                hop.rtt_ms = stats
                    .individual_rtts
                    .into_iter()
                    .take(TracerouteHop::MAX_SAMPLES)
                    .collect();
            }
            Ok(stats) => debug!(
                hop = hop.hop_number,
                %ip,
                status = ?stats.status,
                "hop ignores ping, keeping discovery rtts"
            ),
            Err(e) => debug!(hop = hop.hop_number, %ip, "hop ping rejected: {e}"),
        }
    }
}

async fn resolve_destination(host: &str, timeout: Duration) -> Result<IpAddr, String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    match tokio::time::timeout(timeout, lookup_host((host, 0))).await {
        Ok(Ok(addrs)) => {
            let addrs: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            addrs
                .iter()
                .find(|ip| ip.is_ipv4())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_limit_covers_every_probe() {
        assert_eq!(
            overall_limit(30, Duration::from_secs(5)),
            Duration::from_secs(5 * 30 * 3 + 10)
        );
        assert_eq!(overall_limit(255, Duration::MAX), Duration::MAX);
    }

    #[test]
    fn chain_prefers_mtr() {
        let all = |_: &str| true;
        assert_eq!(select_tool(&TOOL_CHAIN, Platform::Linux, all), Some(TraceTool::Mtr));
    }

    #[test]
    fn chain_falls_back_to_platform_discovery_tool() {
        let only_tracert = |bin: &str| bin == "tracert";
        assert_eq!(
            select_tool(&TOOL_CHAIN, Platform::Windows, only_tracert),
            Some(TraceTool::Traceroute)
        );
        assert_eq!(select_tool(&TOOL_CHAIN, Platform::Linux, only_tracert), None);
    }

    #[test]
    fn mtr_raw_samples_in_milliseconds() {
        let raw = "h 0 192.168.1.1\nd 0 router.lan\np 0 1520 0\np 0 1380 1\np 0 1410 2\n\
                   h 1 10.0.0.1\np 1 8200 3\n";
        let hops = parse_mtr_raw(raw);
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].hostname.as_deref(), Some("router.lan"));
        assert_eq!(hops[0].rtt_ms, vec![1.52, 1.38, 1.41]);
        assert_eq!(hops[1].hop_number, 2);
        assert_eq!(hops[1].status, HopStatus::Responsive);
    }

    #[test]
    fn traceroute_flags_mark_error() {
        let hops = parse_traceroute(" 3  10.0.0.1 (10.0.0.1)  8.1 ms !H  * *\n");
        assert_eq!(hops[0].status, HopStatus::Error);
        assert_eq!(hops[0].rtt_ms, vec![8.1]);
        assert_eq!(hops[0].hostname, None);
    }

    #[test]
    fn traceroute_numeric_output() {
        let hops = parse_traceroute(" 1  192.168.1.1  0.5 ms  0.4 ms  0.4 ms\n");
        assert_eq!(hops[0].ip_address.as_deref(), Some("192.168.1.1"));
        assert_eq!(hops[0].hostname, None);
        assert_eq!(hops[0].rtt_ms.len(), 3);
    }

    #[test]
    fn finalize_fills_gaps_and_caps() {
        let hops = vec![
            TracerouteHop {
                hop_number: 3,
                ip_address: Some("10.0.0.3".into()),
                hostname: None,
                rtt_ms: vec![3.0],
                status: HopStatus::Responsive,
            },
            TracerouteHop {
                hop_number: 1,
                ip_address: Some("10.0.0.1".into()),
                hostname: None,
                rtt_ms: vec![1.0],
                status: HopStatus::Responsive,
            },
        ];
        let out = finalize_hops(hops.clone(), 30, None);
        assert_eq!(out.iter().map(|h| h.hop_number).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(out[1].status, HopStatus::Timeout);
        assert_eq!(finalize_hops(hops, 2, None).len(), 2);
    }

    #[test]
    fn finalize_stops_at_destination() {
        let hops = (1..=5)
            .map(|n| TracerouteHop {
                hop_number: n,
                ip_address: Some(format!("10.0.0.{n}")),
                hostname: None,
                rtt_ms: vec![n as f64],
                status: HopStatus::Responsive,
            })
            .collect();
        let dest: IpAddr = "10.0.0.3".parse().unwrap();
        let out = finalize_hops(hops, 30, Some(dest));
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].ip_address.as_deref(), Some("10.0.0.3"));
    }

    #[tokio::test]
    async fn invalid_arguments_rejected() {
        assert_eq!(
            trace_path("8.8.8.8", 0, DEFAULT_HOP_TIMEOUT).await.unwrap_err(),
            DiagError::InvalidMaxHops(0)
        );
        assert_eq!(
            trace_path(" ", 30, DEFAULT_HOP_TIMEOUT).await.unwrap_err(),
            DiagError::EmptyHost
        );
    }
}
