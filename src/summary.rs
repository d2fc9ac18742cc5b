use crate::types::{PortProbeResult, PortStatus, ScanSummary};

/// Reduce probe results to counts and timing statistics.
///
/// Order-independent: the same multiset of results gives the same summary.
/// Timing aggregates cover every result, `Error` ones included, since each
/// carries a measured `response_time_ms`. With no results the timings are 0.
pub fn summarize_scan(results: &[PortProbeResult]) -> ScanSummary {
    let mut summary = ScanSummary {
        total_scanned: results.len(),
        ..Default::default()
    };

    for r in results {
        match r.status {
            PortStatus::Open => summary.open_count += 1,
            PortStatus::Closed => summary.closed_count += 1,
            PortStatus::Filtered => summary.filtered_count += 1,
            PortStatus::Timeout => summary.timeout_count += 1,
            PortStatus::Error => summary.error_count += 1,
        }
    }

    let mut open: Vec<&PortProbeResult> = results.iter().filter(|r| r.is_open()).collect();
    open.sort_by_key(|r| r.port);
    summary.open_ports = open
        .into_iter()
        .map(|r| (r.port, r.service_name.clone()))
        .collect();

    if !results.is_empty() {
        let times = results.iter().map(|r| r.response_time_ms);
        summary.min_response_time_ms = times.clone().fold(f64::INFINITY, f64::min);
        summary.max_response_time_ms = times.clone().fold(f64::NEG_INFINITY, f64::max);
        // Sum in port order so the mean does not depend on input order.
        let mut sorted: Vec<(u32, f64)> = results.iter().map(|r| (r.port, r.response_time_ms)).collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        let total: f64 = sorted.iter().map(|(_, t)| t).sum();
        summary.avg_response_time_ms = total / results.len() as f64;
    }

    summary
}
