use serde::{Deserialize, Serialize};

/// Outcome of a single TCP connect probe.
///
/// `Open`, `Closed`, `Filtered` and `Timeout` are expected network outcomes;
/// `Error` is reserved for invalid input, resolution failures and internal faults.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    Open,
    Closed,
    Filtered,
    Timeout,
    Error,
}

impl PortStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortStatus::Open => "open",
            PortStatus::Closed => "closed",
            PortStatus::Filtered => "filtered",
            PortStatus::Timeout => "timeout",
            PortStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for PortStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One port's probe outcome.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PortProbeResult {
    pub host: String,
    /// Kept wider than `u16` so out-of-range input can be reported back as-is.
    pub port: u32,
    pub status: PortStatus,
    pub service_name: Option<String>,
    pub response_time_ms: f64,
    /// Present only when `status == Error`.
    pub error_detail: Option<String>,
    /// Set when the scan was cancelled before this port produced an outcome.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    pub timestamp: String,
}

impl PortProbeResult {
    pub fn is_open(&self) -> bool {
        self.status == PortStatus::Open
    }
}

/// Aggregate view over a set of probe results.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ScanSummary {
    pub total_scanned: usize,
    pub open_count: usize,
    pub closed_count: usize,
    pub filtered_count: usize,
    pub timeout_count: usize,
    pub error_count: usize,
    pub open_ports: Vec<(u32, Option<String>)>,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PingStatus {
    Success,
    Unreachable,
    Timeout,
    Error,
}

/// One ping sampling run against one host.
///
/// RTT aggregates are `None` unless at least one reply was received.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PingStatistics {
    pub host: String,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packet_loss_percent: f64,
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub stddev_ms: Option<f64>,
    pub individual_rtts: Vec<f64>,
    pub status: PingStatus,
    pub error_message: Option<String>,
}

impl PingStatistics {
    /// A run that produced no usable replies.
    pub fn failed(
        host: &str,
        packets_sent: u32,
        status: PingStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            host: host.to_string(),
            packets_sent,
            packets_received: 0,
            packet_loss_percent: 100.0,
            min_ms: None,
            avg_ms: None,
            max_ms: None,
            stddev_ms: None,
            individual_rtts: Vec::new(),
            status,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HopStatus {
    Responsive,
    Timeout,
    Error,
}

/// One hop along a traced path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TracerouteHop {
    pub hop_number: u32,
    pub ip_address: Option<String>,
    pub hostname: Option<String>,
    /// At most three samples.
    pub rtt_ms: Vec<f64>,
    pub status: HopStatus,
}

impl TracerouteHop {
    pub const MAX_SAMPLES: usize = 3;

    /// A hop that never answered.
    pub fn silent(hop_number: u32) -> Self {
        Self {
            hop_number,
            ip_address: None,
            hostname: None,
            rtt_ms: Vec::new(),
            status: HopStatus::Timeout,
        }
    }

    /// Mean of the present RTT samples, `None` when there are none.
    pub fn average_rtt(&self) -> Option<f64> {
        if self.rtt_ms.is_empty() {
            return None;
        }
        Some(self.rtt_ms.iter().sum::<f64>() / self.rtt_ms.len() as f64)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Success,
    Timeout,
    Error,
}

/// Result of one path trace, whichever tool produced it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TraceReport {
    pub host: String,
    pub destination: Option<String>,
    /// Name of the tool that produced the hops, if one was selected.
    pub tool: Option<String>,
    pub hops: Vec<TracerouteHop>,
    pub status: TraceStatus,
    pub message: String,
}
