use std::time::Duration;
use thiserror::Error;

/// Malformed calls, rejected before any socket or process activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiagError {
    #[error("host must not be empty")]
    EmptyHost,
    #[error("sample count must be at least 1 (got {0})")]
    InvalidCount(u32),
    #[error("max hops must be between 1 and 255 (got {0})")]
    InvalidMaxHops(u32),
    #[error("invalid port range {0}-{1}: both bounds must be between 1 and 65535")]
    InvalidPortRange(u32, u32),
}

/// Failure to run an external diagnostic tool.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{tool} command not found; {hint}")]
    NotFound { tool: String, hint: &'static str },
    #[error("{tool} did not finish within {}s", .limit.as_secs())]
    TimedOut { tool: String, limit: Duration },
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}
