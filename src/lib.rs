//! Library crate for net-triage-rs: TCP port probing, ping statistics and path tracing.
pub mod error;
pub mod latency;
pub mod ping;
pub mod platform;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod services;
pub mod summary;
pub mod trace;
pub mod types;

pub use error::DiagError;
pub use ping::ping_host;
pub use probe::probe_port;
pub use scanner::scan_ports;
pub use summary::summarize_scan;
pub use trace::trace_path;
