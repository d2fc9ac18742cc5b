use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use net_triage_rs::latency::{JitterThresholds, LatencyReport};
use net_triage_rs::server::{self, ScanResponse};
use net_triage_rs::types::{PingStatistics, PortProbeResult, ScanSummary, TraceReport};
use net_triage_rs::{ping, ports, scanner, summary, trace};

/// net-triage-rs: TCP port reachability, ping jitter/loss and hop-by-hop path latency.
#[derive(Debug, Parser)]
#[command(
    name = "net-triage-rs",
    version,
    about = "TCP port reachability, ping jitter/loss and hop-by-hop path latency.",
    long_about = None
)]
struct Cli {
    /// Enable debug logging for the engine (overridden by RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe TCP ports on a host.
    Scan {
        host: String,

        /// Ports: `22,80,443`, ranges like `8000-8010`, or `common`.
        #[arg(long, default_value = "common")]
        ports: String,

        /// Read ports from a file (one port or range per line) instead of --ports.
        #[arg(long = "ports-file")]
        ports_file: Option<PathBuf>,

        /// Max concurrent TCP connect attempts.
        #[arg(long, default_value_t = scanner::DEFAULT_MAX_CONCURRENCY)]
        concurrency: usize,

        /// Socket connect timeout in milliseconds.
        #[arg(long = "timeout-ms", default_value_t = 3000)]
        timeout_ms: u64,

        /// Only list open ports.
        #[arg(long = "open-only", default_value_t = false)]
        open_only: bool,

        /// Write results as pretty JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Measure round-trip latency, jitter and loss with ping.
    Ping {
        host: String,

        #[arg(short = 'c', long, default_value_t = ping::DEFAULT_COUNT)]
        count: u32,

        /// Per-reply timeout in milliseconds.
        #[arg(long = "timeout-ms", default_value_t = 5000)]
        timeout_ms: u64,

        #[arg(long = "interval-ms", default_value_t = 500)]
        interval_ms: u64,

        /// Jitter below this (ms) is rated excellent.
        #[arg(long = "jitter-excellent", default_value_t = 2.0)]
        jitter_excellent: f64,

        /// Jitter up to this (ms) is rated good; above is poor.
        #[arg(long = "jitter-good", default_value_t = 5.0)]
        jitter_good: f64,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Trace the path to a host with per-hop latency.
    Trace {
        host: String,

        #[arg(long = "max-hops", default_value_t = trace::DEFAULT_MAX_HOPS)]
        max_hops: u32,

        /// Per-hop timeout in milliseconds.
        #[arg(long = "timeout-ms", default_value_t = 5000)]
        timeout_ms: u64,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Serve the JSON API consumed by the dashboard.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Scan {
            host,
            ports,
            ports_file,
            concurrency,
            timeout_ms,
            open_only,
            output,
        } => {
            let port_list = match ports_file {
                Some(path) => ports::load_ports_from_path(&path)?,
                None => ports::parse_ports_str(&ports).context("invalid --ports value")?,
            };
            let port_list: Vec<u32> = port_list.into_iter().map(u32::from).collect();

            // Ctrl-C cancels the scan; finished ports are still reported.
            let cancel = CancellationToken::new();
            let cancel_ctrlc = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                cancel_ctrlc.cancel();
            });

            println!(
                "Scanning {} ports on {} (concurrency {}, timeout {}ms)...",
                port_list.len(),
                host,
                concurrency,
                timeout_ms
            );
            let results = scanner::scan_ports_with_cancel(
                &host,
                &port_list,
                Duration::from_millis(timeout_ms),
                concurrency,
                cancel,
            )
            .await;
            let summary = summary::summarize_scan(&results);
            print_scan_table(&results, &summary, open_only);

            if let Some(path) = output.as_deref() {
                write_json(path, &ScanResponse { results, summary })?;
            }
        }
        Command::Ping {
            host,
            count,
            timeout_ms,
            interval_ms,
            jitter_excellent,
            jitter_good,
            output,
        } => {
            let stats = ping::ping_host(
                &host,
                count,
                Duration::from_millis(timeout_ms),
                Duration::from_millis(interval_ms),
            )
            .await?;
            let thresholds = JitterThresholds {
                excellent_below_ms: jitter_excellent,
                good_up_to_ms: jitter_good,
            };
            let report = LatencyReport::from_stats(&stats, &thresholds);
            print_ping(&stats, &report);

            if let Some(path) = output.as_deref() {
                write_json(path, &report)?;
            }
        }
        Command::Trace {
            host,
            max_hops,
            timeout_ms,
            output,
        } => {
            println!("Tracing path to {} (max {} hops)...", host, max_hops);
            let report =
                trace::trace_path(&host, max_hops, Duration::from_millis(timeout_ms)).await?;
            print_trace(&report);

            if let Some(path) = output.as_deref() {
                write_json(path, &report)?;
            }
        }
        Command::Serve { bind } => {
            println!("API server starting at http://{} (Ctrl+C to stop)", bind);
            tokio::select! {
                res = server::spawn_server(&bind) => res?,
                _ = tokio::signal::ctrl_c() => println!("Shutting down."),
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "info,net_triage_rs=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_scan_table(results: &[PortProbeResult], summary: &ScanSummary, open_only: bool) {
    let rows: Vec<&PortProbeResult> = results
        .iter()
        .filter(|r| !open_only || r.is_open())
        .collect();

    let port_w = 5usize;
    let status_w = "filtered".len();
    let mut service_w = "service".len();
    for r in &rows {
        service_w = service_w.max(r.service_name.as_deref().map_or(0, str::len));
    }
    let time_w = "time_ms".len().max(9);

    println!(
        "\nOpen: {}  Closed: {}  Filtered: {}  Timeout: {}  Error: {}  (scanned: {})",
        summary.open_count,
        summary.closed_count,
        summary.filtered_count,
        summary.timeout_count,
        summary.error_count,
        summary.total_scanned
    );
    println!(
        "{:>port_w$}  {:<status_w$}  {:<service_w$}  {:>time_w$}  detail",
        "port",
        "status",
        "service",
        "time_ms",
        port_w = port_w,
        status_w = status_w,
        service_w = service_w,
        time_w = time_w
    );
    println!(
        "{:-<port_w$}  {:-<status_w$}  {:-<service_w$}  {:-<time_w$}  {:-<6}",
        "",
        "",
        "",
        "",
        "",
        port_w = port_w,
        status_w = status_w,
        service_w = service_w,
        time_w = time_w
    );
    for r in rows {
        println!(
            "{:>port_w$}  {:<status_w$}  {:<service_w$}  {:>time_w$.1}  {}",
            r.port,
            r.status,
            r.service_name.as_deref().unwrap_or("-"),
            r.response_time_ms,
            r.error_detail.as_deref().unwrap_or(""),
            port_w = port_w,
            status_w = status_w,
            service_w = service_w,
            time_w = time_w
        );
    }
    if summary.total_scanned > 0 {
        println!(
            "\nResponse time min/avg/max: {:.1}/{:.1}/{:.1} ms",
            summary.min_response_time_ms,
            summary.avg_response_time_ms,
            summary.max_response_time_ms
        );
    }
}

fn print_ping(stats: &PingStatistics, report: &LatencyReport) {
    println!("\nHost: {}  status: {:?}", stats.host, stats.status);
    println!(
        "Packets: {} sent, {} received, {:.1}% loss",
        stats.packets_sent, stats.packets_received, stats.packet_loss_percent
    );
    if let (Some(min), Some(avg), Some(max), Some(dev)) =
        (stats.min_ms, stats.avg_ms, stats.max_ms, stats.stddev_ms)
    {
        println!("Min/Avg/Max: {:.2}/{:.2}/{:.2} ms", min, avg, max);
        println!("Jitter (stddev): {:.2} ms", dev);
    }
    if let Some(q) = report.jitter_quality {
        println!("Jitter quality: {:?}", q);
    }
    if let Some(msg) = &stats.error_message {
        println!("Note: {}", msg);
    }
}

fn print_trace(report: &TraceReport) {
    println!("\n{} ({:?})", report.message, report.status);
    for hop in &report.hops {
        let addr = hop.ip_address.as_deref().unwrap_or("*");
        let name = hop.hostname.as_deref().unwrap_or("");
        let rtts: Vec<String> = hop.rtt_ms.iter().map(|r| format!("{:.2} ms", r)).collect();
        let avg = hop
            .average_rtt()
            .map(|a| format!("avg {:.2} ms", a))
            .unwrap_or_else(|| "timeout".to_string());
        println!(
            "{:>3}  {:<39}  {:<30}  {:<30}  {}",
            hop.hop_number,
            addr,
            name,
            rtts.join("  "),
            avg
        );
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    println!("Wrote JSON results to {}", path.display());
    Ok(())
}
