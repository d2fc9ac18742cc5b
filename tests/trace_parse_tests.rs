use std::net::IpAddr;

use net_triage_rs::platform::Platform;
use net_triage_rs::trace::{finalize_hops, parse_discovery, parse_mtr_raw};
use net_triage_rs::types::HopStatus;

const LINUX_TRACEROUTE: &str = "\
traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets
 1  _gateway (192.168.1.1)  0.512 ms  0.470 ms  0.455 ms
 2  100.64.0.1 (100.64.0.1)  4.210 ms  4.198 ms  4.187 ms
 3  isp-core.example.net (203.0.113.9)  6.002 ms  5.981 ms  6.120 ms
 4  203.0.113.17 (203.0.113.17)  7.400 ms  7.390 ms  7.512 ms
 5  * * *
 6  72.14.204.1 (72.14.204.1)  9.914 ms  9.870 ms  9.855 ms
 7  dns.google (8.8.8.8)  10.101 ms  10.044 ms  10.020 ms
";

const WINDOWS_TRACERT: &str = "\

Tracing route to dns.google [8.8.8.8]
over a maximum of 30 hops:

  1    <1 ms    <1 ms    <1 ms  192.168.1.1
  2     *        *        *     Request timed out.
  3    10 ms     9 ms    11 ms  dns.google [8.8.8.8]

Trace complete.
";

#[test]
fn silent_hop_recorded_and_trace_continues() {
    let hops = parse_discovery(Platform::Linux, LINUX_TRACEROUTE);
    let dest: IpAddr = "8.8.8.8".parse().unwrap();
    let hops = finalize_hops(hops, 30, Some(dest));

    assert_eq!(hops.len(), 7);
    assert_eq!(hops[4].hop_number, 5);
    assert_eq!(hops[4].status, HopStatus::Timeout);
    assert!(hops[4].rtt_ms.is_empty());
    assert_eq!(hops[4].average_rtt(), None);
    assert_eq!(hops[5].status, HopStatus::Responsive);
    assert_eq!(hops[6].ip_address.as_deref(), Some("8.8.8.8"));
    assert_eq!(hops[6].hostname.as_deref(), Some("dns.google"));
    assert_eq!(hops[2].hostname.as_deref(), Some("isp-core.example.net"));
    assert!(hops.iter().all(|h| h.rtt_ms.len() <= 3));
}

#[test]
fn trace_never_exceeds_max_hops() {
    let hops = parse_discovery(Platform::Linux, LINUX_TRACEROUTE);
    let capped = finalize_hops(hops, 4, None);
    assert_eq!(capped.len(), 4);
    assert_eq!(capped.last().unwrap().hop_number, 4);
}

#[test]
fn hop_numbers_contiguous() {
    let hops = finalize_hops(parse_discovery(Platform::Linux, LINUX_TRACEROUTE), 30, None);
    for (i, hop) in hops.iter().enumerate() {
        assert_eq!(hop.hop_number as usize, i + 1);
    }
}

#[test]
fn tracert_output_normalized() {
    let hops = parse_discovery(Platform::Windows, WINDOWS_TRACERT);
    assert_eq!(hops.len(), 3);
    assert_eq!(hops[0].rtt_ms, vec![1.0, 1.0, 1.0]);
    assert_eq!(hops[0].ip_address.as_deref(), Some("192.168.1.1"));
    assert_eq!(hops[1].status, HopStatus::Timeout);
    assert_eq!(hops[1].ip_address, None);
    assert_eq!(hops[2].hostname.as_deref(), Some("dns.google"));
    assert_eq!(hops[2].ip_address.as_deref(), Some("8.8.8.8"));
    assert_eq!(hops[2].average_rtt(), Some(10.0));
}

#[test]
fn tracert_unreachable_report_is_error() {
    let hops = parse_discovery(
        Platform::Windows,
        "  4  192.168.1.1  reports: Destination host unreachable.\n",
    );
    assert_eq!(hops[0].status, HopStatus::Error);
    assert_eq!(hops[0].ip_address.as_deref(), Some("192.168.1.1"));
}

#[test]
fn mtr_gaps_become_timeouts_and_stop_at_destination() {
    let raw = "\
x 0 0
h 0 192.168.1.1
p 0 480 0
h 1 100.64.0.1
p 1 4100 1
x 2 2
h 3 8.8.8.8
d 3 dns.google
p 3 10050 3
p 3 10110 4
p 3 9980 5
p 3 10200 6
";
    let dest: IpAddr = "8.8.8.8".parse().unwrap();
    let hops = finalize_hops(parse_mtr_raw(raw), 30, Some(dest));
    assert_eq!(hops.len(), 4);
    assert_eq!(hops[2].status, HopStatus::Timeout);
    assert_eq!(hops[3].rtt_ms.len(), 3);
    assert_eq!(hops[3].hostname.as_deref(), Some("dns.google"));
    assert!((hops[0].rtt_ms[0] - 0.48).abs() < 1e-9);
}
