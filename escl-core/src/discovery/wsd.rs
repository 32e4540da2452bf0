//! WS-Discovery probe publisher (spec.md §4.9, §6 "Discovery wire
//! protocols"): sends a directed multicast `wsd:Probe` for the WSD scan
//! device type and collects `wsd:ProbeMatches` replies for `timeout`.
//!
//! This is deliberately narrow — spec.md §1 Non-goals excludes "a full
//! WS-Eventing subscription layer beyond what is needed to send directed
//! probes" — so there is no subscribe/renew/unsubscribe here, just the
//! probe/match round trip the aggregator needs to turn into [`Finding`]s.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use escl_proto::{DiscoveryMethod, Endpoint, Finding, ProtocolKind};
use tokio::net::UdpSocket;

use crate::xml::{NsRule, XmlReader};

const WSD_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const WSD_PORT: u16 = 3702;
const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const WSD_NS: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";
const WSCN_NS: &str = "http://schemas.microsoft.com/windows/2006/08/wdp/scan";

fn ns_rules() -> Vec<NsRule> {
    vec![
        NsRule::new("wsa", WSA_NS),
        NsRule::new("wsd", WSD_NS),
        NsRule::new("wscn", WSCN_NS),
    ]
}

fn probe_envelope(message_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="{WSA_NS}" xmlns:wsd="{WSD_NS}" xmlns:wscn="{WSCN_NS}">
  <soap:Header>
    <wsa:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</wsa:Action>
    <wsa:MessageID>{message_id}</wsa:MessageID>
    <wsa:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</wsa:To>
  </soap:Header>
  <soap:Body>
    <wsd:Probe>
      <wsd:Types>wscn:ScanDeviceType</wsd:Types>
    </wsd:Probe>
  </soap:Body>
</soap:Envelope>"#
    )
}

/// Sends one multicast probe on `ifindex`'s local interface and collects
/// replies for `timeout`. Best-effort: a bind/send failure is reported, but
/// a timeout with zero replies is simply an empty result, not an error —
/// "no WSD scanners on this segment" is the common case.
pub async fn probe(ifindex: u32, timeout: Duration) -> Result<Vec<Finding>, String> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    socket
        .join_multicast_v4(WSD_MULTICAST_ADDR, Ipv4Addr::UNSPECIFIED)
        .map_err(|e| format!("join_multicast_v4 failed: {e}"))?;

    let message_id = format!("urn:uuid:probe-{ifindex}");
    let envelope = probe_envelope(&message_id);
    let dest = SocketAddr::from((WSD_MULTICAST_ADDR, WSD_PORT));
    socket
        .send_to(envelope.as_bytes(), dest)
        .await
        .map_err(|e| format!("send_to failed: {e}"))?;

    let mut findings = Vec::new();
    let mut buf = [0u8; 8192];
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, _from))) => {
                if let Some(finding) = parse_probe_match(&buf[..n], ifindex) {
                    findings.push(finding);
                }
            }
            Ok(Err(_)) | Err(_) => break,
        }
    }

    Ok(findings)
}

/// Parses one `wsd:ProbeMatch` reply into a [`Finding`]. Devices that
/// don't advertise the scan device type, or that reply with an unparsable
/// envelope, are silently skipped — they are not scanners this driver cares
/// about, not an error condition.
fn parse_probe_match(body: &[u8], ifindex: u32) -> Option<Finding> {
    let mut r = XmlReader::parse(body, &ns_rules()).ok()?;
    let root_depth = r.depth();
    let mut uuid = None;
    let mut xaddrs_raw = None;

    while r.deep_next(root_depth) {
        match r.name() {
            "wsa:Address" => uuid = Some(r.value().trim_start_matches("urn:uuid:").to_owned()),
            "wsd:XAddrs" => xaddrs_raw = Some(r.value().to_owned()),
            _ => {}
        }
    }

    let endpoints: Vec<Endpoint> = xaddrs_raw?
        .split_whitespace()
        .map(|uri| Endpoint { protocol: ProtocolKind::Wsd, uri: uri.to_owned() })
        .collect();
    if endpoints.is_empty() {
        return None;
    }

    Some(Finding {
        method: DiscoveryMethod::WsDiscovery,
        ifindex,
        name: None,
        model: None,
        uuid,
        addrs: Vec::new(),
        endpoints,
    })
}
