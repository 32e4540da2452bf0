//! mDNS/DNS-SD publisher for `_uscan._tcp` and `_uscans._tcp` (spec.md
//! §4.9, §6 "Discovery wire protocols"): the aggregator only ever sees
//! structured [`Finding`]s, this module owns the raw packet handling via
//! `mdns-sd`.

use std::time::Duration;

use escl_proto::{DiscoveryMethod, Endpoint, Finding, ProtocolKind};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

const SERVICE_TYPES: &[(&str, ProtocolSpec)] = &[
    ("_uscan._tcp.local.", ProtocolSpec { protocol: ProtocolKind::Escl, tls: false }),
    ("_uscans._tcp.local.", ProtocolSpec { protocol: ProtocolKind::Escl, tls: true }),
];

struct ProtocolSpec {
    protocol: ProtocolKind,
    tls: bool,
}

/// Browses every configured service type for `timeout`, returning every
/// finding observed. `ifindex` is folded in by the caller since `mdns-sd`
/// doesn't expose which interface an advertisement arrived on per-packet;
/// callers running one daemon per interface pass that interface's index.
pub async fn browse(ifindex: u32, timeout: Duration) -> Result<Vec<Finding>, String> {
    let daemon = ServiceDaemon::new().map_err(|e| e.to_string())?;
    let mut findings = Vec::new();

    for (service_type, spec) in SERVICE_TYPES {
        let receiver = daemon.browse(service_type).map_err(|e| e.to_string())?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    findings.push(to_finding(ifindex, spec, &info));
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => break,
                Err(_) => break,
            }
        }
        let _ = daemon.stop_browse(service_type);
    }

    let _ = daemon.shutdown();
    Ok(findings)
}

fn to_finding(ifindex: u32, spec: &ProtocolSpec, info: &ServiceInfo) -> Finding {
    let addrs: Vec<_> = info.get_addresses().iter().copied().collect();
    let port = info.get_port();
    let properties = info.get_properties();

    let uuid = properties.get("uuid").map(|v| v.val_str().to_owned());
    let model = properties
        .get("ty")
        .or_else(|| properties.get("model"))
        .map(|v| v.val_str().to_owned());
    let rs = properties
        .get("rs")
        .map(|v| v.val_str().trim_start_matches('/').to_owned())
        .unwrap_or_else(|| "eSCL".to_owned());

    let scheme = if spec.tls { "https" } else { "http" };
    let endpoints = addrs
        .iter()
        .map(|addr| Endpoint {
            protocol: spec.protocol,
            uri: format!("{scheme}://{}:{port}/{rs}/", format_host(addr)),
        })
        .collect();

    Finding {
        method: DiscoveryMethod::Mdns,
        ifindex,
        name: Some(info.get_fullname().to_owned()),
        model,
        uuid,
        addrs,
        endpoints,
    }
}

fn format_host(addr: &std::net::IpAddr) -> String {
    match addr {
        std::net::IpAddr::V6(v6) => format!("[{v6}]"),
        std::net::IpAddr::V4(v4) => v4.to_string(),
    }
}
