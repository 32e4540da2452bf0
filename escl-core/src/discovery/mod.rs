//! Discovery aggregator (spec.md §4.9) plus the method-specific publishers
//! that feed it: mDNS/DNS-SD (`_uscan._tcp`/`_uscans._tcp`), WS-Discovery
//! probes, and user-supplied hints.

mod aggregator;
mod mdns;
mod wsd;

pub use aggregator::Aggregator;
pub use mdns::browse as browse_mdns;
pub use wsd::probe as probe_wsd;

use std::time::Duration;

use escl_proto::{DeviceIdent, DiscoveryMethod, Endpoint, Finding, ProtocolKind};

use crate::error::DiscoveryError;

/// Runs every discovery method once against the given interface indices and
/// folds their findings into a fresh [`Aggregator`], waiting out the
/// publish delay so the returned list is the stable, de-duplicated view
/// spec.md §4.9 describes. Intended to run on the reactor thread; callers
/// needing periodic re-discovery just call this again and diff.
pub async fn discover_once(ifindexes: &[u32], timeout: Duration, hints: &[Finding]) -> Vec<DeviceIdent> {
    let mut aggregator = Aggregator::new();

    for &ifindex in ifindexes {
        match mdns::browse(ifindex, timeout).await {
            Ok(findings) => findings.into_iter().for_each(|f| aggregator.publish(f)),
            Err(e) => tracing::warn!(ifindex, error = %e, "mdns browse failed"),
        }
        match wsd::probe(ifindex, timeout).await {
            Ok(findings) => findings.into_iter().for_each(|f| aggregator.publish(f)),
            Err(e) => tracing::warn!(ifindex, error = %e, "ws-discovery probe failed"),
        }
    }
    for hint in hints {
        aggregator.publish(hint.clone());
    }

    // Every finding above was published well before this point, so the
    // publish delay has already elapsed for all of them; drain unconditionally.
    aggregator.drain_ready(std::time::Instant::now() + Duration::from_secs(2));
    aggregator.device_list()
}

/// Builds a [`Finding`] for a user-supplied hint (spec.md §2: "discovery
/// publishers" include "user-supplied hints" alongside mDNS/WSD) — a bare
/// URI the caller already knows points at a scanner, with no UUID to
/// dedupe on, so it always becomes its own device unless a later mDNS/WSD
/// finding happens to share its name.
pub fn hint_finding(name: &str, uri: &str, protocol: ProtocolKind) -> Result<Finding, DiscoveryError> {
    if uri.is_empty() {
        return Err(DiscoveryError::UnknownIdent(name.to_owned()));
    }
    Ok(Finding {
        method: DiscoveryMethod::Hint,
        ifindex: 0,
        name: Some(name.to_owned()),
        model: None,
        uuid: None,
        addrs: Vec::new(),
        endpoints: vec![Endpoint { protocol, uri: uri.to_owned() }],
    })
}
