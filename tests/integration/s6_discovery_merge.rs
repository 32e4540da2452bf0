//! S6: two findings sharing the same UUID on different interfaces merge
//! into one device with both endpoints, sorted; lookup returns both.

use escl_driver::discovery::Aggregator;
use escl_driver::proto::{DiscoveryMethod, Endpoint, Finding, ProtocolKind};
use std::time::{Duration, Instant};

fn finding(ifindex: u32, uri: &str) -> Finding {
    Finding {
        method: DiscoveryMethod::Mdns,
        ifindex,
        name: Some("Fake eSCL Scanner".to_owned()),
        model: Some("Fake eSCL Scanner".to_owned()),
        uuid: Some("4509a320-00a0-008f-00b6-002507012345".to_owned()),
        addrs: Vec::new(),
        endpoints: vec![Endpoint { protocol: ProtocolKind::Escl, uri: uri.to_owned() }],
    }
}

#[test]
fn s6_discovery_merge() {
    let mut aggregator = Aggregator::new();
    aggregator.publish(finding(2, "http://10.0.0.5/eSCL/"));
    aggregator.publish(finding(3, "http://10.0.0.6/eSCL/"));

    // Force-drain past the publish delay so the device becomes visible.
    aggregator.drain_ready(Instant::now() + Duration::from_secs(2));

    let devices = aggregator.device_list();
    assert_eq!(devices.len(), 1, "same-UUID findings on two interfaces must merge into one device");
    let ident = &devices[0].ident;

    let endpoints = aggregator.lookup_endpoints(ident).expect("device must be looked up by its ident");
    assert_eq!(endpoints.len(), 2);
    let uris: Vec<&str> = endpoints.iter().map(|e| e.uri.as_str()).collect();
    assert_eq!(uris, vec!["http://10.0.0.5/eSCL/", "http://10.0.0.6/eSCL/"], "endpoints must come back sorted");
}
