//! Merges findings from every discovery method into a deduplicated,
//! per-device endpoint list (spec.md §4.9).

use std::time::{Duration, Instant};

use escl_proto::{DeviceIdent, DiscoveryMethod, Endpoint, Finding};

use crate::uri::Uri;

const PUBLISH_DELAY: Duration = Duration::from_secs(1);

struct DeviceEntry {
    uuid: Option<String>,
    name: Option<String>,
    model: Option<String>,
    endpoints: Vec<Endpoint>,
    /// Every `(method, ifindex, name, uuid)` a finding contributed under,
    /// so [`Aggregator::withdraw`] can match on whichever identity the
    /// caller knew the device by (spec.md §4.9 "unpublish by identity").
    origins: Vec<(DiscoveryMethod, u32, Option<String>, Option<String>)>,
    first_seen: Instant,
    announced: bool,
}

impl DeviceEntry {
    fn new(f: &Finding) -> Self {
        let mut entry = DeviceEntry {
            uuid: None,
            name: None,
            model: None,
            endpoints: Vec::new(),
            origins: Vec::new(),
            first_seen: Instant::now(),
            announced: false,
        };
        entry.merge(f);
        entry
    }

    fn matches(&self, f: &Finding) -> bool {
        if let Some(u) = &f.uuid {
            if self.uuid.as_deref() == Some(u.as_str()) {
                return true;
            }
        }
        f.name.is_some()
            && self
                .origins
                .iter()
                .any(|(m, idx, name, _)| *m == f.method && *idx == f.ifindex && name == &f.name)
    }

    fn matches_identity(&self, method: DiscoveryMethod, ifindex: u32, name_or_uuid: &str) -> bool {
        if self.uuid.as_deref() == Some(name_or_uuid) {
            return true;
        }
        self.origins
            .iter()
            .any(|(m, idx, name, _)| *m == method && *idx == ifindex && name.as_deref() == Some(name_or_uuid))
    }

    fn merge(&mut self, f: &Finding) {
        if self.uuid.is_none() {
            self.uuid = f.uuid.clone();
        }
        if self.name.is_none() {
            self.name = f.name.clone();
        }
        if self.model.is_none() {
            self.model = f.model.clone();
        }
        self.origins.push((f.method, f.ifindex, f.name.clone(), f.uuid.clone()));

        for ep in &f.endpoints {
            if !self.endpoints.iter().any(|existing| endpoint_uri_equal(existing, ep)) {
                self.endpoints.push(ep.clone());
            }
        }
        self.endpoints.sort_by(|a, b| (format!("{:?}", a.protocol), &a.uri).cmp(&(format!("{:?}", b.protocol), &b.uri)));
    }

    fn ident(&self) -> DeviceIdent {
        let ident = self.uuid.clone().or_else(|| self.name.clone()).unwrap_or_else(|| {
            let (method, ifindex, ..) = self.origins[0];
            format!("{method:?}-{ifindex}")
        });
        DeviceIdent { ident, model: self.model.clone() }
    }
}

fn endpoint_uri_equal(a: &Endpoint, b: &Endpoint) -> bool {
    if a.protocol != b.protocol {
        return false;
    }
    match (Uri::parse(&a.uri, true), Uri::parse(&b.uri, true)) {
        (Ok(ua), Ok(ub)) => ua == ub,
        _ => a.uri == b.uri,
    }
}

/// Reactor-private table of in-progress and announced devices. Not
/// `Send`/`Sync` by design — spec.md §5 keeps all aggregator state on the
/// single reactor thread; callers on other threads go through deferred
/// calls, same as every other piece of reactor-private state.
pub struct Aggregator {
    devices: Vec<DeviceEntry>,
    publish_delay: Duration,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::with_publish_delay(PUBLISH_DELAY)
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Aggregator::default()
    }

    /// Builds an aggregator with a non-default publish delay (spec.md
    /// §4.9's "~1s" is a default, not a hard constant — a deployment's
    /// `DriverConfig` may want it shorter or longer).
    pub fn with_publish_delay(publish_delay: Duration) -> Self {
        Aggregator { devices: Vec::new(), publish_delay }
    }

    /// Records one finding, merging it into an existing device when its
    /// UUID matches, or its `(method, ifindex, name)` matches an existing
    /// device's without a UUID yet (spec.md §4.9 grouping rule).
    pub fn publish(&mut self, finding: Finding) {
        if let Some(entry) = self.devices.iter_mut().find(|e| e.matches(&finding)) {
            entry.merge(&finding);
        } else {
            self.devices.push(DeviceEntry::new(&finding));
        }
    }

    /// Drops every device whose only contributing identity was this one
    /// (spec.md §4.9 "unpublish/withdraw by identity").
    pub fn withdraw(&mut self, method: DiscoveryMethod, ifindex: u32, name_or_uuid: &str) {
        self.devices.retain(|e| !e.matches_identity(method, ifindex, name_or_uuid));
    }

    /// Devices whose ~1s publish delay has elapsed since their first
    /// finding and that haven't been announced yet; marks them announced.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<DeviceIdent> {
        self.devices
            .iter_mut()
            .filter(|e| !e.announced && now.duration_since(e.first_seen) >= self.publish_delay)
            .map(|e| {
                e.announced = true;
                e.ident()
            })
            .collect()
    }

    /// The stable, sorted device list the host's "list devices" call
    /// returns (spec.md §4.9 lookup / §6 host API).
    pub fn device_list(&self) -> Vec<DeviceIdent> {
        let mut list: Vec<_> = self.devices.iter().filter(|e| e.announced).map(DeviceEntry::ident).collect();
        list.sort_by(|a, b| a.ident.cmp(&b.ident));
        list
    }

    /// Ordered endpoint list for a host-facing ident; the device state
    /// machine probes these in order on capability failure.
    pub fn lookup_endpoints(&self, ident: &str) -> Option<Vec<Endpoint>> {
        self.devices.iter().find(|e| e.ident().ident == ident).map(|e| e.endpoints.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escl_proto::ProtocolKind;

    fn finding(method: DiscoveryMethod, ifindex: u32, uuid: Option<&str>, uri: &str) -> Finding {
        Finding {
            method,
            ifindex,
            name: Some("HP LaserJet MFP M630".to_owned()),
            model: Some("HP LaserJet MFP M630".to_owned()),
            uuid: uuid.map(str::to_owned),
            addrs: vec![],
            endpoints: vec![Endpoint { protocol: ProtocolKind::Escl, uri: uri.to_owned() }],
        }
    }

    #[test]
    fn same_uuid_on_two_ifindexes_merges_into_one_device_with_two_endpoints() {
        let mut agg = Aggregator::new();
        agg.publish(finding(DiscoveryMethod::Mdns, 2, Some("uuid-1"), "http://10.0.0.1/eSCL/"));
        agg.publish(finding(DiscoveryMethod::Mdns, 3, Some("uuid-1"), "http://10.0.0.2/eSCL/"));
        assert_eq!(agg.devices.len(), 1);
        assert_eq!(agg.devices[0].endpoints.len(), 2);
    }

    #[test]
    fn duplicate_endpoint_is_not_added_twice() {
        let mut agg = Aggregator::new();
        agg.publish(finding(DiscoveryMethod::Mdns, 2, Some("uuid-1"), "http://10.0.0.1/eSCL/"));
        agg.publish(finding(DiscoveryMethod::Mdns, 2, Some("uuid-1"), "http://10.0.0.1/eSCL/"));
        assert_eq!(agg.devices[0].endpoints.len(), 1);
    }

    #[test]
    fn drain_ready_waits_out_the_publish_delay() {
        let mut agg = Aggregator::new();
        agg.publish(finding(DiscoveryMethod::Mdns, 2, Some("uuid-1"), "http://10.0.0.1/eSCL/"));
        let first_seen = agg.devices[0].first_seen;
        assert!(agg.drain_ready(first_seen).is_empty());
        assert_eq!(agg.drain_ready(first_seen + Duration::from_millis(1100)).len(), 1);
    }

    #[test]
    fn withdraw_by_uuid_removes_the_device() {
        let mut agg = Aggregator::new();
        agg.publish(finding(DiscoveryMethod::Mdns, 2, Some("uuid-1"), "http://10.0.0.1/eSCL/"));
        agg.withdraw(DiscoveryMethod::Mdns, 2, "uuid-1");
        assert!(agg.devices.is_empty());
    }

    #[test]
    fn device_list_only_includes_announced_devices() {
        let mut agg = Aggregator::new();
        agg.publish(finding(DiscoveryMethod::Mdns, 2, Some("uuid-1"), "http://10.0.0.1/eSCL/"));
        assert!(agg.device_list().is_empty());
        let first_seen = agg.devices[0].first_seen;
        agg.drain_ready(first_seen + Duration::from_secs(2));
        assert_eq!(agg.device_list().len(), 1);
    }
}
