//! The scanner-driver core (spec.md §2 system overview): owns the reactor,
//! the HTTP client, the discovery aggregator, and every open device, and
//! exposes the host-facing operations of spec.md §6 (`device_open`,
//! `device_close`, `device_start`, `device_cancel`, `device_read`,
//! `device_get_parameters`, list-devices). The SANE option-descriptor
//! translation sitting on top of this is an external collaborator, same as
//! the teacher leaves the INI file format to its own `config` module while
//! this crate only consumes the parsed result.

pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod http;
pub mod image;
pub mod proto;
pub mod reactor;
pub mod uri;
pub mod xml;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use escl_proto::{Devcaps, DeviceIdent, Endpoint, ProtocolKind, Resolutions, SaneStatus, ScanParameters};

use config::DriverConfig;
use device::{JobCancelHandle, ScanJob};
use discovery::Aggregator;
use error::{CoreError, DeviceError, DiscoveryError, HttpError};
use http::{HttpClient, HttpData, HttpQuery, Method};
use proto::Quirks;
use reactor::Reactor;
use uri::Uri;

/// Opaque handle to an open device (spec.md §6 "opaque handles"). Carries
/// no meaning outside the [`Driver`] that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(u64);

/// Depth of the channel a running job's images are delivered through
/// (spec.md §2 "bounded image queue"): small enough that a job blocks on
/// `send` (and so stops issuing `NextDocument` requests) rather than
/// buffering unboundedly ahead of a host that reads slowly.
const IMAGE_QUEUE_CAPACITY: usize = 2;

struct OpenDevice {
    base_uri: Uri,
    endpoints: Vec<Endpoint>,
    endpoint_idx: usize,
    quirks: Quirks,
    devcaps: Devcaps,
    job: Option<tokio::task::JoinHandle<SaneStatus>>,
    cancel_handle: Option<JobCancelHandle>,
    status: SaneStatus,
    image_rx: Option<tokio::sync::mpsc::Receiver<HttpData>>,
    current_image: Option<HttpData>,
    current_offset: usize,
}

/// The top-level facade: one per running driver instance, one reactor
/// thread underneath it for the lifetime of the process (spec.md §4.4,
/// §5). Cloning is not provided — callers share a `Driver` behind whatever
/// reference the host adapter already uses (`Arc`, a global, ...).
pub struct Driver {
    reactor: Reactor,
    client: HttpClient,
    config: DriverConfig,
    aggregator: Arc<tokio::sync::Mutex<Aggregator>>,
    devices: Arc<Mutex<HashMap<u64, OpenDevice>>>,
    next_handle: AtomicU64,
}

impl Driver {
    pub fn new() -> Self {
        Driver::with_config(DriverConfig::default())
    }

    pub fn with_config(config: DriverConfig) -> Self {
        let reactor = Reactor::start();
        let client = HttpClient::with_max_redirects(reactor.handle(), config.max_redirects);
        let aggregator = Aggregator::with_publish_delay(config.discovery_publish_delay);
        Driver {
            reactor,
            client,
            config,
            aggregator: Arc::new(tokio::sync::Mutex::new(aggregator)),
            devices: Arc::new(Mutex::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Runs one discovery sweep (mDNS browse + WS-Discovery probe on every
    /// given interface) and returns the aggregator's current, de-duplicated
    /// device list (spec.md §6 "list-devices call that returns the
    /// aggregator's view"). Findings accumulate across calls; a device
    /// already announced from a previous sweep stays listed even if this
    /// sweep doesn't re-observe it.
    pub async fn list_devices(&self, ifindexes: &[u32]) -> Vec<DeviceIdent> {
        let sweep_timeout = self.config.discovery_sweep_timeout;
        let publish_delay = self.config.discovery_publish_delay;
        let ifindexes = ifindexes.to_vec();
        let aggregator = self.aggregator.clone();

        let result = self
            .reactor
            .handle()
            .spawn(async move {
                let mut findings = Vec::new();
                for ifindex in &ifindexes {
                    match discovery::browse_mdns(*ifindex, sweep_timeout).await {
                        Ok(found) => findings.extend(found),
                        Err(e) => tracing::warn!(ifindex, error = %e, "mdns browse failed"),
                    }
                    match discovery::probe_wsd(*ifindex, sweep_timeout).await {
                        Ok(found) => findings.extend(found),
                        Err(e) => tracing::warn!(ifindex, error = %e, "ws-discovery probe failed"),
                    }
                }
                let mut agg = aggregator.lock().await;
                for finding in findings {
                    agg.publish(finding);
                }
                // Every finding published above arrived before the sweep
                // timeout elapsed, so a deadline one publish delay past
                // "now" is already past every finding's own deadline.
                agg.drain_ready(Instant::now() + publish_delay);
                agg.device_list()
            })
            .await;

        result.unwrap_or_default()
    }

    /// Publishes a user-supplied endpoint as an immediately-available
    /// device (spec.md §2 "user-supplied hints"), bypassing the publish
    /// delay that paces mDNS/WSD findings.
    pub async fn add_hint(&self, name: &str, uri: &str, protocol: ProtocolKind) -> Result<(), CoreError> {
        let finding = discovery::hint_finding(name, uri, protocol)?;
        let mut agg = self.aggregator.lock().await;
        agg.publish(finding);
        // A hint is already a deliberate, one-shot assertion from the
        // caller that this endpoint is a scanner — there's no flurry of
        // concurrent mDNS/WSD findings to wait out and merge, so skip the
        // publish delay entirely rather than waiting ~1s for it to elapse.
        agg.drain_ready(Instant::now() + self.config.discovery_publish_delay + Duration::from_secs(1));
        Ok(())
    }

    /// Opens a device by the ident a prior `list_devices` call returned,
    /// fetching capabilities over its endpoints in order until one
    /// responds (spec.md §4.9 "the device state machine probes endpoints
    /// in order on capability failure").
    pub async fn device_open(&self, ident: &str) -> Result<DeviceHandle, CoreError> {
        let endpoints = {
            let agg = self.aggregator.lock().await;
            agg.lookup_endpoints(ident)
        }
        .ok_or_else(|| DiscoveryError::UnknownIdent(ident.to_owned()))?;

        let (base_uri, endpoint_idx, devcaps, quirks) = self.open_with_failover(&endpoints).await?;

        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let open = OpenDevice {
            base_uri,
            endpoints,
            endpoint_idx,
            quirks,
            devcaps,
            job: None,
            cancel_handle: None,
            status: SaneStatus::Good,
            image_rx: None,
            current_image: None,
            current_offset: 0,
        };
        self.devices.lock().unwrap().insert(handle_id, open);
        Ok(DeviceHandle(handle_id))
    }

    async fn open_with_failover(
        &self,
        endpoints: &[Endpoint],
    ) -> Result<(Uri, usize, Devcaps, Quirks), CoreError> {
        let mut last_err: Option<CoreError> = None;
        for (idx, ep) in endpoints.iter().enumerate() {
            // Only the eSCL job state machine is wired up end to end; a
            // WSD-only device is left for capability/status decode but
            // can't run a scan job yet, so skip straight past it here.
            if ep.protocol != ProtocolKind::Escl {
                continue;
            }
            let uri = match Uri::parse(&ep.uri, true) {
                Ok(u) => u,
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            };
            match self.fetch_capabilities(&uri).await {
                Ok((devcaps, quirks)) => return Ok((uri, idx, devcaps, quirks)),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| DeviceError::Protocol("no eSCL endpoint available".to_owned()).into()))
    }

    async fn fetch_capabilities(&self, base_uri: &Uri) -> Result<(Devcaps, Quirks), CoreError> {
        let caps_uri = Uri::resolve(base_uri, "ScannerCapabilities", true, false)?;
        let query = HttpQuery::new(Method::Get, caps_uri).timeout(self.config.query_timeout);
        let (_, join) = self.client.spawn(query);
        let resp = match join.await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(DeviceError::Protocol("capability query task was aborted".to_owned()).into()),
        };
        if resp.status != 200 {
            return Err(CoreError::Http(HttpError::Status(resp.status)));
        }

        let body = resp.body.as_ref().map(HttpData::bytes).unwrap_or(&[]);
        let mut devcaps = proto::decode_capabilities(body)?;

        let mut quirks = Quirks::from_make_and_model(devcaps.make_and_model.as_deref());
        quirks.note_server_header(resp.headers.get("server"));
        for over in &self.config.quirk_overrides {
            quirks.apply_override(devcaps.make_and_model.as_deref(), over);
        }
        if quirks.clamp_resolutions_to_300 {
            for caps in devcaps.sources.values_mut() {
                if let Resolutions::Discrete(discrete) = &mut caps.resolutions {
                    quirks.clamp_resolutions(discrete);
                }
            }
        }

        Ok((devcaps, quirks))
    }

    /// Closes a device, canceling any running job first (spec.md §6
    /// `device_close`).
    pub fn device_close(&self, handle: DeviceHandle) {
        if let Some(dev) = self.devices.lock().unwrap().remove(&handle.0) {
            if let Some(cancel) = dev.cancel_handle {
                cancel.cancel();
            }
        }
    }

    /// Starts a scan job with the given parameters (spec.md §6
    /// `device_start`). Fails if a job is already running on this device.
    pub fn device_start(&self, handle: DeviceHandle, params: ScanParameters) -> Result<(), CoreError> {
        let mut devices = self.devices.lock().unwrap();
        let dev = devices
            .get_mut(&handle.0)
            .ok_or_else(|| DiscoveryError::UnknownIdent(format!("handle {}", handle.0)))?;
        if dev.job.is_some() {
            return Err(DeviceError::Protocol("a scan job is already running on this device".to_owned()).into());
        }

        let (tx, rx) = tokio::sync::mpsc::channel(IMAGE_QUEUE_CAPACITY);
        let job = ScanJob::new(self.client.clone(), dev.base_uri.clone(), dev.quirks, params, tx);
        dev.cancel_handle = Some(job.cancel_handle());
        dev.status = SaneStatus::Good;
        dev.image_rx = Some(rx);
        dev.current_image = None;
        dev.current_offset = 0;
        dev.job = Some(self.reactor.handle().spawn(job.run()));
        Ok(())
    }

    /// Requests cancellation of a running job (spec.md §6 `device_cancel`).
    /// A no-op, not an error, if no job is running.
    pub fn device_cancel(&self, handle: DeviceHandle) -> Result<(), CoreError> {
        let devices = self.devices.lock().unwrap();
        let dev = devices
            .get(&handle.0)
            .ok_or_else(|| DiscoveryError::UnknownIdent(format!("handle {}", handle.0)))?;
        if let Some(cancel) = &dev.cancel_handle {
            cancel.cancel();
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes of the current scan's image data
    /// (spec.md §6 `device_read(buf, max) -> n`). Images are drained from
    /// the bounded channel the running job feeds as each page is decoded
    /// (spec.md §2 "bounded image queue"), so a call can return a page's
    /// bytes as soon as that page has loaded rather than waiting for the
    /// whole job to finish. Returns `0` once the job has sent its last
    /// image and every byte of it has been read.
    pub async fn device_read(&self, handle: DeviceHandle, buf: &mut [u8]) -> Result<usize, CoreError> {
        loop {
            {
                let mut devices = self.devices.lock().unwrap();
                let dev = devices
                    .get_mut(&handle.0)
                    .ok_or_else(|| DiscoveryError::UnknownIdent(format!("handle {}", handle.0)))?;
                if let Some(image) = dev.current_image.as_ref() {
                    let remaining = &image.bytes()[dev.current_offset..];
                    if !remaining.is_empty() {
                        let n = remaining.len().min(buf.len());
                        buf[..n].copy_from_slice(&remaining[..n]);
                        dev.current_offset += n;
                        if dev.current_offset >= image.len() {
                            dev.current_image = None;
                        }
                        return Ok(n);
                    }
                    dev.current_image = None;
                }
            }

            // No bytes buffered locally; pull the receiver out so waiting
            // for the next image doesn't hold the device-table lock across
            // an `.await` (same take-then-await-then-restore pattern the
            // job handle below uses).
            let mut rx = {
                let mut devices = self.devices.lock().unwrap();
                let dev = devices
                    .get_mut(&handle.0)
                    .ok_or_else(|| DiscoveryError::UnknownIdent(format!("handle {}", handle.0)))?;
                match dev.image_rx.take() {
                    Some(rx) => rx,
                    None => return Ok(0),
                }
            };
            let next = rx.recv().await;

            let mut devices = self.devices.lock().unwrap();
            let dev = devices
                .get_mut(&handle.0)
                .ok_or_else(|| DiscoveryError::UnknownIdent(format!("handle {}", handle.0)))?;
            match next {
                Some(image) => {
                    dev.image_rx = Some(rx);
                    dev.current_image = Some(image);
                    dev.current_offset = 0;
                }
                None => {
                    // Sender dropped: the job sent every image it's going
                    // to send. Collect its final latched status.
                    let pending_job = dev.job.take();
                    drop(devices);
                    if let Some(job) = pending_job {
                        let status = job.await.unwrap_or(SaneStatus::IoError);
                        let mut devices = self.devices.lock().unwrap();
                        if let Some(dev) = devices.get_mut(&handle.0) {
                            dev.status = status;
                            dev.cancel_handle = None;
                        }
                    }
                    return Ok(0);
                }
            }
        }
    }

    /// Returns the device's decoded capability snapshot (spec.md §6
    /// `device_get_parameters`); the host's option-descriptor surface is
    /// built from this elsewhere.
    pub fn device_get_parameters(&self, handle: DeviceHandle) -> Result<Devcaps, CoreError> {
        let devices = self.devices.lock().unwrap();
        let dev = devices
            .get(&handle.0)
            .ok_or_else(|| DiscoveryError::UnknownIdent(format!("handle {}", handle.0)))?;
        Ok(dev.devcaps.clone())
    }

    /// The last latched SANE status for a device (spec.md §7 "user-visible
    /// status is the last latched status"); `Good` before any job runs.
    pub fn device_status(&self, handle: DeviceHandle) -> Result<SaneStatus, CoreError> {
        let devices = self.devices.lock().unwrap();
        let dev = devices
            .get(&handle.0)
            .ok_or_else(|| DiscoveryError::UnknownIdent(format!("handle {}", handle.0)))?;
        Ok(dev.status)
    }

    /// Which of a device's endpoints capability fetch last succeeded
    /// against, for diagnostics (spec.md §4.9 endpoint-ordered failover).
    pub fn device_active_endpoint(&self, handle: DeviceHandle) -> Result<Endpoint, CoreError> {
        let devices = self.devices.lock().unwrap();
        let dev = devices
            .get(&handle.0)
            .ok_or_else(|| DiscoveryError::UnknownIdent(format!("handle {}", handle.0)))?;
        Ok(dev.endpoints[dev.endpoint_idx].clone())
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_handle_unknown_ident_is_an_error() {
        let driver = Driver::new();
        let result = driver.device_status(DeviceHandle(999));
        assert!(result.is_err());
    }

    #[test]
    fn device_start_on_unknown_handle_is_an_error() {
        let driver = Driver::new();
        let params = ScanParameters {
            source: escl_proto::ScanSource::Platen,
            color_mode: escl_proto::ColorMode::Rgb24,
            x_resolution: 300,
            y_resolution: 300,
            region: None,
            format: escl_proto::ImageFormat::Jpeg,
        };
        assert!(driver.device_start(DeviceHandle(999), params).is_err());
    }
}
