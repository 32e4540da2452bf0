//! S2: the HP localhost-redirect quirk. Capabilities report
//! `MakeAndModel = HP LaserJet MFP M630`. The scan-start request must
//! carry `Host: localhost`; the device replies 201 with
//! `Location: http://localhost:<port>/eSCL/ScanJobs/xyz`. Expected: load
//! still succeeds because the `Location`'s host gets rewritten back to
//! the device's real address via `fix_host(match="localhost")`.

#[path = "support.rs"]
mod support;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use escl_driver::proto::{ColorMode, ImageFormat, ProtocolKind, ScanParameters, SaneStatus, ScanSource};
use escl_driver::Driver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const CAPS_XML: &str = r#"<?xml version="1.0"?>
<scan:ScannerCapabilities xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:Version>2.6</pwg:Version>
  <scan:MakeAndModel>HP LaserJet MFP M630</scan:MakeAndModel>
  <scan:Platen>
    <scan:PlatenInputCaps>
      <pwg:MaxWidth>2550</pwg:MaxWidth>
      <pwg:MaxHeight>3507</pwg:MaxHeight>
      <scan:ColorMode>RGB24</scan:ColorMode>
      <pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>
      <scan:DiscreteResolution><scan:XResolution>300</scan:XResolution></scan:DiscreteResolution>
    </scan:PlatenInputCaps>
  </scan:Platen>
</scan:ScannerCapabilities>"#;

const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4];

#[derive(Clone, Default)]
struct DeviceState {
    host_was_localhost: Arc<AtomicBool>,
}

async fn capabilities() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/xml")
        .body(Body::from(CAPS_XML))
        .unwrap()
}

/// Refuses the request unless it carries `Host: localhost` (the quirk
/// this scenario exists to exercise), then redirects the client back to
/// a `localhost`-addressed job location it must rewrite itself.
async fn scan_jobs(State(state): State<DeviceState>, headers: HeaderMap) -> Response {
    let host_ok = headers.get("host").and_then(|v| v.to_str().ok()) == Some("localhost");
    state.host_was_localhost.store(host_ok, Ordering::SeqCst);
    if !host_ok {
        return Response::builder().status(StatusCode::BAD_REQUEST).body(Body::empty()).unwrap();
    }
    Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "http://localhost:8080/eSCL/ScanJobs/xyz")
        .body(Body::empty())
        .unwrap()
}

async fn next_document() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "image/jpeg")
        .body(Body::from(FAKE_JPEG))
        .unwrap()
}

async fn cleanup() -> StatusCode {
    StatusCode::OK
}

#[tokio::test]
async fn s2_localhost_redirect_quirk() {
    let state = DeviceState::default();
    let router = Router::new()
        .route("/eSCL/ScannerCapabilities", get(capabilities))
        .route("/eSCL/ScanJobs", post(scan_jobs))
        .route("/eSCL/ScanJobs/xyz/NextDocument", get(next_document))
        .route("/eSCL/ScanJobs/xyz", delete(cleanup))
        .with_state(state.clone());
    let addr = support::spawn(router).await;

    let driver = Driver::new();
    driver
        .add_hint("HP LaserJet MFP M630", &format!("http://{addr}/eSCL/"), ProtocolKind::Escl)
        .await
        .expect("hint should be accepted");

    let handle = driver.device_open("HP LaserJet MFP M630").await.expect("device_open");

    let params = ScanParameters {
        source: ScanSource::Platen,
        color_mode: ColorMode::Rgb24,
        x_resolution: 300,
        y_resolution: 300,
        region: None,
        format: ImageFormat::Jpeg,
    };
    driver.device_start(handle, params).expect("device_start");

    let mut buf = vec![0u8; 4096];
    let n = driver.device_read(handle, &mut buf).await.expect("device_read");

    assert!(state.host_was_localhost.load(Ordering::SeqCst), "scan-start must send Host: localhost");
    assert_eq!(&buf[..n], FAKE_JPEG);
    assert_eq!(driver.device_status(handle).unwrap(), SaneStatus::Good);

    driver.device_close(handle);
}
