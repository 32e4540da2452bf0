//! S4: scanning from the ADF when it's empty. `NextDocument` returns 404
//! and `ScannerStatus` reports `scan:AdfState = ScannerAdfEmpty`.
//! Expected: status NO_DOCS, final DELETE issued.

#[path = "support.rs"]
mod support;

use axum::body::Body;
use axum::http::StatusCode;
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
  <scan:MakeAndModel>Fake eSCL Scanner</scan:MakeAndModel>
  <scan:Adf>
    <scan:DuplexSupported>false</scan:DuplexSupported>
    <scan:AdfSimplexInputCaps>
      <pwg:MaxWidth>2550</pwg:MaxWidth>
      <pwg:MaxHeight>4200</pwg:MaxHeight>
      <scan:ColorMode>RGB24</scan:ColorMode>
      <pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>
      <scan:DiscreteResolution><scan:XResolution>300</scan:XResolution></scan:DiscreteResolution>
    </scan:AdfSimplexInputCaps>
  </scan:Adf>
</scan:ScannerCapabilities>"#;

const STATUS_XML: &str = r#"<?xml version="1.0"?>
<scan:ScannerStatus xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:State>Idle</pwg:State>
  <scan:AdfState>ScannerAdfEmpty</scan:AdfState>
</scan:ScannerStatus>"#;

#[derive(Clone, Default)]
struct DeviceState {
    deleted: Arc<AtomicBool>,
}

async fn capabilities() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/xml")
        .body(Body::from(CAPS_XML))
        .unwrap()
}

async fn scan_jobs() -> Response {
    Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/eSCL/ScanJobs/abc")
        .body(Body::empty())
        .unwrap()
}

async fn next_document() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn scanner_status() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/xml")
        .body(Body::from(STATUS_XML))
        .unwrap()
}

async fn cleanup(axum::extract::State(state): axum::extract::State<DeviceState>) -> StatusCode {
    state.deleted.store(true, Ordering::SeqCst);
    StatusCode::OK
}

#[tokio::test]
async fn s4_adf_empty() {
    let state = DeviceState::default();
    let router = Router::new()
        .route("/eSCL/ScannerCapabilities", get(capabilities))
        .route("/eSCL/ScanJobs", post(scan_jobs))
        .route("/eSCL/ScanJobs/abc/NextDocument", get(next_document))
        .route("/eSCL/ScannerStatus", get(scanner_status))
        .route("/eSCL/ScanJobs/abc", delete(cleanup))
        .with_state(state.clone());
    let addr = support::spawn(router).await;

    let driver = Driver::new();
    driver
        .add_hint("Fake eSCL Scanner", &format!("http://{addr}/eSCL/"), ProtocolKind::Escl)
        .await
        .expect("hint should be accepted");
    let handle = driver.device_open("Fake eSCL Scanner").await.expect("device_open");

    let params = ScanParameters {
        source: ScanSource::AdfSimplex,
        color_mode: ColorMode::Rgb24,
        x_resolution: 300,
        y_resolution: 300,
        region: None,
        format: ImageFormat::Jpeg,
    };
    driver.device_start(handle, params).expect("device_start");

    let mut buf = vec![0u8; 4096];
    let n = driver.device_read(handle, &mut buf).await.expect("device_read");

    assert_eq!(n, 0, "an empty ADF should yield no image bytes");
    assert_eq!(driver.device_status(handle).unwrap(), SaneStatus::NoDocs);
    assert!(state.deleted.load(Ordering::SeqCst), "cleanup DELETE was never issued");

    driver.device_close(handle);
}
