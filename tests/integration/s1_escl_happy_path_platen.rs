//! S1: eSCL happy path on the platen. Capabilities advertise Platen with
//! RGB24/Grayscale8, JPEG, discrete resolutions {150, 300, 600},
//! MaxWidth=2550, MaxHeight=3507 at 300 units. A client opens with
//! source=Platen, mode=Color, resolution=300, full window; `ScanJobs`
//! returns 201 with a `Location`; `NextDocument` returns one JPEG.
//! Expected: status GOOD, one image delivered, a final DELETE issued.

#[path = "support.rs"]
mod support;

use axum::body::{Body, Bytes};
use axum::extract::State;
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
  <scan:Platen>
    <scan:PlatenInputCaps>
      <pwg:MaxWidth>2550</pwg:MaxWidth>
      <pwg:MaxHeight>3507</pwg:MaxHeight>
      <scan:ColorMode>RGB24</scan:ColorMode>
      <scan:ColorMode>Grayscale8</scan:ColorMode>
      <pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>
      <scan:DiscreteResolution><scan:XResolution>150</scan:XResolution></scan:DiscreteResolution>
      <scan:DiscreteResolution><scan:XResolution>300</scan:XResolution></scan:DiscreteResolution>
      <scan:DiscreteResolution><scan:XResolution>600</scan:XResolution></scan:DiscreteResolution>
    </scan:PlatenInputCaps>
  </scan:Platen>
</scan:ScannerCapabilities>"#;

const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0];

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

async fn next_document() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "image/jpeg")
        .body(Body::from(Bytes::from_static(FAKE_JPEG)))
        .unwrap()
}

async fn cleanup(State(state): State<DeviceState>) -> StatusCode {
    state.deleted.store(true, Ordering::SeqCst);
    StatusCode::OK
}

#[tokio::test]
async fn s1_escl_happy_path_platen() {
    let state = DeviceState::default();
    let router = Router::new()
        .route("/eSCL/ScannerCapabilities", get(capabilities))
        .route("/eSCL/ScanJobs", post(scan_jobs))
        .route("/eSCL/ScanJobs/abc/NextDocument", get(next_document))
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
        source: ScanSource::Platen,
        color_mode: ColorMode::Rgb24,
        x_resolution: 300,
        y_resolution: 300,
        region: None,
        format: ImageFormat::Jpeg,
    };
    driver.device_start(handle, params).expect("device_start");

    let mut buf = vec![0u8; 4096];
    let mut image = Vec::new();
    loop {
        let n = driver.device_read(handle, &mut buf).await.expect("device_read");
        if n == 0 {
            break;
        }
        image.extend_from_slice(&buf[..n]);
    }

    assert_eq!(driver.device_status(handle).unwrap(), SaneStatus::Good);
    assert_eq!(image, FAKE_JPEG);
    assert!(state.deleted.load(Ordering::SeqCst), "cleanup DELETE was never issued");

    driver.device_close(handle);
}
