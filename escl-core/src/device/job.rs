//! The per-scan job state machine (spec.md §4.7): drives `POST ScanJobs`,
//! polls `NextDocument` to exhaustion, and cleans up with `DELETE` on the
//! job location, latching the first non-`Good` status it observes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use escl_proto::{SaneStatus, ScanParameters};
use tokio::sync::mpsc;

use crate::error::{DeviceError, HttpError};
use crate::http::{HttpClient, HttpData, HttpQuery, HttpResponse, Method};
use crate::proto::{self, OpKind, Quirks};
use crate::uri::Uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Started,
    CheckStatus,
    Requesting,
    Loading,
    CleaningUp,
    Done,
}

/// A cheap, `Send`-able handle a caller on any thread can use to cancel a
/// running job (spec.md §4.7 cancellation): flips a cooperative flag
/// checked at every state transition, and aborts whatever HTTP query is
/// currently in flight so a job blocked in `NextDocument` doesn't have to
/// wait out a full retry delay before it notices.
#[derive(Clone)]
pub struct JobCancelHandle {
    client: HttpClient,
    cancel: Arc<AtomicBool>,
    current_query: Arc<Mutex<Option<u64>>>,
}

impl JobCancelHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(id) = *self.current_query.lock().unwrap() {
            self.client.cancel(id);
        }
    }
}

/// Drives one scan from `ScanJobs` creation through to the final decoded
/// image and cleanup DELETE. Consumed by [`ScanJob::run`]; a caller wanting
/// to cancel mid-flight holds a [`JobCancelHandle`] obtained up front via
/// [`ScanJob::cancel_handle`].
pub struct ScanJob {
    client: HttpClient,
    base_uri: Uri,
    quirks: Quirks,
    params: ScanParameters,
    state: JobState,
    status: SaneStatus,
    location: Option<Uri>,
    images: mpsc::Sender<HttpData>,
    cancel: Arc<AtomicBool>,
    current_query: Arc<Mutex<Option<u64>>>,
}

enum LoadOutcome {
    Image(HttpData),
    Done,
    Failed(SaneStatus),
}

impl ScanJob {
    pub fn new(
        client: HttpClient,
        base_uri: Uri,
        quirks: Quirks,
        params: ScanParameters,
        images: mpsc::Sender<HttpData>,
    ) -> Self {
        ScanJob {
            client,
            base_uri,
            quirks,
            params,
            state: JobState::Idle,
            status: SaneStatus::Good,
            location: None,
            images,
            cancel: Arc::new(AtomicBool::new(false)),
            current_query: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cancel_handle(&self) -> JobCancelHandle {
        JobCancelHandle {
            client: self.client.clone(),
            cancel: self.cancel.clone(),
            current_query: self.current_query.clone(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Latches the first non-`Good` status observed (spec.md §4.7: "job
    /// status is latched") and never overwrites it afterward.
    fn latch(&mut self, status: SaneStatus) {
        if !self.status.is_terminal_failure() {
            self.status = status;
        }
    }

    async fn execute(&self, query: HttpQuery) -> Result<HttpResponse, DeviceError> {
        let (id, handle) = self.client.spawn(query);
        *self.current_query.lock().unwrap() = Some(id);
        let result = handle.await;
        *self.current_query.lock().unwrap() = None;
        match result {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(DeviceError::from(e)),
            Err(join_err) if join_err.is_cancelled() => Err(DeviceError::Http(HttpError::Cancelled)),
            Err(join_err) => Err(DeviceError::Protocol(format!("query task failed: {join_err}"))),
        }
    }

    fn status_from_error(e: DeviceError) -> SaneStatus {
        match e {
            DeviceError::Http(HttpError::Cancelled) => SaneStatus::Cancelled,
            _ => SaneStatus::IoError,
        }
    }

    /// Drives the whole job to completion, returning the final latched
    /// status. Each decoded image is sent on the bounded channel supplied to
    /// [`ScanJob::new`] as soon as it's loaded (spec.md §2: "image bytes
    /// pushed to a bounded image queue read by the host adapter"), so a
    /// caller draining that channel sees pages as they arrive rather than
    /// waiting for the whole job to finish. Always runs cleanup, even on
    /// cancellation or failure (spec.md §4.7: "cleanup always runs if a job
    /// location was obtained").
    pub async fn run(mut self) -> SaneStatus {
        self.state = JobState::Started;
        if self.is_cancelled() {
            self.latch(SaneStatus::Cancelled);
        } else if let Some(status) = self.precheck().await {
            self.latch(status);
        } else if let Err(status) = self.start_scan().await {
            self.latch(status);
        } else {
            self.state = JobState::Loading;
            let mut previous_load: Option<Duration> = None;
            loop {
                if self.is_cancelled() {
                    self.latch(SaneStatus::Cancelled);
                    break;
                }
                if let Some(prev) = previous_load.take() {
                    // spec.md §4.6: "delay the next load by
                    // min(previous_load_duration × 0.5, 1000 ms) (ADF
                    // only)" — works around devices that spuriously report
                    // `ADF empty` when queried too quickly after the last
                    // page. Platen devices don't delay; there is no ADF
                    // paper-feed race to avoid.
                    if self.params.source.is_adf() {
                        let delay = (prev / 2).min(Duration::from_millis(1000));
                        tokio::time::sleep(delay).await;
                    }
                }
                let started = Instant::now();
                match self.load_one().await {
                    LoadOutcome::Image(image) => {
                        previous_load = Some(started.elapsed());
                        if self.images.send(image).await.is_err() {
                            // Host dropped its receiver (e.g. device_close
                            // while a job was in flight); nothing left to
                            // deliver to, so stop loading and clean up.
                            self.latch(SaneStatus::Cancelled);
                            break;
                        }
                        continue;
                    }
                    LoadOutcome::Done => break,
                    LoadOutcome::Failed(status) => {
                        self.latch(status);
                        break;
                    }
                }
            }
        }

        self.state = JobState::CleaningUp;
        self.cleanup().await;
        self.state = JobState::Done;
        self.status
    }

    /// Optional pre-scan check (spec.md §4.6 `precheck_query/decode`,
    /// §4.7 `CHECK_STATUS`): only the Canon MF410 quirk asks for one. Scans
    /// `ScannerStatus` up front so an empty/jammed ADF is reported before a
    /// job is ever created, rather than discovered after a failed load.
    /// Returns `Some(status)` to abort the job early with that status, or
    /// `None` to proceed to `start_scan` as normal.
    async fn precheck(&mut self) -> Option<SaneStatus> {
        if !(self.quirks.respect_precheck_for_adf && self.params.source.is_adf()) {
            return None;
        }
        self.state = JobState::CheckStatus;
        if self.is_cancelled() {
            return Some(SaneStatus::Cancelled);
        }
        let Ok(status_uri) = Uri::resolve(&self.base_uri, "ScannerStatus", true, false) else {
            return None;
        };
        let mut query = HttpQuery::new(Method::Get, status_uri);
        if self.quirks.force_port {
            query = query.force_port();
        }
        match self.execute(query).await {
            Ok(resp) if resp.status == 200 => {
                let bytes = resp.body.as_ref().map(HttpData::bytes).unwrap_or(&[]);
                match proto::precheck_decode(bytes) {
                    Ok(status) => match status.effective_status() {
                        eff @ (SaneStatus::NoDocs | SaneStatus::Jammed) => Some(eff),
                        _ => None,
                    },
                    Err(_) => None,
                }
            }
            Ok(_) => None,
            Err(e) if matches!(e, DeviceError::Http(HttpError::Cancelled)) => Some(SaneStatus::Cancelled),
            Err(_) => None,
        }
    }

    async fn start_scan(&mut self) -> Result<(), SaneStatus> {
        self.state = JobState::Requesting;
        let body = proto::build_scan_settings(&self.params).map_err(|_| SaneStatus::IoError)?;
        let scan_jobs_uri =
            Uri::resolve(&self.base_uri, "ScanJobs", true, false).map_err(|_| SaneStatus::IoError)?;

        let mut query = HttpQuery::new(Method::Post, scan_jobs_uri)
            .with_body(HttpData::owned(body.into_bytes(), Some("application/xml")))
            .no_need_response_body();
        if self.quirks.force_port {
            query = query.force_port();
        }
        if self.quirks.localhost_scan_start {
            // spec.md §4.6 S2: some HP firmwares only accept the scan-start
            // POST when it's addressed to `localhost`, regardless of the
            // device's real address.
            query = query.with_header("Host", "localhost");
        }

        let resp = self.execute(query).await.map_err(Self::status_from_error)?;
        if resp.status != 201 {
            return Err(proto::status_for_http_failure(resp.status, OpKind::Other, self.params.source));
        }

        let location_raw = resp.headers.get("location").ok_or(SaneStatus::IoError)?;
        let mut location =
            Uri::resolve(&self.base_uri, location_raw, true, false).map_err(|_| SaneStatus::IoError)?;
        if self.quirks.localhost_scan_start {
            location = location.fix_host(&self.base_uri, Some("localhost"));
        }
        self.location = Some(location);
        Ok(())
    }

    async fn load_one(&mut self) -> LoadOutcome {
        let Some(location) = self.location.clone() else {
            return LoadOutcome::Failed(SaneStatus::IoError);
        };
        // Job location has no trailing slash; without fix_end_slash the RFC
        // 3986 merge would replace the job id segment instead of appending.
        let Ok(next_doc) = Uri::resolve(&location.fix_end_slash(), "NextDocument", true, false) else {
            return LoadOutcome::Failed(SaneStatus::IoError);
        };

        for _attempt in 0..proto::max_attempts(OpKind::Load) {
            if self.is_cancelled() {
                return LoadOutcome::Failed(SaneStatus::Cancelled);
            }

            let mut query = HttpQuery::new(Method::Get, next_doc.clone());
            if self.quirks.force_port {
                query = query.force_port();
            }
            let resp = match self.execute(query).await {
                Ok(r) => r,
                Err(e) => return LoadOutcome::Failed(Self::status_from_error(e)),
            };

            match resp.status {
                200..=299 => {
                    let content_type = resp.headers.get("content-type").map(str::to_owned);
                    let mut body = resp
                        .body
                        .unwrap_or_else(|| HttpData::owned(Vec::new(), content_type.as_deref()));
                    // spec.md §4.6: "Some devices advertise many formats
                    // but actually stream a different one; actual format
                    // is detected from the first bytes" — sniff and stamp
                    // over whatever Content-Type the device claimed.
                    if let Some(sniffed) = crate::image::detect(body.bytes()) {
                        body.set_content_type(Some(sniffed.to_mime()));
                    }
                    return LoadOutcome::Image(body);
                }
                404 => {
                    let status = proto::status_for_http_failure(404, OpKind::Load, self.params.source);
                    return if status == SaneStatus::NoDocs {
                        LoadOutcome::Done
                    } else {
                        LoadOutcome::Failed(status)
                    };
                }
                503 => {
                    // spec.md §4.6: "the handler retries the failed op
                    // after 1000 ms" — a fixed delay, not a growing one.
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    continue;
                }
                _ => {
                    return LoadOutcome::Failed(self.poll_status_for_failure().await);
                }
            }
        }
        LoadOutcome::Failed(SaneStatus::DeviceBusy)
    }

    async fn poll_status_for_failure(&mut self) -> SaneStatus {
        let Ok(status_uri) = Uri::resolve(&self.base_uri, "ScannerStatus", true, false) else {
            return SaneStatus::IoError;
        };
        let mut query = HttpQuery::new(Method::Get, status_uri);
        if self.quirks.force_port {
            query = query.force_port();
        }
        match self.execute(query).await {
            Ok(resp) if resp.status == 200 => {
                let bytes = resp.body.as_ref().map(HttpData::bytes).unwrap_or(&[]);
                match proto::decode_status(bytes) {
                    Ok(status) => status.effective_status(),
                    Err(_) => SaneStatus::IoError,
                }
            }
            Ok(_) => SaneStatus::IoError,
            Err(e) => Self::status_from_error(e),
        }
    }

    async fn cleanup(&mut self) {
        let Some(location) = self.location.clone() else { return };
        let mut query = HttpQuery::new(Method::Delete, location).no_need_response_body();
        if self.quirks.force_port {
            query = query.force_port();
        }
        let _ = self.execute(query).await;
    }
}
