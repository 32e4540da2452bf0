//! Protocol handlers (spec.md §4.6): eSCL is fully implemented, WSD scanning
//! shares the job state machine through the same narrow surface.

mod escl;
mod quirks;
mod wsd;

pub use escl::{
    build_scan_settings, decode_capabilities, decode_status, max_attempts, precheck_decode,
    status_for_http_failure, OpKind, ScannerStatus,
};
pub use quirks::Quirks;
pub use wsd as wsd_proto;
