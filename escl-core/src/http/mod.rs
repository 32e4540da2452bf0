//! The HTTP subsystem (spec.md §4.2, §4.5): headers, bodies, multipart
//! splitting, and the client that drives queries against a device.

mod client;
mod data;
mod header;
mod multipart;
mod query;
mod stream;

pub use client::HttpClient;
pub use data::{HttpData, HttpDataQueue};
pub use header::{HeaderList, ParamList};
pub use multipart::split_multipart;
pub use query::{HttpQuery, HttpResponse, Method};
