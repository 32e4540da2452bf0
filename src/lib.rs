//! Thin facade over `escl-core` / `escl-proto`.
//!
//! The core subsystems (URI, HTTP client, XML, reactor, device state
//! machine, protocol handlers, discovery aggregator) live in `escl-core`;
//! this crate just re-exports the host-facing surface so integration
//! tests and downstream adapters depend on one name.

pub use escl_core::*;
pub use escl_proto as proto;
