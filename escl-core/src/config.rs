//! Driver-wide configuration (SPEC_FULL.md §1 "Configuration"): the ambient
//! knobs the core needs that spec.md §6's INI collaborator would otherwise
//! supply standalone. Follows the teacher's `forwarder::config`
//! raw-then-validated split: a `Raw*` tree mirrors the TOML shape with
//! every field optional, and [`load_from_str`] fills in defaults and
//! produces the validated [`DriverConfig`] the rest of the crate consumes.

use std::time::Duration;

use serde::Deserialize;

/// Validated, defaulted configuration for one driver instance.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Per-query timeout before a transport error is raised (spec.md §4.5).
    pub query_timeout: Duration,
    /// Redirect hop ceiling (spec.md §4.5: "Limit: 8 hops"). The spec value
    /// is a hard architectural constant, not configurable upward, but a
    /// deployment may want to lower it further against a misbehaving device.
    pub max_redirects: u32,
    /// How long the aggregator waits after a device's first finding before
    /// announcing it (spec.md §4.9, default ~1s).
    pub discovery_publish_delay: Duration,
    /// How long one discovery sweep (mDNS browse + WSD probe) runs before
    /// the "list devices" call returns, even if some interfaces are still
    /// pending (spec.md §4.9 "gated by a timer").
    pub discovery_sweep_timeout: Duration,
    /// TLS trust-anchor mode (spec.md §1 Non-goals: "certificate validation
    /// policy... TLS uses a default trust anchor set" — the only mode this
    /// driver implements is `WebpkiRoots`; the variant exists so a future
    /// deployment-specific CA bundle has somewhere to plug in without
    /// another config-shape migration).
    pub tls_trust_anchor: TlsTrustAnchor,
    /// Per-make-and-model quirk overrides layered on top of the built-in
    /// table derived from capability XML (spec.md §4.6 quirks).
    pub quirk_overrides: Vec<QuirkOverride>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            query_timeout: Duration::from_secs(30),
            max_redirects: 8,
            discovery_publish_delay: Duration::from_secs(1),
            discovery_sweep_timeout: Duration::from_secs(3),
            tls_trust_anchor: TlsTrustAnchor::WebpkiRoots,
            quirk_overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsTrustAnchor {
    WebpkiRoots,
}

/// A single `[[quirks]]` TOML entry forcing one vendor's behavior toggles
/// regardless of what the capability-XML-derived [`crate::proto::Quirks`]
/// table would otherwise decide — for a device whose `MakeAndModel` string
/// doesn't match any built-in pattern but is known, out of band, to need a
/// quirk.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuirkOverride {
    pub make_and_model_contains: String,
    #[serde(default)]
    pub force_localhost_scan_start: bool,
    #[serde(default)]
    pub force_port: bool,
}

#[derive(Debug, Deserialize, Default)]
struct RawDriverConfig {
    query_timeout_ms: Option<u64>,
    max_redirects: Option<u32>,
    discovery_publish_delay_ms: Option<u64>,
    discovery_sweep_timeout_ms: Option<u64>,
    tls_trust_anchor: Option<TlsTrustAnchor>,
    #[serde(default)]
    quirks: Vec<QuirkOverride>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("parsing config TOML: {0}")]
    Parse(String),
    #[error("max_redirects must be <= 8 (spec.md §4.5 hard ceiling), got {0}")]
    RedirectsTooHigh(u32),
}

/// Parses a `DriverConfig` from a TOML string, applying spec.md defaults
/// for any field the caller omitted. The INI file itself (spec.md §1
/// Out-of-scope) is the host adapter's concern; this is what the adapter
/// hands `escl-core` after translating whatever it parsed.
pub fn load_from_str(toml_str: &str) -> Result<DriverConfig, ConfigError> {
    let raw: RawDriverConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let defaults = DriverConfig::default();

    let max_redirects = raw.max_redirects.unwrap_or(defaults.max_redirects);
    if max_redirects > 8 {
        return Err(ConfigError::RedirectsTooHigh(max_redirects));
    }

    Ok(DriverConfig {
        query_timeout: raw.query_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.query_timeout),
        max_redirects,
        discovery_publish_delay: raw
            .discovery_publish_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.discovery_publish_delay),
        discovery_sweep_timeout: raw
            .discovery_sweep_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.discovery_sweep_timeout),
        tls_trust_anchor: raw.tls_trust_anchor.unwrap_or(defaults.tls_trust_anchor),
        quirk_overrides: raw.quirks,
    })
}
