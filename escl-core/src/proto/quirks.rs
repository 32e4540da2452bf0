//! Per-vendor deviations discovered from capability XML or response
//! headers (spec.md §4.6 "Quirks").

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quirks {
    /// "Canon iR2625/2630" clamps discrete resolution arrays to ≤ 300.
    pub clamp_resolutions_to_300: bool,
    /// HP LaserJet/FlowMFP families, or any response carrying
    /// `Server: HP_Compact_Server`: scan start must send `Host: localhost`
    /// and the `Location` it returns needs `fix_host` applied.
    pub localhost_scan_start: bool,
    /// "Canon MF410 Series" respects the pre-check status for ADF.
    pub respect_precheck_for_adf: bool,
    /// Any EPSON device: force the port onto every query's `Host:`.
    pub force_port: bool,
}

impl Quirks {
    pub fn from_make_and_model(make_and_model: Option<&str>) -> Self {
        let m = make_and_model.unwrap_or("");
        Quirks {
            clamp_resolutions_to_300: m.contains("Canon iR2625") || m.contains("Canon iR2630"),
            localhost_scan_start: m.contains("HP LaserJet") || m.contains("FlowMFP"),
            respect_precheck_for_adf: m.contains("Canon MF410"),
            force_port: m.to_ascii_uppercase().starts_with("EPSON"),
        }
    }

    /// Upgrades the localhost-quirk flag from an observed `Server:`
    /// header, independent of `MakeAndModel` (spec.md §4.6).
    pub fn note_server_header(&mut self, server_header: Option<&str>) {
        if server_header.is_some_and(|s| s.contains("HP_Compact_Server")) {
            self.localhost_scan_start = true;
        }
    }

    pub fn clamp_resolutions(&self, discrete: &mut Vec<u32>) {
        if self.clamp_resolutions_to_300 {
            discrete.retain(|&d| d <= 300);
        }
    }

    /// Layers a config-supplied override on top of the XML-derived table
    /// (SPEC_FULL.md §1 "Configuration": `[[quirks]]` entries for a device
    /// whose `MakeAndModel` doesn't match a built-in pattern). Overrides
    /// only ever turn a flag on, never off — the built-in table is never
    /// wrong to leave alone.
    pub fn apply_override(&mut self, make_and_model: Option<&str>, over: &crate::config::QuirkOverride) {
        if make_and_model.is_some_and(|m| m.contains(&over.make_and_model_contains)) {
            self.localhost_scan_start |= over.force_localhost_scan_start;
            self.force_port |= over.force_port;
        }
    }
}
