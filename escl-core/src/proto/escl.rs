//! eSCL protocol handler (spec.md §4.6): capability decode, `ScanSettings`
//! encode, status decode, and the retry/attempt policy.

use escl_proto::{
    ColorMode, Devcaps, ImageFormat, Resolutions, SaneStatus, ScanParameters, ScanRegion300,
    ScanSource, SourceCaps,
};
use std::collections::BTreeMap;

use crate::error::{DeviceError, XmlError};
use crate::xml::{NsRule, XmlReader, XmlWriter};

const SCAN_NS: &str = "http://schemas.hp.com/imaging/escl/2011/05/03";
const PWG_NS: &str = "http://www.pwg.org/schemas/2010/12/sm";

fn ns_rules() -> Vec<NsRule> {
    vec![
        NsRule::new("scan", "http://schemas.hp.com/imaging/escl/*"),
        NsRule::new("pwg", PWG_NS),
    ]
}

/// Decodes a `ScannerCapabilities` document (spec.md §4.6 capability
/// decode) into the protocol-independent [`Devcaps`] model.
pub fn decode_capabilities(body: &[u8]) -> Result<Devcaps, DeviceError> {
    let mut r = XmlReader::parse(body, &ns_rules())?;
    if !r.name_match("scan:ScannerCapabilities") {
        return Err(DeviceError::Protocol("root element is not scan:ScannerCapabilities".to_owned()));
    }

    let mut make_and_model: Option<String> = None;
    let mut manufacturer: Option<String> = None;
    let mut model: Option<String> = None;
    let mut sources: BTreeMap<ScanSource, SourceCaps> = BTreeMap::new();
    let root_depth = r.depth();

    while r.deep_next(root_depth) {
        match r.name() {
            "scan:MakeAndModel" => make_and_model = Some(r.value().to_owned()),
            "pwg:Manufacturer" => manufacturer = Some(r.value().to_owned()),
            "pwg:Model" => model = Some(r.value().to_owned()),
            "scan:Platen" => {
                if let Some(caps) = decode_platen_input_caps(&mut r) {
                    sources.insert(ScanSource::Platen, caps);
                }
            }
            "scan:Adf" => {
                decode_adf_input_caps(&mut r, &mut sources);
            }
            _ => {}
        }
    }

    let make_and_model = make_and_model.or_else(|| match (manufacturer, model) {
        (Some(mk), Some(md)) => Some(format!("{mk} {md}")),
        (None, Some(md)) => Some(md),
        (Some(mk), None) => Some(mk),
        (None, None) => None,
    });

    Ok(Devcaps { make_and_model, sources })
}

fn decode_platen_input_caps(r: &mut XmlReader) -> Option<SourceCaps> {
    let platen_depth = r.depth();
    while r.deep_next(platen_depth) {
        if r.name() == "scan:PlatenInputCaps" {
            return Some(decode_input_source_caps(r));
        }
    }
    None
}

fn decode_adf_input_caps(r: &mut XmlReader, sources: &mut BTreeMap<ScanSource, SourceCaps>) {
    let adf_depth = r.depth();
    let mut duplex_supported = false;
    let mut caps = None;
    while r.deep_next(adf_depth) {
        match r.name() {
            "scan:AdfSimplexInputCaps" => caps = Some(decode_input_source_caps(r)),
            "scan:AdfDuplexInputCaps" if caps.is_none() => caps = Some(decode_input_source_caps(r)),
            "scan:DuplexSupported" => duplex_supported = r.value().trim() == "true",
            _ => {}
        }
    }
    if let Some(caps) = caps {
        sources.insert(ScanSource::AdfSimplex, caps.clone());
        if duplex_supported {
            sources.insert(ScanSource::AdfDuplex, caps);
        }
    }
}

fn decode_input_source_caps(r: &mut XmlReader) -> SourceCaps {
    let caps_depth = r.depth();
    let mut max_width: u32 = 0;
    let mut max_height: u32 = 0;
    let mut color_modes = Vec::new();
    let mut formats = Vec::new();
    let mut discrete = Vec::new();
    let mut range: Option<(u32, u32, u32)> = None;

    while r.deep_next(caps_depth) {
        match r.name() {
            "pwg:MaxWidth" => max_width = r.value_uint().unwrap_or(0) as u32,
            "pwg:MaxHeight" => max_height = r.value_uint().unwrap_or(0) as u32,
            "scan:ColorMode" => {
                if let Some(cm) = decode_color_mode(r.value()) {
                    color_modes.push(cm);
                }
            }
            "pwg:DocumentFormat" | "scan:DocumentFormatExt" => {
                if let Some(f) = ImageFormat::from_mime(r.value().trim()) {
                    if !formats.contains(&f) {
                        formats.push(f);
                    }
                }
            }
            "scan:DiscreteResolution" => {
                if let Some(dpi) = decode_discrete_resolution(r) {
                    discrete.push(dpi);
                }
            }
            "scan:XResolutionRange" => {
                range = decode_resolution_range(r);
            }
            _ => {}
        }
    }

    // 1/300 inch units, spec.md §4.1: pixels / 300 * 25.4 = millimeters.
    let max_width_mm = max_width as f64 / 300.0 * 25.4;
    let max_height_mm = max_height as f64 / 300.0 * 25.4;

    SourceCaps {
        color_modes,
        formats,
        resolutions: Resolutions::prefer_discrete(discrete, range),
        max_width_mm,
        max_height_mm,
    }
}

fn decode_discrete_resolution(r: &mut XmlReader) -> Option<u32> {
    let depth = r.depth();
    let mut x = None;
    while r.deep_next(depth) {
        if r.name() == "scan:XResolution" {
            x = r.value_uint().ok().map(|v| v as u32);
        }
    }
    x
}

fn decode_resolution_range(r: &mut XmlReader) -> Option<(u32, u32, u32)> {
    let depth = r.depth();
    let (mut min, mut max, mut step) = (None, None, 1u32);
    while r.deep_next(depth) {
        match r.name() {
            "scan:Min" => min = r.value_uint().ok().map(|v| v as u32),
            "scan:Max" => max = r.value_uint().ok().map(|v| v as u32),
            "scan:Step" => step = r.value_uint().unwrap_or(1) as u32,
            _ => {}
        }
    }
    Some((min?, max?, step))
}

fn decode_color_mode(s: &str) -> Option<ColorMode> {
    match s.trim() {
        "BlackAndWhite1" => Some(ColorMode::BlackAndWhite1),
        "Grayscale8" => Some(ColorMode::Grayscale8),
        "RGB24" => Some(ColorMode::Rgb24),
        _ => None,
    }
}

fn color_mode_str(c: ColorMode) -> &'static str {
    match c {
        ColorMode::BlackAndWhite1 => "BlackAndWhite1",
        ColorMode::Grayscale8 => "Grayscale8",
        ColorMode::Rgb24 => "RGB24",
    }
}

/// Builds the `scan:ScanSettings` document sent as the body of
/// `POST /eSCL/ScanJobs` (spec.md §4.6).
pub fn build_scan_settings(params: &ScanParameters) -> Result<String, XmlError> {
    let mut w = XmlWriter::new(
        "scan:ScanSettings",
        vec![
            ("pwg".to_owned(), PWG_NS.to_owned()),
            ("scan".to_owned(), SCAN_NS.to_owned()),
        ],
    );
    w.add_text("pwg:Version", "2.6", vec![]);

    if let Some(region) = params.region {
        w.enter("pwg:ScanRegions", vec![]);
        w.enter("pwg:ScanRegion", vec![]);
        w.add_uint("pwg:XOffset", region.x_offset as u64, vec![]);
        w.add_uint("pwg:YOffset", region.y_offset as u64, vec![]);
        w.add_uint("pwg:Width", region.width as u64, vec![]);
        w.add_uint("pwg:Height", region.height as u64, vec![]);
        w.add_text("pwg:ContentRegionUnits", "escl:ThreeHundredthsOfInches", vec![]);
        w.leave();
        w.leave();
    }

    // ADF duplex is a bool flag on top of "Feeder", not a distinct source
    // value (spec.md §4.6: matches real-world eSCL schema, not the naive
    // three-value InputSource reading).
    let input_source = if params.source.is_adf() { "Feeder" } else { "Platen" };
    w.add_text("pwg:InputSource", input_source, vec![]);
    if params.source == ScanSource::AdfDuplex {
        w.add_bool("scan:Duplex", true, vec![]);
    }

    w.add_text("scan:ColorMode", color_mode_str(params.color_mode), vec![]);
    w.add_text("pwg:DocumentFormat", params.format.to_mime(), vec![]);
    w.add_text("scan:DocumentFormatExt", params.format.to_mime(), vec![]);
    w.add_uint("scan:XResolution", params.x_resolution as u64, vec![]);
    w.add_uint("scan:YResolution", params.y_resolution as u64, vec![]);

    Ok(w.finish(true)?)
}

/// SANE-visible outcome of decoding a `ScannerStatus` document, plus
/// whatever ADF sub-state was present so [`effective_status`] can apply
/// spec.md §4.6's precedence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerStatus {
    pub device: SaneStatus,
    pub adf: Option<SaneStatus>,
}

impl ScannerStatus {
    /// ADF state wins unless it's `Unsupported`, `Good`, or absent
    /// (spec.md §4.6 status precedence).
    pub fn effective_status(&self) -> SaneStatus {
        match self.adf {
            Some(adf) if adf != SaneStatus::Unsupported && adf != SaneStatus::Good => adf,
            _ => self.device,
        }
    }
}

/// Decodes the response of the optional pre-scan check (spec.md §4.6
/// `precheck_query/decode`): same `ScannerStatus` document and wire shape
/// as [`decode_status`], issued before `ScanJobs` rather than after a
/// load failure, so the Canon MF410 quirk can report `NO_DOCS`/`JAMMED`
/// before ever starting a job.
pub fn precheck_decode(body: &[u8]) -> Result<ScannerStatus, DeviceError> {
    decode_status(body)
}

pub fn decode_status(body: &[u8]) -> Result<ScannerStatus, DeviceError> {
    let mut r = XmlReader::parse(body, &ns_rules())?;
    let root_depth = r.depth();
    let mut device = SaneStatus::Unsupported;
    let mut adf = None;

    while r.deep_next(root_depth) {
        match r.name() {
            "pwg:State" => device = decode_pwg_state(r.value()),
            "scan:AdfState" => adf = Some(decode_adf_state(r.value())),
            _ => {}
        }
    }

    Ok(ScannerStatus { device, adf })
}

fn decode_pwg_state(s: &str) -> SaneStatus {
    match s.trim() {
        "Idle" => SaneStatus::Good,
        "Processing" | "Testing" => SaneStatus::DeviceBusy,
        _ => SaneStatus::Unsupported,
    }
}

/// Accepts both the short form (`Loaded`/`Jam`/...) and the long,
/// `ScannerAdf`-prefixed form real AirScan devices actually send
/// (spec.md §8 scenario S4 uses `ScannerAdfEmpty`).
fn decode_adf_state(s: &str) -> SaneStatus {
    match s.trim() {
        "Loaded" | "ScannerAdfLoaded" => SaneStatus::Good,
        "Jam" | "ScannerAdfJam" => SaneStatus::Jammed,
        "DoorOpen" | "ScannerAdfDoorOpen" => SaneStatus::CoverOpen,
        "Processing" | "ScannerAdfProcessing" => SaneStatus::DeviceBusy,
        "Empty" | "ScannerAdfEmpty" => SaneStatus::NoDocs,
        _ => SaneStatus::Unsupported,
    }
}

/// Which retry ceiling a query falls under (spec.md §4.6 retry policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Polling `NextDocument`, retried while the device reports it's busy
    /// producing the page.
    Load,
    /// Everything else: capability fetch, status poll, scan start, cleanup.
    Other,
}

pub fn max_attempts(kind: OpKind) -> u32 {
    match kind {
        OpKind::Load => 30,
        OpKind::Other => 10,
    }
}

/// Maps an HTTP failure status onto a SANE status for the given op kind
/// (spec.md §4.6: 503 means busy-retry, a 404 while loading from the ADF
/// means "no more documents", anything else is a plain I/O failure).
pub fn status_for_http_failure(status: u16, kind: OpKind, source: ScanSource) -> SaneStatus {
    match status {
        503 => SaneStatus::DeviceBusy,
        404 if kind == OpKind::Load && source.is_adf() => SaneStatus::NoDocs,
        _ => SaneStatus::IoError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPS: &[u8] = br#"<?xml version="1.0"?>
<scan:ScannerCapabilities xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:Version>2.6</pwg:Version>
  <scan:MakeAndModel>HP LaserJet MFP M630</scan:MakeAndModel>
  <scan:Platen>
    <scan:PlatenInputCaps>
      <pwg:MaxWidth>2550</pwg:MaxWidth>
      <pwg:MaxHeight>3507</pwg:MaxHeight>
      <scan:ColorMode>RGB24</scan:ColorMode>
      <scan:ColorMode>Grayscale8</scan:ColorMode>
      <pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>
      <scan:DiscreteResolution>
        <scan:XResolution>300</scan:XResolution>
        <scan:YResolution>300</scan:YResolution>
      </scan:DiscreteResolution>
      <scan:DiscreteResolution>
        <scan:XResolution>600</scan:XResolution>
        <scan:YResolution>600</scan:YResolution>
      </scan:DiscreteResolution>
    </scan:PlatenInputCaps>
  </scan:Platen>
  <scan:Adf>
    <scan:DuplexSupported>true</scan:DuplexSupported>
    <scan:AdfSimplexInputCaps>
      <pwg:MaxWidth>2550</pwg:MaxWidth>
      <pwg:MaxHeight>4200</pwg:MaxHeight>
      <scan:ColorMode>RGB24</scan:ColorMode>
      <pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>
      <scan:DiscreteResolution>
        <scan:XResolution>300</scan:XResolution>
        <scan:YResolution>300</scan:YResolution>
      </scan:DiscreteResolution>
    </scan:AdfSimplexInputCaps>
  </scan:Adf>
</scan:ScannerCapabilities>"#;

    #[test]
    fn decodes_make_model_and_platen_resolutions() {
        let caps = decode_capabilities(CAPS).unwrap();
        assert_eq!(caps.make_and_model.as_deref(), Some("HP LaserJet MFP M630"));
        let platen = &caps.sources[&ScanSource::Platen];
        assert_eq!(platen.resolutions, Resolutions::Discrete(vec![300, 600]));
        assert!(platen.color_modes.contains(&ColorMode::Rgb24));
        assert!((platen.max_width_mm - 2550.0 / 300.0 * 25.4).abs() < 1e-9);
    }

    #[test]
    fn duplex_supported_flag_adds_adf_duplex_source() {
        let caps = decode_capabilities(CAPS).unwrap();
        assert!(caps.sources.contains_key(&ScanSource::AdfSimplex));
        assert!(caps.sources.contains_key(&ScanSource::AdfDuplex));
    }

    #[test]
    fn build_scan_settings_emits_feeder_for_adf_duplex_with_bool_flag() {
        let params = ScanParameters {
            source: ScanSource::AdfDuplex,
            color_mode: ColorMode::Grayscale8,
            x_resolution: 300,
            y_resolution: 300,
            region: None,
            format: ImageFormat::Jpeg,
        };
        let xml = build_scan_settings(&params).unwrap();
        assert!(xml.contains("<pwg:InputSource>Feeder</pwg:InputSource>"));
        assert!(xml.contains("<scan:Duplex>true</scan:Duplex>"));
        assert!(!xml.contains("AdfDuplex"));
    }

    #[test]
    fn build_scan_settings_includes_region_when_present() {
        let params = ScanParameters {
            source: ScanSource::Platen,
            color_mode: ColorMode::Rgb24,
            x_resolution: 600,
            y_resolution: 600,
            region: Some(ScanRegion300 {
                x_offset: 0,
                y_offset: 0,
                width: 2550,
                height: 3507,
            }),
            format: ImageFormat::Jpeg,
        };
        let xml = build_scan_settings(&params).unwrap();
        assert!(xml.contains("<pwg:Width>2550</pwg:Width>"));
        assert!(xml.contains("<pwg:InputSource>Platen</pwg:InputSource>"));
    }

    #[test]
    fn decode_status_prefers_long_form_adf_empty_over_device_good() {
        let body = br#"<?xml version="1.0"?>
<scan:ScannerStatus xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:State>Idle</pwg:State>
  <scan:AdfState>ScannerAdfEmpty</scan:AdfState>
</scan:ScannerStatus>"#;
        let status = decode_status(body).unwrap();
        assert_eq!(status.device, SaneStatus::Good);
        assert_eq!(status.adf, Some(SaneStatus::NoDocs));
        assert_eq!(status.effective_status(), SaneStatus::NoDocs);
    }

    #[test]
    fn effective_status_falls_back_to_device_when_adf_unsupported() {
        let status = ScannerStatus {
            device: SaneStatus::Good,
            adf: Some(SaneStatus::Unsupported),
        };
        assert_eq!(status.effective_status(), SaneStatus::Good);
    }

    #[test]
    fn status_for_http_failure_maps_404_on_adf_load_to_no_docs() {
        assert_eq!(
            status_for_http_failure(404, OpKind::Load, ScanSource::AdfSimplex),
            SaneStatus::NoDocs
        );
        assert_eq!(status_for_http_failure(404, OpKind::Load, ScanSource::Platen), SaneStatus::IoError);
        assert_eq!(status_for_http_failure(503, OpKind::Other, ScanSource::Platen), SaneStatus::DeviceBusy);
    }
}
