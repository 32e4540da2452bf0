//! Value types shared across the scanner-driver core: the things that cross
//! subsystem boundaries (discovery → aggregator → device state machine →
//! protocol handlers → host adapter) but carry no behavior of their own.
//!
//! Mirrors the role the teacher workspace gives `rt-protocol`: plain,
//! serializable data, no I/O, no parsing logic.

use std::collections::BTreeMap;

/// Host-visible outcome of a scan operation. Named after the SANE status
/// codes this driver ultimately surfaces to the host API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SaneStatus {
    Good,
    DeviceBusy,
    Jammed,
    CoverOpen,
    NoDocs,
    Unsupported,
    Cancelled,
    IoError,
}

impl SaneStatus {
    /// Once latched to a non-`Good` status, a job must not overwrite it
    /// with a later `Good` (spec.md §4.7: "Job status is latched").
    pub fn is_terminal_failure(self) -> bool {
        !matches!(self, SaneStatus::Good)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ColorMode {
    BlackAndWhite1,
    Grayscale8,
    Rgb24,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub enum ScanSource {
    Platen,
    AdfSimplex,
    AdfDuplex,
}

impl ScanSource {
    pub fn is_adf(self) -> bool {
        matches!(self, ScanSource::AdfSimplex | ScanSource::AdfDuplex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Tiff,
    Pdf,
    Bmp,
}

impl ImageFormat {
    /// Maps an eSCL/WSD MIME type to the internal format enum.
    /// `None` for MIME types this driver doesn't understand.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/tiff" => Some(ImageFormat::Tiff),
            "application/pdf" => Some(ImageFormat::Pdf),
            "application/bmp" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }

    pub fn to_mime(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::Pdf => "application/pdf",
            ImageFormat::Bmp => "application/bmp",
        }
    }

    /// Magic-byte sniff, spec.md §4.8. Returns `None` if nothing matches.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || bytes.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
            Some(ImageFormat::Tiff)
        } else if bytes.starts_with(b"BM") {
            Some(ImageFormat::Bmp)
        } else {
            None
        }
    }
}

/// Either a discrete, sorted, deduplicated set of supported resolutions, or
/// a `(min, max, step)` range. spec.md §4.6: "step = 1" means unspecified
/// and is normalized to 0; when both discrete and range info is present,
/// discrete wins (callers build this with [`Resolutions::prefer_discrete`]).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Resolutions {
    Discrete(Vec<u32>),
    Range { min: u32, max: u32, step: u32 },
}

impl Resolutions {
    /// Builds from whichever of the two forms the capability XML carried;
    /// discrete wins when both are present.
    pub fn prefer_discrete(discrete: Vec<u32>, range: Option<(u32, u32, u32)>) -> Self {
        if !discrete.is_empty() {
            let mut v = discrete;
            v.sort_unstable();
            v.dedup();
            Resolutions::Discrete(v)
        } else if let Some((min, max, step)) = range {
            Resolutions::Range {
                min,
                max,
                step: if step == 1 { 0 } else { step },
            }
        } else {
            Resolutions::Discrete(Vec::new())
        }
    }

    pub fn supports(&self, dpi: u32) -> bool {
        match self {
            Resolutions::Discrete(v) => v.contains(&dpi),
            Resolutions::Range { min, max, step } => {
                dpi >= *min && dpi <= *max && (*step == 0 || (dpi - min) % step == 0)
            }
        }
    }
}

/// Per-source scan capabilities, already mapped from eSCL/WSD XML into the
/// internal model (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SourceCaps {
    pub color_modes: Vec<ColorMode>,
    pub formats: Vec<ImageFormat>,
    pub resolutions: Resolutions,
    /// Window limits, pixels converted to millimeters at the device's
    /// advertised units (default 300 DPI, spec.md §4.1).
    pub max_width_mm: f64,
    pub max_height_mm: f64,
}

/// Full capability snapshot for one device.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Devcaps {
    pub make_and_model: Option<String>,
    pub sources: BTreeMap<ScanSource, SourceCaps>,
}

/// A scan-region rectangle, in `escl:ThreeHundredthsOfInches` units
/// (spec.md §6) — always the wire unit; conversions to/from millimeters
/// happen at the protocol-handler boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScanRegion300 {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
}

/// Parameters for one scan job, as the host API would supply via its
/// option/parameter surface (that surface itself is out of scope).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanParameters {
    pub source: ScanSource,
    pub color_mode: ColorMode,
    pub x_resolution: u32,
    pub y_resolution: u32,
    pub region: Option<ScanRegion300>,
    pub format: ImageFormat,
}

/// One discovery method. Only the tag is a protocol value type; wire
/// packet handling for mDNS/WS-Discovery sits in `escl-core::discovery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum DiscoveryMethod {
    Mdns,
    WsDiscovery,
    Hint,
}

/// Which protocol handler an endpoint should be driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProtocolKind {
    Escl,
    Wsd,
}

/// A `(protocol, URI)` pair advertised for a scanner (spec.md glossary).
/// The URI is carried as its canonical string form here; `escl-core::uri`
/// owns the parsed representation used once an endpoint is dialed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Endpoint {
    pub protocol: ProtocolKind,
    pub uri: String,
}

/// One discovery result from one method on one interface (spec.md
/// glossary: "Finding").
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Finding {
    pub method: DiscoveryMethod,
    pub ifindex: u32,
    pub name: Option<String>,
    pub model: Option<String>,
    pub uuid: Option<String>,
    pub addrs: Vec<std::net::IpAddr>,
    pub endpoints: Vec<Endpoint>,
}

/// Stable host-facing identity for one logical device, as exposed by the
/// aggregator's device list (spec.md §4.9).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DeviceIdent {
    pub ident: String,
    pub model: Option<String>,
}
