//! Image format detection and decoding (spec.md §4.8). Decoders are
//! external collaborators of the core; only the TIFF decoder is
//! implemented here, as a representative of the shared vtable shape.

mod format;
mod tiff;

pub use format::detect;
pub use tiff::{Frame, ImageParams, TiffDecoder};
