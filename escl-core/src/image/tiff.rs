//! TIFF scanline decoder (spec.md §4.8) — the one image decoder the core
//! touches directly, as a representative of the `begin`/`reset`/
//! `get_bytes_per_pixel`/`get_params`/`set_window`/`read_line` decoder
//! vtable every format implements.
//!
//! Supports the single baseline case this driver's devices actually
//! produce: uncompressed strips, 8 bits per sample, 1 (gray) or 3 (RGB)
//! samples per pixel.

use crate::error::ImageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Gray,
    Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageParams {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub frame: Frame,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

pub struct TiffDecoder {
    data: bytes::Bytes,
    little_endian: bool,
    width: u32,
    height: u32,
    samples_per_pixel: u32,
    bits_per_sample: u32,
    rows_per_strip: u32,
    strip_offsets: Vec<u32>,
    strip_byte_counts: Vec<u32>,
    window: Window,
    current_row: u32,
}

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;

impl TiffDecoder {
    /// Parses the IFD out of `data` (spec.md §4.8: "wraps the image bytes
    /// as an in-memory reader... extracts width/height/samples-per-pixel").
    pub fn begin(data: bytes::Bytes) -> Result<Self, ImageError> {
        if data.len() < 8 {
            return Err(ImageError::MalformedTiff("too short for a header".to_owned()));
        }
        let little_endian = match &data[0..2] {
            b"II" => true,
            b"MM" => false,
            _ => return Err(ImageError::MalformedTiff("bad byte-order mark".to_owned())),
        };
        let magic = read_u16(&data, 2, little_endian)?;
        if magic != 42 {
            return Err(ImageError::MalformedTiff("bad magic number".to_owned()));
        }
        let ifd_offset = read_u32(&data, 4, little_endian)? as usize;

        let mut width = None;
        let mut height = None;
        let mut samples_per_pixel = 1u32;
        let mut bits_per_sample = 8u32;
        let mut rows_per_strip = None;
        let mut strip_offsets = Vec::new();
        let mut strip_byte_counts = Vec::new();
        let mut compression = 1u32;

        let entry_count = read_u16(&data, ifd_offset, little_endian)? as usize;
        for i in 0..entry_count {
            let entry_off = ifd_offset + 2 + i * 12;
            let tag = read_u16(&data, entry_off, little_endian)?;
            let field_type = read_u16(&data, entry_off + 2, little_endian)?;
            let count = read_u32(&data, entry_off + 4, little_endian)? as usize;
            let value_off = entry_off + 8;

            match tag {
                TAG_IMAGE_WIDTH => width = Some(read_scalar(&data, value_off, field_type, little_endian)?),
                TAG_IMAGE_LENGTH => height = Some(read_scalar(&data, value_off, field_type, little_endian)?),
                TAG_BITS_PER_SAMPLE => bits_per_sample = read_scalar(&data, value_off, field_type, little_endian)?,
                TAG_SAMPLES_PER_PIXEL => samples_per_pixel = read_scalar(&data, value_off, field_type, little_endian)?,
                TAG_COMPRESSION => compression = read_scalar(&data, value_off, field_type, little_endian)?,
                TAG_ROWS_PER_STRIP => rows_per_strip = Some(read_scalar(&data, value_off, field_type, little_endian)?),
                TAG_STRIP_OFFSETS => {
                    strip_offsets = read_array(&data, value_off, field_type, count, little_endian)?
                }
                TAG_STRIP_BYTE_COUNTS => {
                    strip_byte_counts = read_array(&data, value_off, field_type, count, little_endian)?
                }
                _ => {}
            }
        }

        if compression != 1 {
            return Err(ImageError::UnsupportedCompression(compression));
        }
        let width = width.ok_or_else(|| ImageError::MalformedTiff("missing ImageWidth".to_owned()))?;
        let height = height.ok_or_else(|| ImageError::MalformedTiff("missing ImageLength".to_owned()))?;
        if strip_offsets.is_empty() || strip_offsets.len() != strip_byte_counts.len() {
            return Err(ImageError::MalformedTiff("missing or mismatched strip tables".to_owned()));
        }

        Ok(TiffDecoder {
            data,
            little_endian,
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            rows_per_strip: rows_per_strip.unwrap_or(height),
            strip_offsets,
            strip_byte_counts,
            window: Window {
                x: 0,
                y: 0,
                width,
                height,
            },
            current_row: 0,
        })
    }

    pub fn reset(&mut self) {
        self.current_row = self.window.y;
    }

    pub fn get_bytes_per_pixel(&self) -> u32 {
        (self.bits_per_sample / 8).max(1) * self.samples_per_pixel
    }

    pub fn get_params(&self) -> ImageParams {
        ImageParams {
            width: self.window.width,
            height: self.window.height,
            bytes_per_pixel: self.get_bytes_per_pixel(),
            frame: if self.samples_per_pixel >= 3 { Frame::Rgb } else { Frame::Gray },
        }
    }

    /// Clamps the requested window to the actual image rectangle (spec.md
    /// §4.8: "clamps to the actual image rectangle when the decoder cannot
    /// crop" — this decoder only reads whole scanlines, so only the X
    /// range and row count are honored, not a true crop).
    pub fn set_window(&mut self, x: u32, y: u32, width: u32, height: u32) {
        let x = x.min(self.width);
        let y = y.min(self.height);
        let width = width.min(self.width.saturating_sub(x));
        let height = height.min(self.height.saturating_sub(y));
        self.window = Window { x, y, width, height };
        self.current_row = y;
    }

    /// Reads one scanline into `out`, returning the number of bytes
    /// written (0 once every row in the window has been read).
    pub fn read_line(&mut self, out: &mut [u8]) -> Result<usize, ImageError> {
        if self.current_row >= self.window.y + self.window.height {
            return Ok(0);
        }
        let bpp = self.get_bytes_per_pixel();
        let row_bytes = self.width as usize * bpp as usize;
        let strip_index = (self.current_row / self.rows_per_strip.max(1)) as usize;
        let row_in_strip = self.current_row % self.rows_per_strip.max(1);

        let strip_offset = *self
            .strip_offsets
            .get(strip_index)
            .ok_or_else(|| ImageError::MalformedTiff("row addresses missing strip".to_owned()))? as usize;
        let strip_len = *self.strip_byte_counts.get(strip_index).unwrap_or(&0) as usize;
        let row_start = strip_offset + row_in_strip as usize * row_bytes;
        let row_end = row_start + row_bytes;
        if row_end > self.data.len() || (row_in_strip as usize + 1) * row_bytes > strip_len {
            return Err(ImageError::MalformedTiff("scanline runs past strip bounds".to_owned()));
        }

        let window_start = row_start + self.window.x as usize * bpp as usize;
        let window_len = (self.window.width as usize * bpp as usize).min(out.len());
        out[..window_len].copy_from_slice(&self.data[window_start..window_start + window_len]);

        self.current_row += 1;
        Ok(window_len)
    }
}

fn read_u16(data: &[u8], offset: usize, little_endian: bool) -> Result<u16, ImageError> {
    let b = data
        .get(offset..offset + 2)
        .ok_or_else(|| ImageError::MalformedTiff("read past end of buffer".to_owned()))?;
    Ok(if little_endian {
        u16::from_le_bytes([b[0], b[1]])
    } else {
        u16::from_be_bytes([b[0], b[1]])
    })
}

fn read_u32(data: &[u8], offset: usize, little_endian: bool) -> Result<u32, ImageError> {
    let b = data
        .get(offset..offset + 4)
        .ok_or_else(|| ImageError::MalformedTiff("read past end of buffer".to_owned()))?;
    Ok(if little_endian {
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    } else {
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    })
}

/// Reads a single scalar IFD value (TIFF types SHORT=3 or LONG=4), which
/// for a count of 1 is stored inline in the entry's value field.
fn read_scalar(data: &[u8], offset: usize, field_type: u16, little_endian: bool) -> Result<u32, ImageError> {
    match field_type {
        3 => Ok(read_u16(data, offset, little_endian)? as u32),
        4 => read_u32(data, offset, little_endian),
        other => Err(ImageError::MalformedTiff(format!("unsupported scalar field type {other}"))),
    }
}

/// Reads a SHORT/LONG array. For SHORT arrays of length 1 it is inline;
/// longer arrays (and all LONG arrays except length-1 LONG, which is also
/// inline) are stored at the offset this entry's value field points to.
fn read_array(
    data: &[u8],
    value_field_offset: usize,
    field_type: u16,
    count: usize,
    little_endian: bool,
) -> Result<Vec<u32>, ImageError> {
    let elem_size = match field_type {
        3 => 2,
        4 => 4,
        other => return Err(ImageError::MalformedTiff(format!("unsupported array field type {other}"))),
    };
    let inline_capacity = 4 / elem_size;
    let base = if count <= inline_capacity {
        value_field_offset
    } else {
        read_u32(data, value_field_offset, little_endian)? as usize
    };

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let off = base + i * elem_size;
        out.push(read_scalar(data, off, field_type, little_endian)?);
    }
    Ok(out)
}
