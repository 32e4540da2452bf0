//! Magic-byte format detection (spec.md §4.8): devices routinely advertise
//! a format in `Content-Type` or `pwg:DocumentFormat` that the actual byte
//! stream doesn't match, so the driver always sniffs the real bytes.

use escl_proto::ImageFormat;

pub fn detect(bytes: &[u8]) -> Option<ImageFormat> {
    ImageFormat::sniff(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_jpeg_even_when_header_claimed_otherwise() {
        let jpeg_bytes = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0];
        assert_eq!(detect(&jpeg_bytes), Some(ImageFormat::Jpeg));
    }

    #[test]
    fn unrecognized_bytes_detect_to_none() {
        assert_eq!(detect(b"not an image"), None);
    }
}
