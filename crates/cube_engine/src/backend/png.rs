//! PNG output for the headless back-end

use std::path::Path;

use image::error::{ParameterError, ParameterErrorKind};
use image::{ImageError, ImageFormat, RgbaImage};

use super::BackendResult;

/// Reorder packed `B, G, R, X` pixels into opaque `R, G, B, 0xFF`
///
/// Each group of four bytes is read as a little-endian `u32` with red in
/// bits 16..24, green in 8..16 and blue in 0..8. Trailing bytes that do not
/// form a whole pixel are dropped.
pub fn bgrx_to_rgba(pixels: &[u8]) -> Vec<u8> {
    pixels
        .chunks_exact(4)
        .flat_map(|chunk| {
            let p = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            [
                ((p >> 16) & 0xff) as u8,
                ((p >> 8) & 0xff) as u8,
                (p & 0xff) as u8,
                0xff,
            ]
        })
        .collect()
}

/// Write tightly packed `width * 4` byte rows of BGRX pixels as an RGBA PNG
pub fn write_bgrx(path: &Path, width: u32, height: u32, pixels: &[u8]) -> BackendResult<()> {
    let image = RgbaImage::from_raw(width, height, bgrx_to_rgba(pixels)).ok_or_else(|| {
        ImageError::Parameter(ParameterError::from_kind(ParameterErrorKind::DimensionMismatch))
    })?;
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swizzle_moves_red_and_blue() {
        let bgrx = [0x10, 0x20, 0x30, 0x00, 0xff, 0x00, 0x00, 0x7f];
        assert_eq!(
            bgrx_to_rgba(&bgrx),
            vec![0x30, 0x20, 0x10, 0xff, 0x00, 0x00, 0xff, 0xff]
        );
    }

    #[test]
    fn test_swizzle_keeps_clear_gray() {
        assert_eq!(bgrx_to_rgba(&[0x33, 0x33, 0x33, 0x00]), vec![51, 51, 51, 255]);
    }

    #[test]
    fn test_written_png_has_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.png");
        let (width, height) = (3, 2);
        let pixels: Vec<u8> = (0..width * height).flat_map(|i| [i as u8, 0x33, 0x66, 0]).collect();

        write_bgrx(&path, width, height, &pixels).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (width, height));
        assert_eq!(decoded.get_pixel(0, 0).0, [0x66, 0x33, 0, 255]);
        assert_eq!(decoded.get_pixel(2, 1).0, [0x66, 0x33, 5, 255]);
        assert_eq!(decoded.as_raw().len(), (width * 4 * height) as usize);
    }

    #[test]
    fn test_short_pixel_buffer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.png");
        assert!(write_bgrx(&path, 4, 4, &[0; 8]).is_err());
        assert!(!path.exists());
    }
}
