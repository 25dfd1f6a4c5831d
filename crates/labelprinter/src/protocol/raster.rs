//! Raster line encoding.
//!
//! Each image column becomes one raster line. The image is centered on the
//! 128-dot head by prefixing zero bytes; the trailing half of the padding is
//! left out since the printer fills the rest of the line with blanks.

use image::GrayImage;

use super::commands::{PRINT, PRINT_AND_FEED};
use crate::PRINT_HEAD_DOTS;

const RASTER_LINE: u8 = 0x47;

/// Pixels at or above this luma are blank paper.
const LIGHT_THRESHOLD: u8 = 128;

/// Byte layout of one raster line for a given image height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterGeometry {
    pub pad_bytes: usize,
    pub data_bytes: usize,
}

impl RasterGeometry {
    /// `None` unless `height` is a positive multiple of 8 no taller than the head.
    pub fn for_height(height: u32) -> Option<Self> {
        if height == 0 || height > PRINT_HEAD_DOTS || height % 8 != 0 {
            return None;
        }
        Some(Self {
            pad_bytes: (((PRINT_HEAD_DOTS - height) / 2) / 8) as usize,
            data_bytes: (height / 8) as usize,
        })
    }

    /// Value of the raster line header's byte count.
    pub fn line_bytes(&self) -> usize {
        self.pad_bytes + self.data_bytes
    }
}

/// Encode every column of `bitmap` followed by the page terminator.
///
/// Returns `None` when the bitmap height has no raster geometry.
pub fn encode_raster(bitmap: &GrayImage, last_page: bool) -> Option<Vec<u8>> {
    let geometry = RasterGeometry::for_height(bitmap.height())?;
    let line_bytes = geometry.line_bytes();
    let width = bitmap.width();

    let mut out = Vec::with_capacity(width as usize * (3 + line_bytes) + 1);
    for x in 0..width {
        out.extend_from_slice(&[RASTER_LINE, line_bytes as u8, 0x00]);
        out.resize(out.len() + geometry.pad_bytes, 0x00);

        for byte_idx in 0..geometry.data_bytes as u32 {
            let mut light = 0u8;
            for bit in 0..8u32 {
                let y = byte_idx * 8 + bit;
                if bitmap.get_pixel(x, y).0[0] >= LIGHT_THRESHOLD {
                    light |= 0x80 >> bit;
                }
            }
            // Device polarity: a set bit burns a dot.
            out.push(!light);
        }
    }

    out.push(if last_page { PRINT_AND_FEED } else { PRINT });
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn geometry_for_supported_heights() {
        let expected = [(32, 6, 4), (48, 5, 6), (64, 4, 8), (96, 2, 12), (128, 0, 16)];
        for (height, pad, data) in expected {
            let g = RasterGeometry::for_height(height).unwrap();
            assert_eq!(g.pad_bytes, pad, "height {height}");
            assert_eq!(g.data_bytes, data, "height {height}");
        }
        assert_eq!(RasterGeometry::for_height(64).unwrap().line_bytes(), 12);
        assert_eq!(RasterGeometry::for_height(128).unwrap().line_bytes(), 16);
    }

    #[test]
    fn geometry_rejects_unusable_heights() {
        assert_eq!(RasterGeometry::for_height(0), None);
        assert_eq!(RasterGeometry::for_height(60), None);
        assert_eq!(RasterGeometry::for_height(136), None);
    }

    #[test]
    fn white_column_encodes_to_zero_bytes() {
        let img = GrayImage::from_pixel(1, 64, Luma([255]));
        let raster = encode_raster(&img, true).unwrap();
        let mut expected = vec![0x47, 12, 0x00];
        expected.extend(std::iter::repeat_n(0x00, 12));
        expected.push(0x1a);
        assert_eq!(raster, expected);
    }

    #[test]
    fn black_column_encodes_to_full_bytes() {
        let img = GrayImage::from_pixel(2, 128, Luma([0]));
        let raster = encode_raster(&img, false).unwrap();
        assert_eq!(raster.len(), 2 * (3 + 16) + 1);
        assert_eq!(&raster[..3], &[0x47, 16, 0x00]);
        assert!(raster[3..19].iter().all(|&b| b == 0xff));
        assert_eq!(*raster.last().unwrap(), 0x0c);
    }

    #[test]
    fn first_pixel_is_most_significant_bit() {
        let mut img = GrayImage::from_pixel(1, 32, Luma([255]));
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(0, 9, Luma([0]));
        let raster = encode_raster(&img, true).unwrap();
        let pad = 6;
        let data = &raster[3 + pad..3 + pad + 4];
        assert_eq!(data, &[0x80, 0x40, 0x00, 0x00]);
    }

    #[test]
    fn columns_are_emitted_left_to_right() {
        let mut img = GrayImage::from_pixel(3, 64, Luma([255]));
        for y in 0..64 {
            img.put_pixel(2, y, Luma([0]));
        }
        let raster = encode_raster(&img, true).unwrap();
        let line = 3 + 12;
        assert!(raster[..2 * line].iter().skip(3).take(12).all(|&b| b == 0));
        assert!(raster[2 * line + 3 + 4..3 * line].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn invalid_height_is_rejected() {
        let img = GrayImage::from_pixel(4, 50, Luma([0]));
        assert!(encode_raster(&img, true).is_none());
    }
}
