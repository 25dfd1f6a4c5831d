//! Binarization of grayscale images.
//!
//! Both functions return images whose pixels are exclusively [`BLACK`] or
//! [`WHITE`].

use image::{GrayImage, Luma};
use tracing::debug;

use crate::{BLACK, ImageError, WHITE};

/// Quantization threshold of the error-diffusion pass.
const DITHER_THRESHOLD: i32 = 128;

/// Apply Floyd-Steinberg dithering to a grayscale image.
///
/// Pixels are visited row by row, left to right. Each pixel is quantized at
/// 128 and its error pushed to unvisited neighbours with integer weights:
/// - Right:        7/16
/// - Bottom-left:  3/16
/// - Bottom:       5/16
/// - Bottom-right: 1/16
///
/// Accumulated values are not clamped, so the result depends only on the
/// input and is identical across runs.
pub fn floyd_steinberg_dither(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    debug!(width, height, "Applying Floyd-Steinberg dithering");

    let w = width as usize;
    let h = height as usize;
    let mut buffer: Vec<i32> = img.as_raw().iter().map(|&v| i32::from(v)).collect();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let old = buffer[idx];
            let new = if old < DITHER_THRESHOLD {
                i32::from(BLACK)
            } else {
                i32::from(WHITE)
            };
            buffer[idx] = new;
            let error = old - new;

            if x + 1 < w {
                buffer[idx + 1] += error * 7 / 16;
            }
            if y + 1 < h {
                let below = idx + w;
                if x > 0 {
                    buffer[below - 1] += error * 3 / 16;
                }
                buffer[below] += error * 5 / 16;
                if x + 1 < w {
                    buffer[below + 1] += error / 16;
                }
            }
        }
    }

    let pixels = buffer.into_iter().map(|v| v as u8).collect();
    // Buffer length always matches the dimensions.
    GrayImage::from_raw(width, height, pixels).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Map a threshold in `0.0..=1.0` to a luma cut-off.
pub fn luma_threshold(threshold: f32) -> Result<u8, ImageError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ImageError::InvalidThreshold(threshold));
    }
    Ok((threshold * 255.0) as u8)
}

/// Simple threshold conversion without dithering.
///
/// Pixels darker than `threshold * 255` become black, all others white.
pub fn threshold_convert(img: &GrayImage, threshold: f32) -> Result<GrayImage, ImageError> {
    let cut = luma_threshold(threshold)?;
    let (width, height) = img.dimensions();
    debug!(width, height, cut, "Applying threshold conversion");

    let mut output = img.clone();
    for Luma([v]) in output.pixels_mut() {
        *v = if *v < cut { BLACK } else { WHITE };
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a small test image with a gradient pattern.
    fn create_gradient_image(width: u32, height: u32) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let val = ((x + y) * 255 / (width + height - 2)) as u8;
                img.put_pixel(x, y, Luma([val]));
            }
        }
        img
    }

    fn assert_binary(img: &GrayImage) {
        for (x, y, Luma([val])) in img.enumerate_pixels() {
            assert!(
                *val == BLACK || *val == WHITE,
                "Pixel ({x}, {y}) = {val}, expected 0 or 255"
            );
        }
    }

    #[test]
    fn test_floyd_steinberg_output_is_binary() {
        let img = create_gradient_image(16, 12);
        assert_binary(&floyd_steinberg_dither(&img));
    }

    #[test]
    fn test_floyd_steinberg_is_deterministic() {
        let img = create_gradient_image(40, 32);
        let first = floyd_steinberg_dither(&img);
        let second = floyd_steinberg_dither(&img);
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn test_floyd_steinberg_uniform_inputs() {
        let white = floyd_steinberg_dither(&GrayImage::from_pixel(4, 4, Luma([255])));
        assert!(white.pixels().all(|p| p.0[0] == WHITE));

        let black = floyd_steinberg_dither(&GrayImage::from_pixel(4, 4, Luma([0])));
        assert!(black.pixels().all(|p| p.0[0] == BLACK));
    }

    #[test]
    fn test_floyd_steinberg_known_row() {
        // 100 -> 0 (error 100), right neighbour gets 100*7/16 = 43: 100+43 = 143 -> 255.
        let img = GrayImage::from_raw(2, 1, vec![100, 100]).unwrap();
        let result = floyd_steinberg_dither(&img);
        assert_eq!(result.as_raw(), &vec![0, 255]);
    }

    #[test]
    fn test_floyd_steinberg_diffuses_down() {
        // Error of the top-left pixel reaches the pixel below with weight 5/16.
        let img = GrayImage::from_raw(1, 2, vec![120, 90]).unwrap();
        // 120 -> 0, error 120; below: 90 + 120*5/16 = 90 + 37 = 127 -> 0.
        assert_eq!(floyd_steinberg_dither(&img).as_raw(), &vec![0, 0]);

        let img = GrayImage::from_raw(1, 2, vec![127, 90]).unwrap();
        // 127*5/16 = 39: 90 + 39 = 129 -> 255.
        assert_eq!(floyd_steinberg_dither(&img).as_raw(), &vec![0, 255]);
    }

    #[test]
    fn test_floyd_steinberg_mid_gray_mixes() {
        let img = GrayImage::from_pixel(16, 16, Luma([128]));
        let result = floyd_steinberg_dither(&img);
        let white = result.pixels().filter(|p| p.0[0] == WHITE).count();
        assert!(white > 64 && white < 192, "white pixels: {white}");
    }

    #[test]
    fn test_threshold_convert_basic() {
        let img = GrayImage::from_raw(4, 1, vec![0, 126, 127, 255]).unwrap();
        // 0.5 * 255 = 127.5 -> 127
        let result = threshold_convert(&img, 0.5).unwrap();
        assert_eq!(result.as_raw(), &vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_threshold_convert_extremes() {
        let img = create_gradient_image(8, 8);
        let all_white = threshold_convert(&img, 0.0).unwrap();
        assert!(all_white.pixels().all(|p| p.0[0] == WHITE));

        // Only full white survives a threshold of 1.0.
        let strict = threshold_convert(&img, 1.0).unwrap();
        assert_eq!(strict.get_pixel(0, 0).0[0], BLACK);
        assert_eq!(strict.get_pixel(7, 7).0[0], WHITE);
    }

    #[test]
    fn test_threshold_convert_is_idempotent() {
        let img = create_gradient_image(10, 6);
        for t in [0.0, 0.25, 0.5, 0.8, 1.0] {
            let once = threshold_convert(&img, t).unwrap();
            let twice = threshold_convert(&once, t).unwrap();
            assert_eq!(once, twice, "threshold {t}");
            assert_binary(&once);
        }
    }

    #[test]
    fn test_threshold_convert_rejects_out_of_range() {
        let img = GrayImage::new(2, 2);
        assert_eq!(
            threshold_convert(&img, 1.5),
            Err(ImageError::InvalidThreshold(1.5))
        );
        assert!(threshold_convert(&img, -0.1).is_err());
        assert!(threshold_convert(&img, f32::NAN).is_err());
    }

    #[test]
    fn test_threshold_convert_preserves_dimensions() {
        let img = GrayImage::new(7, 3);
        let result = threshold_convert(&img, 0.5).unwrap();
        assert_eq!(result.dimensions(), (7, 3));
    }
}
