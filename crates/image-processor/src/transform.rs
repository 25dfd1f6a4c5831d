//! Source image to printable monochrome bitmap.

use image::{DynamicImage, GrayImage, Rgba, RgbaImage};
use tracing::debug;

use crate::dither::{floyd_steinberg_dither, luma_threshold, threshold_convert};
use crate::resize::resize_to_height;
use crate::{DitherMode, ImageError};

/// Composite a possibly transparent image onto white paper.
///
/// Images without an alpha channel are returned as-is.
pub fn flatten_alpha(img: &DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return img.clone();
    }

    let mut rgba: RgbaImage = img.to_rgba8();
    for Rgba([r, g, b, a]) in rgba.pixels_mut() {
        let alpha = u16::from(*a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        *r = blend(*r);
        *g = blend(*g);
        *b = blend(*b);
        *a = 255;
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Prepare `source` for a label whose printable height is `height` pixels.
///
/// Steps: flatten transparency onto white, scale to `height` keeping the
/// aspect ratio, convert to luma, then binarize. `threshold` is only used
/// with [`DitherMode::None`] but is validated either way.
pub fn transform_for_label(
    source: &DynamicImage,
    height: u32,
    dither: DitherMode,
    threshold: f32,
) -> Result<GrayImage, ImageError> {
    if source.width() == 0 || source.height() == 0 {
        return Err(ImageError::EmptyImage);
    }
    if height == 0 {
        return Err(ImageError::InvalidHeight);
    }
    luma_threshold(threshold)?;

    let flat = flatten_alpha(source);
    let scaled = resize_to_height(&flat, height);
    let gray = scaled.to_luma8();
    debug!(
        width = gray.width(),
        height = gray.height(),
        ?dither,
        "Transforming image for label"
    );

    match dither {
        DitherMode::None => threshold_convert(&gray, threshold),
        DitherMode::FloydSteinberg => Ok(floyd_steinberg_dither(&gray)),
    }
}
