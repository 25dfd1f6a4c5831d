//! Aspect-preserving scaling to the printable label height.

use image::DynamicImage;
use image::imageops::FilterType;
use tracing::debug;

/// Width after scaling `(width, height)` to `target_height`.
///
/// Truncates, never returns zero.
pub fn scaled_width(width: u32, height: u32, target_height: u32) -> u32 {
    if height == 0 {
        return 1;
    }
    let w = u64::from(width) * u64::from(target_height) / u64::from(height);
    u32::try_from(w).unwrap_or(u32::MAX).max(1)
}

/// Resize an image to a target height while maintaining aspect ratio.
///
/// Uses bilinear (triangle) filtering. Returns the image unchanged if it
/// already has the target height.
pub fn resize_to_height(img: &DynamicImage, height: u32) -> DynamicImage {
    let (orig_w, orig_h) = (img.width(), img.height());

    if orig_h == height {
        debug!(height, "Image already at target height, skipping resize");
        return img.clone();
    }

    let new_width = scaled_width(orig_w, orig_h, height);
    debug!(
        orig_w,
        orig_h,
        new_width,
        new_height = height,
        "Resizing image to label height"
    );

    img.resize_exact(new_width, height, FilterType::Triangle)
}
