//! Image preparation for 128-dot label printers.
//!
//! Scales a source image to the printable height of a label, flattens it to
//! grayscale and binarizes it, either with a fixed threshold or with
//! Floyd-Steinberg error diffusion.

pub mod dither;
pub mod resize;
pub mod transform;

// Re-exports for convenience
pub use dither::{floyd_steinberg_dither, threshold_convert};
pub use resize::resize_to_height;
pub use transform::{flatten_alpha, transform_for_label};

/// Luma of a printed (burned) pixel.
pub const BLACK: u8 = 0;

/// Luma of blank label.
pub const WHITE: u8 = 255;

/// Binarization strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DitherMode {
    /// Fixed threshold.
    #[default]
    None,
    FloydSteinberg,
}

impl std::str::FromStr for DitherMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "threshold" => Ok(Self::None),
            "floyd-steinberg" | "floyd_steinberg" | "fs" => Ok(Self::FloydSteinberg),
            other => Err(format!("unknown dither mode '{other}'")),
        }
    }
}

impl std::fmt::Display for DitherMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::FloydSteinberg => f.write_str("floyd-steinberg"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImageError {
    #[error("threshold {0} is outside 0.0..=1.0")]
    InvalidThreshold(f32),

    #[error("source image has no pixels")]
    EmptyImage,

    #[error("target height must be positive")]
    InvalidHeight,
}
