//! Print job and timing configuration.

use std::time::Duration;

use image::{DynamicImage, GrayImage};
use image_processor::{DitherMode, ImageError, transform_for_label};

use crate::{LabelSize, PrintStatusError};

/// Timeouts and intervals used by the connection manager and print loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrinterTimings {
    /// Per-chunk timeout of every bulk transfer.
    pub transfer_timeout: Duration,

    /// How long to wait for the OS to answer a permission request.
    pub permission_timeout: Duration,

    /// Pause between status reads while a page prints.
    pub poll_interval: Duration,

    /// Deadline for an intermediate page to finish.
    pub page_timeout: Duration,

    /// Deadline for the last page, which also feeds and cuts.
    pub last_page_timeout: Duration,

    /// Interval of the idle status heartbeat.
    pub heartbeat_interval: Duration,
}

impl Default for PrinterTimings {
    fn default() -> Self {
        Self {
            transfer_timeout: Duration::from_millis(500),
            permission_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(250),
            page_timeout: Duration::from_millis(7500),
            last_page_timeout: Duration::from_millis(15000),
            heartbeat_interval: Duration::from_millis(300),
        }
    }
}

impl PrinterTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transfer_timeout(mut self, val: Duration) -> Self {
        self.transfer_timeout = val;
        self
    }

    pub fn with_permission_timeout(mut self, val: Duration) -> Self {
        self.permission_timeout = val;
        self
    }

    pub fn with_poll_interval(mut self, val: Duration) -> Self {
        self.poll_interval = val;
        self
    }

    pub fn with_page_timeout(mut self, val: Duration) -> Self {
        self.page_timeout = val;
        self
    }

    pub fn with_last_page_timeout(mut self, val: Duration) -> Self {
        self.last_page_timeout = val;
        self
    }

    /// Builder: set heartbeat interval (minimum 50 ms).
    pub fn with_heartbeat_interval(mut self, val: Duration) -> Self {
        self.heartbeat_interval = val.max(Duration::from_millis(50));
        self
    }

    /// Deadline for the page at hand.
    pub fn page_deadline(&self, last_page: bool) -> Duration {
        if last_page {
            self.last_page_timeout
        } else {
            self.page_timeout
        }
    }
}

/// One print action. Immutable once built.
#[derive(Debug, Clone)]
pub struct PrintRequest {
    pub copies: u32,
    pub dither: DitherMode,
    /// Binarization threshold in 0.0..=1.0, used only without dithering.
    pub threshold: f32,
    /// Monochrome bitmap, one column per raster line.
    pub bitmap: GrayImage,
    /// Label size the bitmap was rendered for.
    pub label_size: LabelSize,
}

impl PrintRequest {
    /// Wrap an already transformed bitmap.
    ///
    /// `dither` and `threshold` only describe how the bitmap was made and
    /// default to plain thresholding at 0.5; see [`Self::with_binarization`].
    pub fn new(bitmap: GrayImage, label_size: LabelSize, copies: u32) -> Self {
        Self {
            copies,
            dither: DitherMode::None,
            threshold: 0.5,
            bitmap,
            label_size,
        }
    }

    /// Record the binarization that produced the bitmap.
    pub fn with_binarization(mut self, dither: DitherMode, threshold: f32) -> Self {
        self.dither = dither;
        self.threshold = threshold;
        self
    }

    /// Transform `source` for `label_size` and build the request.
    pub fn prepare(
        source: &DynamicImage,
        label_size: LabelSize,
        copies: u32,
        dither: DitherMode,
        threshold: f32,
    ) -> Result<Self, ImageError> {
        let bitmap = transform_for_label(source, label_size.pixels(), dither, threshold)?;
        Ok(Self::new(bitmap, label_size, copies).with_binarization(dither, threshold))
    }

    /// Checks made before the printer is touched.
    pub fn validate(&self) -> Result<(), PrintStatusError> {
        if self.copies == 0 || self.bitmap.width() == 0 || self.bitmap.height() == 0 {
            return Err(PrintStatusError::ConfigNull);
        }
        if self.label_size == LabelSize::Unknown {
            return Err(PrintStatusError::LabelSizeUnknown);
        }
        let expected = self.label_size.pixels();
        if self.bitmap.height() != expected {
            return Err(PrintStatusError::BitmapHeightMismatch {
                expected,
                actual: self.bitmap.height(),
            });
        }
        Ok(())
    }
}
