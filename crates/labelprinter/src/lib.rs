//! USB label printer control library.
//!
//! Provides device discovery filtered by an allow-list, a single mutex-guarded
//! printer connection, the `ESC i` raster protocol (status query, page setup,
//! raster lines) and the print-completion polling loop.

pub mod connection;
pub mod heartbeat;
pub mod nusb_host;
pub mod options;
pub mod printer;
pub mod protocol;
pub mod registry;
pub mod usb;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use connection::ConnectionManager;
pub use heartbeat::StatusHeartbeat;
pub use nusb_host::NusbHost;
pub use options::{PrintRequest, PrinterTimings};
pub use printer::PrinterConnection;
pub use protocol::{DeviceFault, DeviceStatusError, LabelSize, PrinterStatus};
pub use registry::{DeviceRegistry, PrinterConnectionState};
pub use usb::{DeviceEvent, DeviceEventSource, DeviceId, UsbDevice, UsbHost, UsbIdentifier};

pub use image_processor::DitherMode;

/// Number of dots on the print head, i.e. the length of one raster line.
pub const PRINT_HEAD_DOTS: u32 = 128;

/// Transport and host-side faults. Carries no assumption about device state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommunicationError {
    #[error("No printer is available")]
    NoPrinter,

    #[error("Permission to access the printer was not granted")]
    PermissionDenied,

    #[error("No printer connection has been opened")]
    ConnectionNull,

    #[error("USB setup failed: {0}")]
    UsbSetup(String),

    #[error("USB transfer failed: {0}")]
    Transfer(String),

    #[error("Unexpected status response: {0}")]
    Parsing(String),

    #[error("Timed out after {0} ms waiting for the printer")]
    Timeout(u64),

    #[error("Printer communication error: {0}")]
    Generic(String),
}

/// Preconditions and device-reported conditions that stop a print job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrintStatusError {
    #[error("Print configuration is incomplete")]
    ConfigNull,

    #[error("Label size is unknown, insert a label cassette")]
    LabelSizeUnknown,

    #[error("Label size mismatch: expected {expected}, printer reports {actual}")]
    LabelSizeMismatch { expected: LabelSize, actual: LabelSize },

    #[error("Bitmap height {actual} does not match label height {expected}")]
    BitmapHeightMismatch { expected: u32, actual: u32 },

    #[error("Printer reported an error: {0}")]
    Device(DeviceStatusError),
}

/// Error returned by a status query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Communication(#[from] CommunicationError),

    #[error(transparent)]
    Device(#[from] DeviceStatusError),
}

/// Error returned by a print job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrintError {
    #[error(transparent)]
    Communication(#[from] CommunicationError),

    #[error(transparent)]
    Status(#[from] PrintStatusError),
}

/// Outcome of a status query.
pub type QueryResult = std::result::Result<PrinterStatus, QueryError>;

/// Outcome of a print job.
pub type PrintResult = std::result::Result<(), PrintError>;
