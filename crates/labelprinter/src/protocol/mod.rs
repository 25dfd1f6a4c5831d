//! `ESC i` raster protocol: command encoding, status parsing and raster lines.
//!
//! The printer answers a status request with a fixed 32-byte record and
//! accepts one raster line per image column, 128 dots tall.

pub mod commands;
pub mod raster;
pub mod status;

use std::fmt;

use serde::Serialize;

pub use commands::Command;
pub use raster::{RasterGeometry, encode_raster};
pub use status::{STATUS_LEN, parse_status};

/// Label cassette width as reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LabelSize {
    Mm6,
    Mm9,
    Mm12,
    Mm18,
    Mm24,
    /// No cassette (or lid open). Renders at 64 px so a preview is still possible.
    Unknown,
}

impl LabelSize {
    pub const ALL: [LabelSize; 6] = [
        LabelSize::Mm6,
        LabelSize::Mm9,
        LabelSize::Mm12,
        LabelSize::Mm18,
        LabelSize::Mm24,
        LabelSize::Unknown,
    ];

    /// Decode the status record's media width byte.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(LabelSize::Unknown),
            6 => Some(LabelSize::Mm6),
            9 => Some(LabelSize::Mm9),
            12 => Some(LabelSize::Mm12),
            18 => Some(LabelSize::Mm18),
            24 => Some(LabelSize::Mm24),
            _ => None,
        }
    }

    /// Width in millimeters, also the media width byte of the print information command.
    pub fn millimeters(self) -> u8 {
        match self {
            LabelSize::Mm6 => 6,
            LabelSize::Mm9 => 9,
            LabelSize::Mm12 => 12,
            LabelSize::Mm18 => 18,
            LabelSize::Mm24 => 24,
            LabelSize::Unknown => 0,
        }
    }

    /// Printable height in dots.
    pub fn pixels(self) -> u32 {
        match self {
            LabelSize::Mm6 => 32,
            LabelSize::Mm9 => 48,
            LabelSize::Mm12 => 64,
            LabelSize::Mm18 => 96,
            LabelSize::Mm24 => 128,
            LabelSize::Unknown => 64,
        }
    }
}

impl fmt::Display for LabelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelSize::Unknown => f.write_str("unknown"),
            other => write!(f, "{} mm", other.millimeters()),
        }
    }
}

impl std::str::FromStr for LabelSize {
    type Err = String;

    /// Accepts a cassette width such as `12`, `12mm` or `12 mm`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_end_matches("mm").trim();
        let mm: u8 = digits
            .parse()
            .map_err(|_| format!("invalid label width '{s}'"))?;
        match LabelSize::from_raw(mm) {
            Some(LabelSize::Unknown) | None => Err(format!(
                "unsupported label width {mm} mm, expected 6, 9, 12, 18 or 24"
            )),
            Some(size) => Ok(size),
        }
    }
}

/// Healthy status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrinterStatus {
    pub label_size: LabelSize,
    pub status: u8,
    /// 0 when idle; anything else while printing or feeding.
    pub phase_type: u8,
    pub phase1: u8,
    pub phase2: u8,
}

impl PrinterStatus {
    pub fn is_idle(&self) -> bool {
        self.phase_type == 0
    }
}

/// Status record with at least one error bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatusError {
    pub label_size: LabelSize,
    pub error1: u8,
    pub error2: u8,
    pub status: u8,
    pub phase_type: u8,
    pub phase1: u8,
    pub phase2: u8,
}

impl DeviceStatusError {
    /// Named faults for every set bit.
    pub fn faults(&self) -> Vec<DeviceFault> {
        DeviceFault::ALL
            .into_iter()
            .filter(|fault| {
                let (byte, bit) = fault.position();
                let bits = if byte == 1 { self.error1 } else { self.error2 };
                bits & (1 << bit) != 0
            })
            .collect()
    }
}

impl fmt::Display for DeviceStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let faults = self.faults();
        if faults.is_empty() {
            return write!(f, "error bits {:#04x}/{:#04x}", self.error1, self.error2);
        }
        let names: Vec<String> = faults.iter().map(ToString::to_string).collect();
        f.write_str(&names.join(", "))
    }
}

impl std::error::Error for DeviceStatusError {}

/// Faults reported in status bytes 8 and 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceFault {
    NoMedia,
    EndOfMedia,
    CutterJam,
    WeakBattery,
    HighVoltageAdapter,
    ReplaceMedia,
    ExpansionBufferFull,
    Transmission,
    TransmissionBufferFull,
    CoverOpen,
    Overheating,
}

impl DeviceFault {
    pub const ALL: [DeviceFault; 11] = [
        DeviceFault::NoMedia,
        DeviceFault::EndOfMedia,
        DeviceFault::CutterJam,
        DeviceFault::WeakBattery,
        DeviceFault::HighVoltageAdapter,
        DeviceFault::ReplaceMedia,
        DeviceFault::ExpansionBufferFull,
        DeviceFault::Transmission,
        DeviceFault::TransmissionBufferFull,
        DeviceFault::CoverOpen,
        DeviceFault::Overheating,
    ];

    /// (error byte 1 or 2, bit index).
    fn position(self) -> (u8, u8) {
        match self {
            DeviceFault::NoMedia => (1, 0),
            DeviceFault::EndOfMedia => (1, 1),
            DeviceFault::CutterJam => (1, 2),
            DeviceFault::WeakBattery => (1, 3),
            DeviceFault::HighVoltageAdapter => (1, 6),
            DeviceFault::ReplaceMedia => (2, 0),
            DeviceFault::ExpansionBufferFull => (2, 1),
            DeviceFault::Transmission => (2, 2),
            DeviceFault::TransmissionBufferFull => (2, 3),
            DeviceFault::CoverOpen => (2, 4),
            DeviceFault::Overheating => (2, 5),
        }
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DeviceFault::NoMedia => "no media",
            DeviceFault::EndOfMedia => "end of media",
            DeviceFault::CutterJam => "cutter jam",
            DeviceFault::WeakBattery => "weak battery",
            DeviceFault::HighVoltageAdapter => "high voltage adapter",
            DeviceFault::ReplaceMedia => "replace media",
            DeviceFault::ExpansionBufferFull => "expansion buffer full",
            DeviceFault::Transmission => "transmission error",
            DeviceFault::TransmissionBufferFull => "transmission buffer full",
            DeviceFault::CoverOpen => "cover open",
            DeviceFault::Overheating => "overheating",
        };
        f.write_str(msg)
    }
}
