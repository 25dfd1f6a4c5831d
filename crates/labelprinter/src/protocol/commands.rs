//! Fixed-layout command frames.

use super::LabelSize;

const ESC: u8 = 0x1b;

/// `ESC i z` valid flags: media width (0x04) and printer recovery (0x80).
const PRINT_INFO_VALID_FLAGS: u8 = 0x84;

/// Feed margin in dots, about 3 mm.
pub const DEFAULT_MARGIN_DOTS: u16 = 20;

/// Page terminator with more pages to follow.
pub const PRINT: u8 = 0x0c;
/// Page terminator for the final page; feeds and cuts.
pub const PRINT_AND_FEED: u8 = 0x1a;

/// Every non-raster command the engine sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Clear the receive buffer and reset settings.
    Initialize,
    /// Ask for a 32-byte status record.
    StatusRequest,
    /// Switch the command mode to raster.
    RasterMode,
    /// Page geometry for the upcoming raster data.
    PrintInformation {
        label_size: LabelSize,
        raster_lines: u32,
        first_page: bool,
    },
    EachMode { autocut: bool, mirror: bool },
    Margin { dots: u16 },
    /// Uncompressed raster lines.
    NoCompression,
    /// Automatic status notification; unused while the engine polls actively.
    NotifyMode { notify: bool },
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::Initialize => vec![ESC, 0x40],
            Command::StatusRequest => vec![ESC, 0x69, 0x53],
            Command::RasterMode => vec![ESC, 0x69, 0x61, 0x01],
            Command::PrintInformation {
                label_size,
                raster_lines,
                first_page,
            } => {
                let mut buf = Vec::with_capacity(13);
                buf.extend_from_slice(&[ESC, 0x69, 0x7a]);
                buf.push(PRINT_INFO_VALID_FLAGS);
                buf.push(0x00); // media type
                buf.push(label_size.millimeters());
                buf.push(0x00); // media length
                buf.extend_from_slice(&raster_lines.to_le_bytes());
                buf.push(if first_page { 0x00 } else { 0x01 });
                buf.push(0x00);
                buf
            }
            Command::EachMode { autocut, mirror } => {
                let mut flags = 0u8;
                if autocut {
                    flags |= 1 << 6;
                }
                if mirror {
                    flags |= 1 << 7;
                }
                vec![ESC, 0x69, 0x4d, flags]
            }
            Command::Margin { dots } => {
                let [lo, hi] = dots.to_le_bytes();
                vec![ESC, 0x69, 0x64, lo, hi]
            }
            Command::NoCompression => vec![0x4d, 0x00],
            Command::NotifyMode { notify } => {
                vec![ESC, 0x69, 0x21, if notify { 0x00 } else { 0x01 }]
            }
        }
    }
}

/// Commands that set up one page, in send order.
pub fn page_setup(label_size: LabelSize, raster_lines: u32, first_page: bool) -> [Command; 5] {
    [
        Command::RasterMode,
        Command::PrintInformation {
            label_size,
            raster_lines,
            first_page,
        },
        Command::EachMode {
            autocut: true,
            mirror: false,
        },
        Command::Margin {
            dots: DEFAULT_MARGIN_DOTS,
        },
        Command::NoCompression,
    ]
}
