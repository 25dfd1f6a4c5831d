//! 32-byte status record parsing.

use super::{DeviceStatusError, LabelSize, PrinterStatus};
use crate::{CommunicationError, QueryError, QueryResult};

/// Length of a status record.
pub const STATUS_LEN: usize = 32;

const HEADER: [u8; 2] = [0x80, 0x20];

const ERROR1: usize = 8;
const ERROR2: usize = 9;
const MEDIA_WIDTH: usize = 10;
const STATUS_TYPE: usize = 18;
const PHASE_TYPE: usize = 19;
const PHASE1: usize = 20;
const PHASE2: usize = 21;

/// Parse a status record into a healthy status or a device error.
pub fn parse_status(buf: &[u8]) -> QueryResult {
    if buf.len() != STATUS_LEN {
        return Err(CommunicationError::Parsing(format!(
            "status record is {} bytes, expected {STATUS_LEN}",
            buf.len()
        ))
        .into());
    }

    if buf[..2] != HEADER {
        return Err(CommunicationError::Parsing(format!(
            "invalid header {:02x} {:02x}",
            buf[0], buf[1]
        ))
        .into());
    }

    let label_size = LabelSize::from_raw(buf[MEDIA_WIDTH]).ok_or_else(|| {
        CommunicationError::Parsing(format!(
            "unsupported media width {}, expected 0, 6, 9, 12, 18 or 24",
            buf[MEDIA_WIDTH]
        ))
    })?;

    let (error1, error2) = (buf[ERROR1], buf[ERROR2]);
    if error1 != 0 || error2 != 0 {
        tracing::warn!(error1, error2, "Printer reported error bits");
        return Err(QueryError::Device(DeviceStatusError {
            label_size,
            error1,
            error2,
            status: buf[STATUS_TYPE],
            phase_type: buf[PHASE_TYPE],
            phase1: buf[PHASE1],
            phase2: buf[PHASE2],
        }));
    }

    Ok(PrinterStatus {
        label_size,
        status: buf[STATUS_TYPE],
        phase_type: buf[PHASE_TYPE],
        phase1: buf[PHASE1],
        phase2: buf[PHASE2],
    })
}

/// Build a status record; used by tests and fakes.
#[cfg(test)]
pub(crate) fn status_record(media_width: u8, phase_type: u8, error1: u8, error2: u8) -> [u8; STATUS_LEN] {
    let mut buf = [0u8; STATUS_LEN];
    buf[..2].copy_from_slice(&HEADER);
    buf[ERROR1] = error1;
    buf[ERROR2] = error2;
    buf[MEDIA_WIDTH] = media_width;
    buf[PHASE_TYPE] = phase_type;
    buf
}
