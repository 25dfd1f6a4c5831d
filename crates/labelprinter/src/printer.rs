//! Protocol engine bound to one claimed printer interface.
//!
//! All methods take `&mut self`; serialization between callers is the job of
//! [`crate::ConnectionManager`], which keeps this value behind its mutex.

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::options::{PrintRequest, PrinterTimings};
use crate::protocol::commands::{self, Command};
use crate::protocol::{STATUS_LEN, encode_raster, parse_status};
use crate::usb::{BulkTransport, TransportError, UsbDevice};
use crate::{
    CommunicationError, PrintError, PrintResult, PrintStatusError, QueryError, QueryResult,
};

/// Largest payload handed to a single bulk OUT transfer.
pub const MAX_CHUNK_SIZE: usize = 16384;

/// An opened printer.
pub struct PrinterConnection<T> {
    device: UsbDevice,
    transport: T,
    timings: PrinterTimings,
    open: bool,
}

impl<T: BulkTransport> PrinterConnection<T> {
    /// Wrap a transport whose interface has already been claimed.
    pub fn new(device: UsbDevice, transport: T, timings: PrinterTimings) -> Self {
        Self {
            device,
            transport,
            timings,
            open: true,
        }
    }

    pub fn device(&self) -> &UsbDevice {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Release the interface. Failures are logged, never returned.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.transport.close() {
            warn!(device = %self.device.id, error = %e, "Error closing printer connection");
        } else {
            info!(device = %self.device.id, "Printer connection closed");
        }
    }

    /// Request and read one status record.
    pub async fn query(&mut self) -> QueryResult {
        self.query_inner(true).await
    }

    async fn query_inner(&mut self, request: bool) -> QueryResult {
        self.ensure_open()?;

        if request {
            self.send(Command::StatusRequest).await.map_err(|e| {
                warn!(error = %e, "Status request write failed");
                QueryError::from(transfer_error(e))
            })?;
        }

        let buf = self.bulk_read(STATUS_LEN).await.map_err(|e| {
            // Expected while polling: the printer only answers on state changes.
            debug!(error = %e, "Status read failed");
            QueryError::from(transfer_error(e))
        })?;

        parse_status(&buf)
    }

    /// Print every copy of `request`, waiting for each page to finish.
    pub async fn print(&mut self, request: &PrintRequest) -> PrintResult {
        request.validate()?;
        self.ensure_open()?;

        match self.query().await {
            Ok(status) if status.label_size != request.label_size => {
                warn!(
                    expected = %request.label_size,
                    actual = %status.label_size,
                    "Label size mismatch"
                );
                return Err(PrintStatusError::LabelSizeMismatch {
                    expected: request.label_size,
                    actual: status.label_size,
                }
                .into());
            }
            Ok(_) => {}
            Err(QueryError::Communication(e)) => return Err(e.into()),
            Err(QueryError::Device(e)) => return Err(PrintStatusError::Device(e).into()),
        }

        let width = request.bitmap.width();
        info!(
            copies = request.copies,
            width,
            label = %request.label_size,
            "Starting print job"
        );

        self.send(Command::Initialize).await.map_err(transfer_error)?;

        for copy in 0..request.copies {
            let first_page = copy == 0;
            let last_page = copy + 1 == request.copies;

            self.send_page(request, first_page, last_page)
                .await
                .inspect_err(|e| warn!(copy, error = %e, "Page transfer failed, aborting job"))?;

            self.wait_for_page(last_page).await?;
            debug!(copy, "Page complete");
        }

        info!(copies = request.copies, "Print job complete");
        Ok(())
    }

    async fn send_page(
        &mut self,
        request: &PrintRequest,
        first_page: bool,
        last_page: bool,
    ) -> Result<(), PrintError> {
        let raster = encode_raster(&request.bitmap, last_page).ok_or(
            PrintStatusError::BitmapHeightMismatch {
                expected: request.label_size.pixels(),
                actual: request.bitmap.height(),
            },
        )?;
        for cmd in commands::page_setup(request.label_size, request.bitmap.width(), first_page) {
            self.send(cmd).await.map_err(transfer_error)?;
        }
        self.bulk_write(&raster).await.map_err(transfer_error)?;
        Ok(())
    }

    /// Poll the status record until the printer reports idle.
    ///
    /// No status request is written here: the printer must not receive
    /// commands while it prints, it reports phase changes on its own.
    async fn wait_for_page(&mut self, last_page: bool) -> Result<(), PrintError> {
        let deadline = self.timings.page_deadline(last_page);
        let started = Instant::now();

        while started.elapsed() < deadline {
            sleep(self.timings.poll_interval).await;

            match self.query_inner(false).await {
                Ok(status) if status.is_idle() => return Ok(()),
                Ok(status) => {
                    debug!(phase_type = status.phase_type, status = status.status, "Printing");
                }
                Err(QueryError::Device(e)) => {
                    warn!(error = %e, "Printer reported an error while printing");
                    return Err(PrintStatusError::Device(e).into());
                }
                Err(QueryError::Communication(_)) => {}
            }
        }

        warn!(last_page, "Timed out waiting for the printer to finish");
        Err(CommunicationError::Timeout(deadline.as_millis() as u64).into())
    }

    async fn send(&mut self, cmd: Command) -> Result<(), TransportError> {
        debug!(?cmd, "Sending command");
        self.bulk_write(&cmd.encode()).await
    }

    /// Write `data` in chunks of at most [`MAX_CHUNK_SIZE`] bytes.
    pub(crate) async fn bulk_write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let timeout = self.timings.transfer_timeout;
        for chunk in data.chunks(MAX_CHUNK_SIZE) {
            let written = self.transport.write_chunk(chunk, timeout).await?;
            if written != chunk.len() {
                return Err(TransportError::ShortTransfer {
                    expected: chunk.len(),
                    actual: written,
                });
            }
        }
        Ok(())
    }

    async fn bulk_read(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let buf = self.transport.read(len, self.timings.transfer_timeout).await?;
        if buf.len() != len {
            return Err(TransportError::ShortTransfer {
                expected: len,
                actual: buf.len(),
            });
        }
        Ok(buf)
    }

    fn ensure_open(&self) -> Result<(), CommunicationError> {
        if self.open {
            Ok(())
        } else {
            warn!("Printer connection used before open() succeeded");
            Err(CommunicationError::UsbSetup("connection is not open".into()))
        }
    }
}

fn transfer_error(e: TransportError) -> CommunicationError {
    CommunicationError::Transfer(e.to_string())
}
