//! Ownership of the single live printer connection.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::options::{PrintRequest, PrinterTimings};
use crate::printer::PrinterConnection;
use crate::usb::{BulkEndpoints, DeviceEvent, DeviceId, UsbDevice, UsbHost};
use crate::{CommunicationError, PrintResult, QueryResult};

/// Cloneable handle to the host and the one connection it may hold.
///
/// Every operation on the connection (open, query, print, close) runs under
/// one async mutex, so a status query issued while a job prints waits for
/// the whole job.
pub struct ConnectionManager<H: UsbHost> {
    host: Arc<H>,
    connection: Arc<Mutex<Option<PrinterConnection<H::Transport>>>>,
    timings: PrinterTimings,
}

impl<H: UsbHost> Clone for ConnectionManager<H> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            connection: Arc::clone(&self.connection),
            timings: self.timings,
        }
    }
}

impl<H: UsbHost> ConnectionManager<H> {
    pub fn new(host: H, timings: PrinterTimings) -> Self {
        Self::with_shared_host(Arc::new(host), timings)
    }

    pub fn with_shared_host(host: Arc<H>, timings: PrinterTimings) -> Self {
        Self {
            host,
            connection: Arc::new(Mutex::new(None)),
            timings,
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn timings(&self) -> &PrinterTimings {
        &self.timings
    }

    /// Obtain OS permission for `device`, then replace any existing
    /// connection with a fresh one.
    pub async fn request_permission_and_open(&self, device: &UsbDevice) -> Result<(), CommunicationError> {
        if !self.host.has_permission(device) {
            self.await_permission(device).await?;
        }

        let mut guard = self.connection.lock().await;
        if let Some(mut previous) = guard.take() {
            previous.close();
        }

        let interfaces = self.host.interfaces(device)?;
        let endpoints = BulkEndpoints::from_interfaces(&interfaces)?;
        let transport = self.host.claim(device, endpoints)?;

        info!(
            device = %device.id,
            vendor_id = format_args!("{:04x}", device.vendor_id),
            product_id = format_args!("{:04x}", device.product_id),
            interface = endpoints.interface,
            "Printer connection opened"
        );
        *guard = Some(PrinterConnection::new(device.clone(), transport, self.timings));
        Ok(())
    }

    async fn await_permission(&self, device: &UsbDevice) -> Result<(), CommunicationError> {
        // Subscribe first so an immediate answer is not lost.
        let mut events = self.host.subscribe();
        debug!(device = %device.id, "Requesting USB permission");
        self.host.request_permission(device);

        let wait = wait_for_permission(&mut events, &device.id);
        match timeout(self.timings.permission_timeout, wait).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(device = %device.id, "USB permission denied");
                Err(CommunicationError::PermissionDenied)
            }
            Err(_) => {
                warn!(
                    device = %device.id,
                    timeout_ms = self.timings.permission_timeout.as_millis() as u64,
                    "No answer to USB permission request"
                );
                Err(CommunicationError::PermissionDenied)
            }
        }
    }

    /// Read one status record from the open printer.
    pub async fn query(&self) -> QueryResult {
        let mut guard = self.connection.lock().await;
        match guard.as_mut() {
            Some(conn) => conn.query().await,
            None => Err(CommunicationError::ConnectionNull.into()),
        }
    }

    /// Run a whole print job while holding the connection.
    pub async fn print(&self, request: &PrintRequest) -> PrintResult {
        request.validate()?;
        let mut guard = self.connection.lock().await;
        match guard.as_mut() {
            Some(conn) => conn.print(request).await,
            None => Err(CommunicationError::ConnectionNull.into()),
        }
    }

    /// Close and drop the connection. Safe to call with none open.
    pub async fn close(&self) {
        if let Some(mut conn) = self.connection.lock().await.take() {
            conn.close();
        }
    }

    /// Close the connection only if it belongs to `id`.
    pub async fn close_device(&self, id: &DeviceId) -> bool {
        let mut guard = self.connection.lock().await;
        if guard.as_ref().is_some_and(|c| &c.device().id == id) {
            if let Some(mut conn) = guard.take() {
                conn.close();
            }
            return true;
        }
        false
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.as_ref().is_some_and(PrinterConnection::is_open)
    }

    pub async fn connected_device(&self) -> Option<UsbDevice> {
        self.connection.lock().await.as_ref().map(|c| c.device().clone())
    }
}

/// Resolve with the answer for `id`, skipping unrelated events.
async fn wait_for_permission(events: &mut broadcast::Receiver<DeviceEvent>, id: &DeviceId) -> bool {
    loop {
        match events.recv().await {
            Ok(DeviceEvent::PermissionResult { device, granted }) if &device == id => return granted,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Device event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}
