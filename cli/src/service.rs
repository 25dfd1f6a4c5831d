//! Printer service: registry state, the connection manager and device events.

use std::sync::Arc;

use labelprinter::{
    CommunicationError, ConnectionManager, DeviceEvent, DeviceId, DeviceRegistry, PrintRequest,
    PrintResult, PrinterConnectionState, PrinterTimings, QueryResult, UsbDevice, UsbHost,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Observable printer state plus the operations that change it.
pub struct PrinterService<H: UsbHost> {
    registry: DeviceRegistry,
    manager: ConnectionManager<H>,
    state: watch::Sender<PrinterConnectionState>,
}

impl<H: UsbHost> PrinterService<H> {
    pub fn new(host: Arc<H>, registry: DeviceRegistry, timings: PrinterTimings) -> Self {
        let (state, _) = watch::channel(PrinterConnectionState::default());
        Self {
            registry,
            manager: ConnectionManager::with_shared_host(host, timings),
            state,
        }
    }

    pub fn manager(&self) -> &ConnectionManager<H> {
        &self.manager
    }

    pub fn state(&self) -> PrinterConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PrinterConnectionState> {
        self.state.subscribe()
    }

    /// Re-enumerate and publish the new state.
    ///
    /// Closes the live connection when its device is no longer selected.
    pub async fn refresh(&self, preferred: Option<&DeviceId>) -> Result<PrinterConnectionState, CommunicationError> {
        let devices = self.manager.host().devices()?;
        let previous = self.state();
        let next = self.registry.refresh(&previous, devices, preferred);
        Ok(self.apply(previous, next).await)
    }

    /// Make `id` the selected printer if it is available.
    pub async fn select(&self, id: &DeviceId) -> PrinterConnectionState {
        let previous = self.state();
        let next = self.registry.select(&previous, id);
        self.apply(previous, next).await
    }

    async fn apply(
        &self,
        previous: PrinterConnectionState,
        next: PrinterConnectionState,
    ) -> PrinterConnectionState {
        if previous.selected != next.selected {
            if let Some(old) = &previous.selected {
                if self.manager.close_device(old).await {
                    tracing::info!(device = %old, "Closed connection to deselected printer");
                }
            }
        }
        self.state.send_replace(next.clone());
        next
    }

    /// Open the selected printer.
    pub async fn connect(&self) -> Result<UsbDevice, CommunicationError> {
        let device = self
            .state()
            .selected_device()
            .cloned()
            .ok_or(CommunicationError::NoPrinter)?;

        let result = self.manager.request_permission_and_open(&device).await;
        self.state.send_modify(|s| s.connected = result.is_ok());
        result.map(|()| device)
    }

    pub async fn query(&self) -> QueryResult {
        self.manager.query().await
    }

    pub async fn print(&self, request: &PrintRequest) -> PrintResult {
        self.manager.print(request).await
    }

    pub async fn close(&self) {
        self.manager.close().await;
        self.state.send_modify(|s| s.connected = false);
    }

    /// Apply one device event to the published state.
    pub async fn handle_event(&self, event: DeviceEvent) -> Result<(), CommunicationError> {
        match event {
            DeviceEvent::Attached(device) => {
                tracing::debug!(device = %device.id, "Device attached");
                self.refresh(None).await?;
            }
            DeviceEvent::Detached(id) => {
                if self.manager.close_device(&id).await {
                    tracing::warn!(device = %id, "Connected printer was unplugged");
                    self.state.send_modify(|s| s.connected = false);
                }
                self.refresh(None).await?;
            }
            DeviceEvent::PermissionResult { device, granted } => {
                tracing::debug!(device = %device, granted, "Permission result");
            }
        }
        Ok(())
    }

    /// Follow device events until `token` is cancelled.
    pub async fn run_events(&self, token: CancellationToken) {
        let mut events = self.manager.host().subscribe();
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Err(e) = self.handle_event(event).await {
                        tracing::warn!("Failed to refresh printer list: {e}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Device events lagged, re-enumerating");
                    if let Err(e) = self.refresh(None).await {
                        tracing::warn!("Failed to refresh printer list: {e}");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Device event loop stopped");
    }
}
