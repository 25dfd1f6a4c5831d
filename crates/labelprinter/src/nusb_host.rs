//! [`UsbHost`] backed by `nusb`.
//!
//! Desktop systems have no runtime permission dialog: access is decided by
//! device node permissions (udev rules on Linux). A permission request is
//! answered by trying to open the device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use nusb::hotplug::HotplugEvent;
use nusb::transfer::{Direction, EndpointType, RequestBuffer};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::CommunicationError;
use crate::usb::{
    BulkEndpoints, BulkTransport, DeviceEvent, DeviceEventSource, DeviceId, EndpointDescriptor,
    EndpointDirection, EndpointKind, InterfaceDescriptor, TransportError, UsbDevice, UsbHost,
};

const EVENT_CAPACITY: usize = 32;

type KnownDevices = Arc<Mutex<HashMap<nusb::DeviceId, DeviceId>>>;

/// Host USB access through `nusb`.
pub struct NusbHost {
    events: broadcast::Sender<DeviceEvent>,
    // Detach notifications only carry nusb's opaque id.
    known: KnownDevices,
}

impl NusbHost {
    /// Create the host and start forwarding hotplug events.
    ///
    /// Must be called from within a tokio runtime. Hotplug support is optional:
    /// when the platform watcher cannot be created the host still enumerates.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let known: KnownDevices = Arc::new(Mutex::new(HashMap::new()));

        match nusb::watch_devices() {
            Ok(watch) => {
                tokio::spawn(forward_hotplug(watch, events.clone(), Arc::clone(&known)));
            }
            Err(e) => tracing::warn!("USB hotplug watch unavailable: {e}"),
        }

        Self { events, known }
    }

    fn find(&self, device: &UsbDevice) -> Result<nusb::DeviceInfo, CommunicationError> {
        let mut devices = nusb::list_devices().map_err(|e| CommunicationError::UsbSetup(e.to_string()))?;
        devices
            .find(|info| device_id(info) == device.id)
            .ok_or(CommunicationError::NoPrinter)
    }

    fn open(&self, device: &UsbDevice) -> Result<nusb::Device, CommunicationError> {
        let info = self.find(device)?;
        info.open().map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                CommunicationError::PermissionDenied
            } else {
                CommunicationError::UsbSetup(format!("failed to open device: {e}"))
            }
        })
    }
}

fn device_id(info: &nusb::DeviceInfo) -> DeviceId {
    DeviceId::from_bus_address(info.bus_number(), info.device_address())
}

fn usb_device(info: &nusb::DeviceInfo) -> UsbDevice {
    UsbDevice {
        id: device_id(info),
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        product: info.product_string().map(str::to_string),
    }
}

async fn forward_hotplug(
    mut watch: nusb::hotplug::HotplugWatch,
    events: broadcast::Sender<DeviceEvent>,
    known: KnownDevices,
) {
    while let Some(event) = watch.next().await {
        let event = match event {
            HotplugEvent::Connected(info) => {
                let device = usb_device(&info);
                if let Ok(mut known) = known.lock() {
                    known.insert(info.id(), device.id.clone());
                }
                tracing::debug!(device = %device.id, identifier = %device.identifier(), "USB device attached");
                DeviceEvent::Attached(device)
            }
            HotplugEvent::Disconnected(nusb_id) => {
                let id = known.lock().ok().and_then(|mut known| known.remove(&nusb_id));
                let Some(id) = id else {
                    continue;
                };
                tracing::debug!(device = %id, "USB device detached");
                DeviceEvent::Detached(id)
            }
        };
        // No subscribers is fine.
        let _ = events.send(event);
    }
    tracing::debug!("USB hotplug stream ended");
}

impl DeviceEventSource for NusbHost {
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

impl UsbHost for NusbHost {
    type Transport = NusbTransport;

    fn devices(&self) -> Result<Vec<UsbDevice>, CommunicationError> {
        let infos: Vec<nusb::DeviceInfo> = nusb::list_devices()
            .map_err(|e| CommunicationError::UsbSetup(format!("failed to enumerate devices: {e}")))?
            .collect();

        if let Ok(mut known) = self.known.lock() {
            for info in &infos {
                known.insert(info.id(), device_id(info));
            }
        }
        Ok(infos.iter().map(usb_device).collect())
    }

    fn has_permission(&self, device: &UsbDevice) -> bool {
        self.open(device).is_ok()
    }

    fn request_permission(&self, device: &UsbDevice) {
        let granted = match self.open(device) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(device = %device.id, "Cannot open printer: {e}");
                false
            }
        };
        let _ = self.events.send(DeviceEvent::PermissionResult {
            device: device.id.clone(),
            granted,
        });
    }

    fn interfaces(&self, device: &UsbDevice) -> Result<Vec<InterfaceDescriptor>, CommunicationError> {
        let handle = self.open(device)?;
        let config = handle.active_configuration().map_err(|e| {
            CommunicationError::UsbSetup(format!("failed to read active configuration: {e}"))
        })?;

        Ok(config
            .interface_alt_settings()
            .filter(|alt| alt.alternate_setting() == 0)
            .map(|alt| InterfaceDescriptor {
                number: alt.interface_number(),
                endpoints: alt
                    .endpoints()
                    .map(|ep| EndpointDescriptor {
                        address: ep.address(),
                        kind: match ep.transfer_type() {
                            EndpointType::Control => EndpointKind::Control,
                            EndpointType::Isochronous => EndpointKind::Isochronous,
                            EndpointType::Bulk => EndpointKind::Bulk,
                            EndpointType::Interrupt => EndpointKind::Interrupt,
                        },
                        direction: match ep.direction() {
                            Direction::In => EndpointDirection::In,
                            Direction::Out => EndpointDirection::Out,
                        },
                    })
                    .collect(),
            })
            .collect())
    }

    fn claim(&self, device: &UsbDevice, endpoints: BulkEndpoints) -> Result<NusbTransport, CommunicationError> {
        let handle = self.open(device)?;
        // The usblp kernel driver may hold the interface on Linux.
        let interface = handle
            .detach_and_claim_interface(endpoints.interface)
            .map_err(|e| {
                CommunicationError::UsbSetup(format!(
                    "failed to claim interface {}: {e}",
                    endpoints.interface
                ))
            })?;

        Ok(NusbTransport {
            interface: Some(interface),
            endpoint_in: endpoints.endpoint_in,
            endpoint_out: endpoints.endpoint_out,
        })
    }
}

/// Claimed printer interface. Dropping the interface releases the claim.
pub struct NusbTransport {
    interface: Option<nusb::Interface>,
    endpoint_in: u8,
    endpoint_out: u8,
}

impl NusbTransport {
    fn interface(&self) -> Result<&nusb::Interface, TransportError> {
        self.interface.as_ref().ok_or(TransportError::Closed)
    }
}

impl BulkTransport for NusbTransport {
    async fn write_chunk(&mut self, chunk: &[u8], limit: Duration) -> Result<usize, TransportError> {
        let transfer = self.interface()?.bulk_out(self.endpoint_out, chunk.to_vec());
        let completion = timeout(limit, transfer)
            .await
            .map_err(|_| TransportError::Timeout(limit.as_millis() as u64))?;
        let written = completion
            .into_result()
            .map_err(|e| TransportError::Write(e.to_string()))?;
        Ok(written.actual_length())
    }

    async fn read(&mut self, len: usize, limit: Duration) -> Result<Vec<u8>, TransportError> {
        let transfer = self.interface()?.bulk_in(self.endpoint_in, RequestBuffer::new(len));
        let completion = timeout(limit, transfer)
            .await
            .map_err(|_| TransportError::Timeout(limit.as_millis() as u64))?;
        completion
            .into_result()
            .map_err(|e| TransportError::Read(e.to_string()))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.interface.take();
        Ok(())
    }
}
