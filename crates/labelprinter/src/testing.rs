//! In-memory USB host and transport for tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::CommunicationError;
use crate::protocol::STATUS_LEN;
use crate::usb::{
    BulkEndpoints, BulkTransport, DeviceEvent, DeviceEventSource, DeviceId, EndpointDescriptor,
    EndpointDirection, EndpointKind, InterfaceDescriptor, TransportError, UsbDevice, UsbHost,
};

pub(crate) const TEST_VID: u16 = 0x04f9;
pub(crate) const TEST_PID: u16 = 0x20af;

pub(crate) fn device(id: &str, vendor_id: u16, product_id: u16) -> UsbDevice {
    UsbDevice {
        id: DeviceId(id.to_string()),
        vendor_id,
        product_id,
        product: None,
    }
}

pub(crate) fn test_device() -> UsbDevice {
    device("001/004", TEST_VID, TEST_PID)
}

/// One recorded bulk transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transfer {
    Write(Vec<u8>),
    Read(usize),
}

#[derive(Default)]
struct TransportState {
    log: Vec<Transfer>,
    reads: VecDeque<Option<Vec<u8>>>,
    short_writes: bool,
    writes_left: Option<usize>,
    close_count: usize,
}

/// Scripted transport. Clones share state, so a test keeps one handle while
/// the connection owns another.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut TransportState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Queue a status record for the next read.
    pub(crate) fn push_status(&self, record: [u8; STATUS_LEN]) {
        self.with(|s| s.reads.push_back(Some(record.to_vec())));
    }

    /// Queue a read that returns only the first `n` bytes of a record.
    pub(crate) fn push_short_read(&self, n: usize) {
        let mut data = vec![0u8; n.min(STATUS_LEN)];
        data.iter_mut().zip([0x80, 0x20]).for_each(|(b, h)| *b = h);
        self.with(|s| s.reads.push_back(Some(data)));
    }

    /// Queue a read that times out.
    pub(crate) fn push_read_error(&self) {
        self.with(|s| s.reads.push_back(None));
    }

    pub(crate) fn set_short_writes(&self, short: bool) {
        self.with(|s| s.short_writes = short);
    }

    /// Let `n` more writes succeed, then fail every write.
    pub(crate) fn fail_writes_after(&self, n: usize) {
        self.with(|s| s.writes_left = Some(n));
    }

    pub(crate) fn log(&self) -> Vec<Transfer> {
        self.with(|s| s.log.clone())
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.with(|s| {
            s.log
                .iter()
                .filter_map(|t| match t {
                    Transfer::Write(data) => Some(data.clone()),
                    Transfer::Read(_) => None,
                })
                .collect()
        })
    }

    pub(crate) fn close_count(&self) -> usize {
        self.with(|s| s.close_count)
    }
}

impl BulkTransport for FakeTransport {
    async fn write_chunk(&mut self, chunk: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        self.with(|s| {
            if let Some(left) = s.writes_left.as_mut() {
                if *left == 0 {
                    return Err(TransportError::Write("pipe stalled".into()));
                }
                *left -= 1;
            }
            if s.short_writes {
                return Ok(chunk.len() / 2);
            }
            s.log.push(Transfer::Write(chunk.to_vec()));
            Ok(chunk.len())
        })
    }

    async fn read(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.with(|s| {
            s.log.push(Transfer::Read(len));
            match s.reads.pop_front() {
                Some(Some(data)) => Ok(data[..len.min(data.len())].to_vec()),
                _ => Err(TransportError::Timeout(timeout.as_millis() as u64)),
            }
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.with(|s| s.close_count += 1);
        Ok(())
    }
}

/// How the fake OS answers permission requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PermissionReply {
    Grant,
    Deny,
    Silent,
}

struct HostState {
    devices: Vec<UsbDevice>,
    granted: HashSet<DeviceId>,
    reply: PermissionReply,
    interfaces: Vec<InterfaceDescriptor>,
    claims: Vec<DeviceId>,
}

/// Fake host handing out clones of one [`FakeTransport`].
#[derive(Clone)]
pub(crate) struct FakeHost {
    state: Arc<Mutex<HostState>>,
    events: broadcast::Sender<DeviceEvent>,
    pub(crate) transport: FakeTransport,
}

pub(crate) fn printer_interface() -> InterfaceDescriptor {
    InterfaceDescriptor {
        number: 0,
        endpoints: vec![
            EndpointDescriptor {
                address: 0x81,
                kind: EndpointKind::Bulk,
                direction: EndpointDirection::In,
            },
            EndpointDescriptor {
                address: 0x02,
                kind: EndpointKind::Bulk,
                direction: EndpointDirection::Out,
            },
        ],
    }
}

impl FakeHost {
    pub(crate) fn new(devices: Vec<UsbDevice>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(HostState {
                devices,
                granted: HashSet::new(),
                reply: PermissionReply::Grant,
                interfaces: vec![printer_interface()],
                claims: Vec::new(),
            })),
            events,
            transport: FakeTransport::new(),
        }
    }

    pub(crate) fn set_reply(&self, reply: PermissionReply) {
        self.state.lock().unwrap().reply = reply;
    }

    pub(crate) fn grant(&self, id: &DeviceId) {
        self.state.lock().unwrap().granted.insert(id.clone());
    }

    pub(crate) fn set_interfaces(&self, interfaces: Vec<InterfaceDescriptor>) {
        self.state.lock().unwrap().interfaces = interfaces;
    }

    pub(crate) fn claims(&self) -> Vec<DeviceId> {
        self.state.lock().unwrap().claims.clone()
    }
}

impl DeviceEventSource for FakeHost {
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

impl UsbHost for FakeHost {
    type Transport = FakeTransport;

    fn devices(&self) -> Result<Vec<UsbDevice>, CommunicationError> {
        Ok(self.state.lock().unwrap().devices.clone())
    }

    fn has_permission(&self, device: &UsbDevice) -> bool {
        self.state.lock().unwrap().granted.contains(&device.id)
    }

    fn request_permission(&self, device: &UsbDevice) {
        let reply = {
            let mut state = self.state.lock().unwrap();
            if state.reply == PermissionReply::Grant {
                state.granted.insert(device.id.clone());
            }
            state.reply
        };
        let granted = match reply {
            PermissionReply::Grant => true,
            PermissionReply::Deny => false,
            PermissionReply::Silent => return,
        };
        let _ = self.events.send(DeviceEvent::PermissionResult {
            device: device.id.clone(),
            granted,
        });
    }

    fn interfaces(&self, _device: &UsbDevice) -> Result<Vec<InterfaceDescriptor>, CommunicationError> {
        Ok(self.state.lock().unwrap().interfaces.clone())
    }

    fn claim(
        &self,
        device: &UsbDevice,
        _endpoints: BulkEndpoints,
    ) -> Result<FakeTransport, CommunicationError> {
        self.state.lock().unwrap().claims.push(device.id.clone());
        Ok(self.transport.clone())
    }
}
