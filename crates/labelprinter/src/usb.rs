//! USB abstractions shared by the real `nusb` host and test fakes.
//!
//! The engine never talks to a USB stack directly: enumeration, permission and
//! interface claiming go through [`UsbHost`], bulk I/O through [`BulkTransport`],
//! and attach/detach/permission notifications through [`DeviceEventSource`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::CommunicationError;

/// Stable key for an attached device (`bus/address`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn from_bus_address(bus: u8, address: u8) -> Self {
        Self(format!("{bus:03}/{address:03}"))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A (vendor-id, product-id) pair used by the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UsbIdentifier {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbIdentifier {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for UsbIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl std::str::FromStr for UsbIdentifier {
    type Err = String;

    /// Parses `vid:pid` with hexadecimal halves, e.g. `04f9:20af`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected vid:pid, got '{s}'"))?;
        let parse = |v: &str| {
            u16::from_str_radix(v.trim().trim_start_matches("0x"), 16)
                .map_err(|e| format!("invalid hex id '{v}': {e}"))
        };
        Ok(Self::new(parse(vid)?, parse(pid)?))
    }
}

/// An enumerated USB device. Immutable once enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsbDevice {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
}

impl UsbDevice {
    pub fn identifier(&self) -> UsbIdentifier {
        UsbIdentifier::new(self.vendor_id, self.product_id)
    }
}

/// Notifications from the operating system about USB devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Attached(UsbDevice),
    Detached(DeviceId),
    PermissionResult { device: DeviceId, granted: bool },
}

/// Source of [`DeviceEvent`]s the core subscribes to.
pub trait DeviceEventSource {
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub kind: EndpointKind,
    pub direction: EndpointDirection,
}

/// Default alternate setting of one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// The interface and endpoint pair a printer connection is opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkEndpoints {
    pub interface: u8,
    pub endpoint_in: u8,
    pub endpoint_out: u8,
}

impl BulkEndpoints {
    /// Validates the printer's descriptor layout: exactly one interface with
    /// exactly two endpoints, one bulk IN and one bulk OUT.
    pub fn from_interfaces(interfaces: &[InterfaceDescriptor]) -> Result<Self, CommunicationError> {
        let [interface] = interfaces else {
            return Err(CommunicationError::UsbSetup(format!(
                "expected exactly 1 interface, got {}",
                interfaces.len()
            )));
        };

        if interface.endpoints.len() != 2 {
            return Err(CommunicationError::UsbSetup(format!(
                "expected exactly 2 endpoints, got {}",
                interface.endpoints.len()
            )));
        }

        let mut endpoint_in = None;
        let mut endpoint_out = None;
        for ep in interface.endpoints.iter().filter(|ep| ep.kind == EndpointKind::Bulk) {
            match ep.direction {
                EndpointDirection::In => endpoint_in = Some(ep.address),
                EndpointDirection::Out => endpoint_out = Some(ep.address),
            }
        }

        match (endpoint_in, endpoint_out) {
            (Some(endpoint_in), Some(endpoint_out)) => Ok(Self {
                interface: interface.number,
                endpoint_in,
                endpoint_out,
            }),
            (None, _) => Err(CommunicationError::UsbSetup(
                "no bulk IN endpoint on printer interface".into(),
            )),
            (_, None) => Err(CommunicationError::UsbSetup(
                "no bulk OUT endpoint on printer interface".into(),
            )),
        }
    }
}

/// Low-level transfer failures. The engine maps all of them to
/// [`CommunicationError::Transfer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transfer timed out after {0} ms")]
    Timeout(u64),

    #[error("bulk OUT failed: {0}")]
    Write(String),

    #[error("bulk IN failed: {0}")]
    Read(String),

    #[error("short transfer: moved {actual} of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("transport is closed")]
    Closed,
}

/// Bulk endpoints of a claimed interface.
pub trait BulkTransport: Send {
    /// Transfer one chunk on the OUT endpoint, returning the bytes moved.
    fn write_chunk(
        &mut self,
        chunk: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Issue one IN transfer of `len` bytes, returning whatever arrived.
    fn read(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Release the interface. Must be safe to call more than once.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Platform USB access.
pub trait UsbHost: DeviceEventSource + Send + Sync + 'static {
    type Transport: BulkTransport + 'static;

    /// Every attached device, unfiltered.
    fn devices(&self) -> Result<Vec<UsbDevice>, CommunicationError>;

    fn has_permission(&self, device: &UsbDevice) -> bool;

    /// Ask the OS for access. The answer arrives as
    /// [`DeviceEvent::PermissionResult`].
    fn request_permission(&self, device: &UsbDevice);

    /// Default alternate setting of every interface in the active configuration.
    fn interfaces(&self, device: &UsbDevice) -> Result<Vec<InterfaceDescriptor>, CommunicationError>;

    /// Claim the interface exclusively and bind the endpoint pair.
    fn claim(
        &self,
        device: &UsbDevice,
        endpoints: BulkEndpoints,
    ) -> Result<Self::Transport, CommunicationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(address: u8, direction: EndpointDirection) -> EndpointDescriptor {
        EndpointDescriptor {
            address,
            kind: EndpointKind::Bulk,
            direction,
        }
    }

    #[test]
    fn parse_usb_identifier() {
        let id: UsbIdentifier = "04f9:20AF".parse().unwrap();
        assert_eq!(id, UsbIdentifier::new(0x04f9, 0x20af));
        assert_eq!(id.to_string(), "04f9:20af");

        let prefixed: UsbIdentifier = " 0x04f9 : 0x2061 ".parse().unwrap();
        assert_eq!(prefixed, UsbIdentifier::new(0x04f9, 0x2061));

        assert!("04f9".parse::<UsbIdentifier>().is_err());
        assert!("zz:0001".parse::<UsbIdentifier>().is_err());
    }

    #[test]
    fn endpoints_from_valid_interface() {
        let interfaces = vec![InterfaceDescriptor {
            number: 0,
            endpoints: vec![bulk(0x81, EndpointDirection::In), bulk(0x02, EndpointDirection::Out)],
        }];
        let eps = BulkEndpoints::from_interfaces(&interfaces).unwrap();
        assert_eq!(eps.interface, 0);
        assert_eq!(eps.endpoint_in, 0x81);
        assert_eq!(eps.endpoint_out, 0x02);
    }

    #[test]
    fn endpoints_reject_wrong_interface_count() {
        assert!(matches!(
            BulkEndpoints::from_interfaces(&[]),
            Err(CommunicationError::UsbSetup(_))
        ));

        let iface = InterfaceDescriptor {
            number: 0,
            endpoints: vec![bulk(0x81, EndpointDirection::In), bulk(0x02, EndpointDirection::Out)],
        };
        let two = vec![iface.clone(), InterfaceDescriptor { number: 1, ..iface }];
        assert!(matches!(
            BulkEndpoints::from_interfaces(&two),
            Err(CommunicationError::UsbSetup(_))
        ));
    }

    #[test]
    fn endpoints_reject_wrong_endpoint_layout() {
        let three = vec![InterfaceDescriptor {
            number: 0,
            endpoints: vec![
                bulk(0x81, EndpointDirection::In),
                bulk(0x02, EndpointDirection::Out),
                bulk(0x83, EndpointDirection::In),
            ],
        }];
        assert!(BulkEndpoints::from_interfaces(&three).is_err());

        let both_in = vec![InterfaceDescriptor {
            number: 0,
            endpoints: vec![bulk(0x81, EndpointDirection::In), bulk(0x82, EndpointDirection::In)],
        }];
        assert!(BulkEndpoints::from_interfaces(&both_in).is_err());

        let interrupt = vec![InterfaceDescriptor {
            number: 0,
            endpoints: vec![
                EndpointDescriptor {
                    address: 0x81,
                    kind: EndpointKind::Interrupt,
                    direction: EndpointDirection::In,
                },
                bulk(0x02, EndpointDirection::Out),
            ],
        }];
        assert!(BulkEndpoints::from_interfaces(&interrupt).is_err());
    }
}
