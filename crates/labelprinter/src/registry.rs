//! Allow-list filtering and printer selection.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::usb::{DeviceId, UsbDevice, UsbIdentifier};

const BROTHER_VID: u16 = 0x04f9;

/// 128-dot P-touch models speaking the raster protocol over USB.
pub const DEFAULT_ALLOWED: &[UsbIdentifier] = &[
    UsbIdentifier::new(BROTHER_VID, 0x2061), // PT-P700
    UsbIdentifier::new(BROTHER_VID, 0x2062), // PT-P750W
    UsbIdentifier::new(BROTHER_VID, 0x20af), // PT-P710BT
    UsbIdentifier::new(BROTHER_VID, 0x2060), // PT-E550W
    UsbIdentifier::new(BROTHER_VID, 0x2074), // PT-D600
];

/// Snapshot of what the host can print to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrinterConnectionState {
    pub available: BTreeMap<DeviceId, UsbDevice>,
    pub selected: Option<DeviceId>,
    pub connected: bool,
}

impl PrinterConnectionState {
    pub fn selected_device(&self) -> Option<&UsbDevice> {
        self.selected.as_ref().and_then(|id| self.available.get(id))
    }
}

/// Filters enumerated devices down to supported printers.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    allow_list: HashSet<UsbIdentifier>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED.iter().copied())
    }
}

impl DeviceRegistry {
    pub fn new(allow_list: impl IntoIterator<Item = UsbIdentifier>) -> Self {
        Self {
            allow_list: allow_list.into_iter().collect(),
        }
    }

    pub fn is_allowed(&self, device: &UsbDevice) -> bool {
        self.allow_list.contains(&device.identifier())
    }

    /// Build the next state from a fresh enumeration.
    ///
    /// The previous selection survives while its device is present, otherwise
    /// the lowest id wins. A present `preferred` device overrides both. The
    /// connected flag is carried over only when the selection is unchanged.
    pub fn refresh(
        &self,
        previous: &PrinterConnectionState,
        devices: impl IntoIterator<Item = UsbDevice>,
        preferred: Option<&DeviceId>,
    ) -> PrinterConnectionState {
        let available: BTreeMap<DeviceId, UsbDevice> = devices
            .into_iter()
            .filter(|d| self.is_allowed(d))
            .map(|d| (d.id.clone(), d))
            .collect();

        let selected = preferred
            .filter(|id| available.contains_key(*id))
            .or_else(|| {
                previous
                    .selected
                    .as_ref()
                    .filter(|id| available.contains_key(*id))
            })
            .or_else(|| available.keys().next())
            .cloned();

        let connected = previous.connected && selected.is_some() && selected == previous.selected;

        tracing::debug!(
            available = available.len(),
            selected = ?selected,
            "Printer list refreshed"
        );

        PrinterConnectionState {
            available,
            selected,
            connected,
        }
    }

    /// Select `id` if it is available; otherwise return the state unchanged.
    pub fn select(&self, state: &PrinterConnectionState, id: &DeviceId) -> PrinterConnectionState {
        if !state.available.contains_key(id) {
            tracing::warn!(device = %id, "Ignoring selection of unavailable printer");
            return state.clone();
        }
        if state.selected.as_ref() == Some(id) {
            return state.clone();
        }
        PrinterConnectionState {
            available: state.available.clone(),
            selected: Some(id.clone()),
            connected: false,
        }
    }
}
