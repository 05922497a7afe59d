//! Transport abstraction: the device link the session drives.
//!
//! Concrete implementations live outside this crate:
//! - USB serial
//! - BLE serial adapter
//!
//! The session is generic over `Transport`, so adding a new link requires
//! zero changes to the dispatcher or the handlers.  Replies and lifecycle
//! notifications flow back through the [`EventInbox`] handed over in
//! [`Transport::open`].

use serde::{Deserialize, Serialize};

use super::channels::EventInbox;

/// Device picked by the caller (enumeration happens elsewhere).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Name the transport uses to find the device.
    pub name: String,
    /// Link type label, e.g. `"usb"` or `"ble"`.
    #[serde(default)]
    pub link: String,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: link.into(),
        }
    }
}

/// Byte-oriented device link.
pub trait Transport {
    /// Open the link.  Every reply and lifecycle event is posted to
    /// `events` until the link is closed.
    fn open(&mut self, device: &DeviceDescriptor, events: EventInbox) -> anyhow::Result<()>;

    /// Write one complete frame.
    fn write(&mut self, frame: &[u8]) -> anyhow::Result<()>;

    /// Tear down the underlying connection after a fault.
    fn terminate(&mut self) -> anyhow::Result<()>;

    /// Release the link.  Must be safe to call when already closed.
    fn close(&mut self) -> anyhow::Result<()>;
}
