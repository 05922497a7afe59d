//! Inbound board events and outbound action results.
//!
//! The board collaborator posts [`BoardEvent`]s into the session inbox;
//! the event pump routes replies to their slots and turns lifecycle
//! events into termination.  Handlers answer with an [`ActionOutput`],
//! which serialises to the JSON shape front ends expect.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::pins::Port;
use crate::rpc::codec::Frame;

/// Events posted by the board collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// Analog report for a channel.
    AnalogRead { pin: u8, value: u16 },
    /// Digital report for a pin.
    DigitalRead { pin: u8, value: u8 },
    /// Protocol version report.
    Version { major: u8, minor: u8 },
    /// Firmware name and version report.
    Firmware(FirmwareInfo),
    /// Complete vendor sysex frame, start and end bytes included.
    Vendor(Frame),
    /// The link went away.
    Disconnect,
    /// Link error; `None` is informational and ignored.
    Error(Option<String>),
    /// Link closed; `None` is an orderly close and ignored.
    Close(Option<String>),
}

/// Firmware identity from the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareInfo {
    pub name: String,
    pub major: u8,
    pub minor: u8,
}

impl FirmwareInfo {
    pub fn new(name: impl Into<String>, major: u8, minor: u8) -> Self {
        Self {
            name: name.into(),
            major,
            minor,
        }
    }

    /// `(major, minor, patch)` parsed from a `koov-X.Y.Z` name.  Zeros when
    /// the name does not follow that pattern.
    pub fn release(&self) -> (u32, u32, u32) {
        parse_release(&self.name).unwrap_or((0, 0, 0))
    }
}

fn parse_release(name: &str) -> Option<(u32, u32, u32)> {
    name.match_indices("koov-")
        .find_map(|(at, tag)| parse_triple(&name[at + tag.len()..]))
}

/// `X.Y.Z` at the start of `s`; anything may follow the patch digits.
fn parse_triple(s: &str) -> Option<(u32, u32, u32)> {
    let (major, rest) = leading_number(s)?;
    let (minor, rest) = leading_number(rest.strip_prefix('.')?)?;
    let (patch, _) = leading_number(rest.strip_prefix('.')?)?;
    Some((major, minor, patch))
}

fn leading_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

/// Successful action result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionOutput {
    /// No payload.
    Done,
    /// Sensor reading.
    Value { value: f64 },
    /// Raw BLE module answer.
    Ble { payload: Vec<u8> },
    /// PIN entry answer.
    PinEntry { status: u8, payload: Vec<u8> },
    Version { major: u8, minor: u8 },
    Firmware {
        name: String,
        major: u32,
        minor: u32,
        patch: u32,
    },
    /// Last written logical degrees plus synchronized-motion state.
    ServoDegrees {
        degrees: BTreeMap<Port, f64>,
        synchronized: bool,
        selected_device: Option<String>,
    },
}
