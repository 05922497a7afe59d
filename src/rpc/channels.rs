//! Reply correlation and the board event inbox.
//!
//! Uses `embassy-sync` primitives over `NoopRawMutex`: everything lives on
//! the session thread, so no locking is needed.
//!
//! ```text
//! ┌──────────────┐ BoardEvent ┌────────────┐ deliver(key) ┌──────────────┐
//! │ Board driver │───────────▶│ EventInbox │─────────────▶│  ReplySlots  │
//! │ (collaborator)│  try_send  │  (Channel) │  event pump  │ key → Signal │
//! └──────────────┘            └────────────┘              └──────┬───────┘
//!                                                                │ wake
//!                                                        ┌───────▼──────┐
//!                                                        │ PendingReply │
//!                                                        │  (handler)   │
//!                                                        └──────────────┘
//! ```
//!
//! A key holds at most one outstanding registration.  Registering a
//! second one before the first fires is an error, never an overwrite.

use core::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::{debug, warn};

use super::codec::{self, FrameDecoder};
use crate::app::events::{BoardEvent, FirmwareInfo};
use crate::error::{ActionError, ActionResult, ErrorKind};

/// Event inbox depth.
pub const INBOX_DEPTH: usize = 64;

/// Channel the board collaborator pushes events into.
pub type EventInbox = Rc<Channel<NoopRawMutex, BoardEvent, INBOX_DEPTH>>;

pub fn event_inbox() -> EventInbox {
    Rc::new(Channel::new())
}

// ── Keys and payloads ─────────────────────────────────────────

/// Correlation key: operation type, plus the pin for per-pin reporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKey {
    AnalogRead(u8),
    DigitalRead(u8),
    Accelerometer,
    BleReset,
    BleCommand,
    FlashErase,
    FlashWrite,
    FlashFinish,
    PinEntry,
    Version,
    Firmware,
}

/// Payload delivered to a pending reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Analog(u16),
    Digital(u8),
    Version { major: u8, minor: u8 },
    Firmware(FirmwareInfo),
    Accelerometer { axis: u8, value: i16 },
    Ble(Vec<u8>),
    Flash { status: u8 },
    PinEntry { status: u8, payload: Vec<u8> },
}

type Slot = Rc<Signal<NoopRawMutex, Reply>>;

// ── Slots ─────────────────────────────────────────────────────

/// Per-session table of outstanding reply registrations.
#[derive(Clone, Default)]
pub struct ReplySlots {
    slots: Rc<RefCell<HashMap<ReplyKey, Slot>>>,
}

impl ReplySlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key`.  Fails if a registration is outstanding.
    pub fn register(&self, key: ReplyKey) -> ActionResult<PendingReply> {
        let mut slots = self.slots.borrow_mut();
        if slots.contains_key(&key) {
            return Err(ActionError::new(
                ErrorKind::Exception,
                format!("reply slot {key:?} already registered"),
            ));
        }
        let signal: Slot = Rc::new(Signal::new());
        slots.insert(key, signal.clone());
        Ok(PendingReply {
            slots: self.clone(),
            key,
            signal,
        })
    }

    /// Hand `reply` to whoever registered `key`.  Returns `false` if nobody
    /// is waiting; the reply is dropped.
    pub fn deliver(&self, key: ReplyKey, reply: Reply) -> bool {
        let slot = self.slots.borrow_mut().remove(&key);
        match slot {
            Some(signal) => {
                signal.signal(reply);
                true
            }
            None => {
                debug!("reply {:?} has no pending slot, dropped", key);
                false
            }
        }
    }

    pub fn is_registered(&self, key: ReplyKey) -> bool {
        self.slots.borrow().contains_key(&key)
    }

    /// Forget every registration (session teardown).
    pub fn clear(&self) {
        self.slots.borrow_mut().clear();
    }
}

/// A claimed reply slot.  Dropping it releases the key.
pub struct PendingReply {
    slots: ReplySlots,
    key: ReplyKey,
    signal: Slot,
}

impl PendingReply {
    pub fn key(&self) -> ReplyKey {
        self.key
    }

    /// Wait for the matching reply.
    pub async fn recv(&self) -> Reply {
        self.signal.wait().await
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        // Only release the slot if it is still ours.
        let Ok(mut slots) = self.slots.slots.try_borrow_mut() else {
            return;
        };
        if slots
            .get(&self.key)
            .is_some_and(|s| Rc::ptr_eq(s, &self.signal))
        {
            slots.remove(&self.key);
        }
    }
}

// ── Event routing ─────────────────────────────────────────────

/// Route a reply-carrying event to its slot.  Returns the event back if it
/// is a lifecycle event the caller must handle itself.
pub fn route_event(replies: &ReplySlots, event: BoardEvent) -> Option<BoardEvent> {
    match event {
        BoardEvent::AnalogRead { pin, value } => {
            replies.deliver(ReplyKey::AnalogRead(pin), Reply::Analog(value));
        }
        BoardEvent::DigitalRead { pin, value } => {
            replies.deliver(ReplyKey::DigitalRead(pin), Reply::Digital(value));
        }
        BoardEvent::Version { major, minor } => {
            replies.deliver(ReplyKey::Version, Reply::Version { major, minor });
        }
        BoardEvent::Firmware(info) => {
            replies.deliver(ReplyKey::Firmware, Reply::Firmware(info));
        }
        BoardEvent::Vendor(frame) => match codec::decode_reply(&frame) {
            Ok((key, reply)) => {
                replies.deliver(key, reply);
            }
            Err(e) => warn!("vendor frame ignored: {}", e),
        },
        lifecycle => return Some(lifecycle),
    }
    None
}

/// Splits a raw sysex byte stream into vendor frames and posts them to the
/// inbox.  Board collaborators that see raw bytes use this instead of
/// parsing vendor replies themselves.
pub struct VendorReader {
    decoder: FrameDecoder,
    inbox: EventInbox,
}

impl VendorReader {
    pub fn new(inbox: EventInbox) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            inbox,
        }
    }

    /// Feed raw bytes; returns the number of vendor frames posted.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        let inbox = &self.inbox;
        let mut posted = 0;
        self.decoder.feed(data, |frame| {
            if frame.get(1) != Some(&codec::VENDOR) {
                return;
            }
            let mut buf = codec::Frame::new();
            // Decoder frames never exceed the frame capacity.
            let _ = buf.extend_from_slice(frame);
            if inbox.try_send(BoardEvent::Vendor(buf)).is_ok() {
                posted += 1;
            } else {
                warn!("event inbox full, vendor frame dropped");
            }
        });
        posted
    }

    pub fn reset(&mut self) {
        self.decoder.reset();
    }
}
