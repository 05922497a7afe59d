//! Session lifecycle states.
//!
//! ```text
//!   Closed ──▶ Opening ──▶ Handshaking ──▶ Ready ──┬──▶ Terminating ─┐
//!     ▲           │             │                  └──▶ Closing ◀────┘
//!     │           │             └──────────────────────▶   │
//!     └───────────┴────────────────────────────────────────┘
//! ```
//!
//! `Terminating` is only entered from a link fault; an orderly
//! `close()` goes straight to `Closing`.

use core::cell::Cell;
use core::fmt;

use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Closed = 0,
    Opening = 1,
    Handshaking = 2,
    Ready = 3,
    Terminating = 4,
    Closing = 5,
}

impl SessionState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Opening => "OPENING",
            Self::Handshaking => "HANDSHAKING",
            Self::Ready => "READY",
            Self::Terminating => "TERMINATING",
            Self::Closing => "CLOSING",
        }
    }

    /// Whether `self → next` is a legal edge.
    pub const fn can_transition(self, next: Self) -> bool {
        use SessionState::{Closed, Closing, Handshaking, Opening, Ready, Terminating};
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, Handshaking | Closing | Closed)
                | (Handshaking, Ready | Terminating | Closing)
                | (Ready, Terminating | Closing)
                | (Terminating, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Current state plus transition checking.
#[derive(Debug)]
pub struct Lifecycle {
    state: Cell<SessionState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            state: Cell::new(SessionState::Closed),
        }
    }

    pub fn current(&self) -> SessionState {
        self.state.get()
    }

    pub fn is(&self, state: SessionState) -> bool {
        self.state.get() == state
    }

    /// Move to `next`.  Illegal edges are refused and logged.
    pub fn transition(&self, next: SessionState) -> bool {
        let from = self.state.get();
        if !from.can_transition(next) {
            warn!("session: refused transition {} -> {}", from, next);
            return false;
        }
        info!("session: {} -> {}", from, next);
        self.state.set(next);
        true
    }
}
