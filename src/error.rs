//! Caller-visible error taxonomy.
//!
//! Every action, open and close result funnels into [`ActionError`]: a
//! stable [`ErrorKind`] code (category `0xFB`) plus a human-readable
//! detail string.  Collaborator failures (transport, pin I/O) arrive as
//! opaque `anyhow::Error` values and are folded into a kind at the point
//! where the crate knows what the write was for.
//!
//! ```text
//!   anyhow::Error ──▶ ActionError::transport(kind, what, err)
//!   handler panic ──▶ ActionError::exception(payload)
//! ```

use core::fmt;
use std::any::Any;

/// Error category byte shared by every [`ErrorKind`] code.
pub const ERROR_CATEGORY: u8 = 0xfb;

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

/// Stable error codes.  The discriminant is the wire/API code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// The action was failed by `reset()` or discarded from the queue.
    Terminated = 0x01,
    /// The handler panicked.
    Exception = 0x02,
    /// Malformed request or unrecognised action name.
    UnknownAction = 0x03,
    /// The port has no pin assignment usable by the action.
    UnknownPort = 0x04,
    BleCommandFailure = 0x05,
    HandshakeTimeout = 0x06,
    HandshakeFailure = 0x07,
    WriteError = 0x08,
    /// No transport, or no session open.
    NoDevice = 0x09,
    ActionTimeout = 0x0a,
    FlashEraseFailure = 0x0b,
    FlashWriteFailure = 0x0c,
    FlashFinishFailure = 0x0d,
    PinVerifyFailure = 0x0e,
    /// Firmware major version differs from the required one.
    VersionMismatch = 0x0f,
}

impl ErrorKind {
    /// Numeric code within [`ERROR_CATEGORY`].
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Terminated => "TERMINATED",
            Self::Exception => "EXCEPTION",
            Self::UnknownAction => "UNKNOWN_ACTION",
            Self::UnknownPort => "UNKNOWN_PORT",
            Self::BleCommandFailure => "BLE_COMMAND_FAILURE",
            Self::HandshakeTimeout => "HANDSHAKE_TIMEOUT",
            Self::HandshakeFailure => "HANDSHAKE_FAILURE",
            Self::WriteError => "WRITE_ERROR",
            Self::NoDevice => "NO_DEVICE",
            Self::ActionTimeout => "ACTION_TIMEOUT",
            Self::FlashEraseFailure => "FLASH_ERASE_FAILURE",
            Self::FlashWriteFailure => "FLASH_WRITE_FAILURE",
            Self::FlashFinishFailure => "FLASH_FINISH_FAILURE",
            Self::PinVerifyFailure => "PIN_VERIFY_FAILURE",
            Self::VersionMismatch => "VERSION_MISMATCH",
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: u8) -> Option<Self> {
        let kind = match code {
            0x01 => Self::Terminated,
            0x02 => Self::Exception,
            0x03 => Self::UnknownAction,
            0x04 => Self::UnknownPort,
            0x05 => Self::BleCommandFailure,
            0x06 => Self::HandshakeTimeout,
            0x07 => Self::HandshakeFailure,
            0x08 => Self::WriteError,
            0x09 => Self::NoDevice,
            0x0a => Self::ActionTimeout,
            0x0b => Self::FlashEraseFailure,
            0x0c => Self::FlashWriteFailure,
            0x0d => Self::FlashFinishFailure,
            0x0e => Self::PinVerifyFailure,
            0x0f => Self::VersionMismatch,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x}{:02x})", self.name(), ERROR_CATEGORY, self.code())
    }
}

// ---------------------------------------------------------------------------
// Action error
// ---------------------------------------------------------------------------

/// Tagged failure returned through every completion path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ActionError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Fold a collaborator failure into `kind`, keeping the cause chain
    /// in the detail string.
    pub fn transport(kind: ErrorKind, what: &str, err: &anyhow::Error) -> Self {
        Self::new(kind, format!("{what}: {err:#}"))
    }

    /// Convert a caught panic payload into an `EXCEPTION` error.
    pub fn exception(payload: &(dyn Any + Send)) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_owned());
        Self::new(ErrorKind::Exception, msg)
    }

    pub fn terminated(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Terminated, detail)
    }

    pub fn unknown_port(port: impl fmt::Display, what: &str) -> Self {
        Self::new(ErrorKind::UnknownPort, format!("{what}: {port}: no usable pin"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.detail)
        }
    }
}

impl std::error::Error for ActionError {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias for caller-visible operations.
pub type ActionResult<T> = core::result::Result<T, ActionError>;
