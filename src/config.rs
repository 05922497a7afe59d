//! Session configuration parameters
//!
//! Every tunable passed to `DeviceSession::open`.  Loadable from JSON so a
//! front end can hand its option object through unchanged; missing fields
//! take the defaults below.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// PIN code sent when the caller wants to learn whether a PIN is required.
pub const PIN_PROBE: u16 = 0x3ffd;
/// PIN code meaning "no PIN entry".
pub const PIN_NULL: u16 = 0x3ffe;

/// Upper bound for every timeout and interval (one day).
pub const MAX_DURATION_MS: u64 = 86_400_000;

/// How the BLE module PIN is handled during `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinEntry {
    /// Skip PIN entry entirely.
    #[default]
    Null,
    /// Ask the module whether a PIN is configured.
    Probe,
    /// Verify the given 4-digit code (14-bit on the wire).
    Code(u16),
}

impl PinEntry {
    /// Code value as sent on the wire.
    pub fn code(self) -> u16 {
        match self {
            Self::Null => PIN_NULL,
            Self::Probe => PIN_PROBE,
            Self::Code(c) => c & 0x3fff,
        }
    }
}

/// Per-session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    // --- Open ---
    /// Firmware handshake timeout (milliseconds)
    pub handshake_timeout_ms: u64,
    /// Firmware major version the session insists on
    pub required_major_version: u8,
    /// BLE PIN handling during open
    pub pin_entry: PinEntry,

    // --- Running session ---
    /// Keep-alive version query interval (milliseconds)
    pub keep_alive_interval_ms: u64,
    /// Per-action timeout (milliseconds), restarted on extension
    pub action_timeout_ms: u64,
    /// Apply the RPM correction tables to DC motor power
    pub dcmotor_correction: bool,

    // --- BLE recovery ---
    /// Total `bts01-reset` attempts before giving up
    pub ble_reset_attempts: u8,
    /// Delay between close and reopen (milliseconds)
    pub ble_retry_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            required_major_version: 3,
            pin_entry: PinEntry::Null,

            keep_alive_interval_ms: 5_000,
            action_timeout_ms: 60_000,
            dcmotor_correction: true,

            ble_reset_attempts: 3,
            ble_retry_delay_ms: 500,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON option object; unknown keys are ignored.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| anyhow::anyhow!("invalid session config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject timeouts above [`MAX_DURATION_MS`].
    pub fn validate(&self) -> anyhow::Result<()> {
        let fields = [
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("keep_alive_interval_ms", self.keep_alive_interval_ms),
            ("action_timeout_ms", self.action_timeout_ms),
            ("ble_retry_delay_ms", self.ble_retry_delay_ms),
        ];
        for (name, ms) in fields {
            if ms > MAX_DURATION_MS {
                anyhow::bail!("invalid session config: {name} = {ms} exceeds {MAX_DURATION_MS}");
            }
        }
        Ok(())
    }

    // Accessors clamp: fields are public and may bypass `validate`.

    pub fn handshake_timeout(&self) -> Duration {
        millis(self.handshake_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        millis(self.keep_alive_interval_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        millis(self.action_timeout_ms)
    }

    pub fn ble_retry_delay(&self) -> Duration {
        millis(self.ble_retry_delay_ms)
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms.min(MAX_DURATION_MS))
}
