//! Port traits: the boundary between the command layer and the board.
//!
//! ```text
//!   ActionService ──▶ PinIo  (generic pin protocol, collaborator)
//!                 └─▶ Transport (raw vendor frames, collaborator)
//! ```
//!
//! The generic microcontroller pin protocol is not implemented here.  A
//! board collaborator implements [`PinIo`] on top of whatever library
//! speaks it, and reports replies back through the event inbox it got
//! in [`Transport::open`](crate::rpc::transport::Transport::open).
//!
//! Every method returns `anyhow::Result`: collaborator failures are
//! opaque here and get folded into an `ErrorKind` by the caller, which
//! knows what the write was for.

use embedded_hal::digital::PinState;

use crate::rpc::transport::Transport;

// ───────────────────────────────────────────────────────────────
// Pin modes
// ───────────────────────────────────────────────────────────────

/// Pin modes understood by the board firmware.  Discriminants are the
/// protocol values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PinMode {
    Input = 0,
    Output = 1,
    Analog = 2,
    Pwm = 3,
    Servo = 4,
    InputPullup = 11,
}

// ───────────────────────────────────────────────────────────────
// Pin I/O port (driven adapter: command layer → board)
// ───────────────────────────────────────────────────────────────

/// Generic pin protocol operations.
///
/// Replies to `report_*`, `query_version` and `query_firmware` arrive
/// asynchronously as [`BoardEvent`](super::events::BoardEvent)s.
pub trait PinIo {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> anyhow::Result<()>;

    fn digital_write(&mut self, pin: u8, state: PinState) -> anyhow::Result<()>;

    /// PWM duty, 0–255.
    fn analog_write(&mut self, pin: u8, value: u8) -> anyhow::Result<()>;

    /// Configure a servo pin with its pulse range in microseconds.
    fn servo_config(&mut self, pin: u8, min_pulse_us: u16, max_pulse_us: u16)
    -> anyhow::Result<()>;

    /// Servo angle, 0–180.
    fn servo_write(&mut self, pin: u8, degree: u8) -> anyhow::Result<()>;

    /// Enable or disable periodic reports for an analog channel.
    fn report_analog(&mut self, channel: u8, enable: bool) -> anyhow::Result<()>;

    /// Enable or disable change reports for a digital pin.
    fn report_digital(&mut self, pin: u8, enable: bool) -> anyhow::Result<()>;

    /// Protocol-level system reset.
    fn reset(&mut self) -> anyhow::Result<()>;

    /// Ask for a version report.
    fn query_version(&mut self) -> anyhow::Result<()>;

    /// Ask for the firmware name and version.
    fn query_firmware(&mut self) -> anyhow::Result<()>;
}

/// Everything a session needs from its board collaborator.
pub trait Board: Transport + PinIo {}

impl<T: Transport + PinIo> Board for T {}
