//! The closed set of board actions.
//!
//! Front ends send actions as JSON objects tagged by `"action"`:
//!
//! ```json
//! { "action": "turn-led", "port": "V2", "mode": "ON" }
//! ```
//!
//! Anything that does not decode into an [`Action`] (unknown name,
//! missing field, bad port) is an `UNKNOWN_ACTION` error before anything
//! reaches the dispatcher.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::drivers::motor::MotorMode;
use crate::error::{ActionError, ActionResult, ErrorKind};
use crate::pins::Port;
use crate::rpc::flash::ProgressFn;

// ───────────────────────────────────────────────────────────────
// Argument types
// ───────────────────────────────────────────────────────────────

/// Device types a port can be configured as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    Output,
    Input,
    Led,
    MultiLed,
    DcMotor,
    ServoMotor,
    Buzzer,
    LightSensor,
    TouchSensor,
    SoundSensor,
    IrPhotoReflector,
    #[serde(rename = "3-axis-digital-accelerometer")]
    Accelerometer,
    PushButton,
}

impl DeviceKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Input => "input",
            Self::Led => "led",
            Self::MultiLed => "multi-led",
            Self::DcMotor => "dc-motor",
            Self::ServoMotor => "servo-motor",
            Self::Buzzer => "buzzer",
            Self::LightSensor => "light-sensor",
            Self::TouchSensor => "touch-sensor",
            Self::SoundSensor => "sound-sensor",
            Self::IrPhotoReflector => "ir-photo-reflector",
            Self::Accelerometer => "3-axis-digital-accelerometer",
            Self::PushButton => "push-button",
        }
    }
}

/// Per-port calibration values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Calibration {
    /// Servo offset in degrees.
    pub drift: Option<f64>,
    /// DC motor power factor, 0–1.
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Switch {
    On,
    Off,
}

/// Accelerometer axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Query selector byte.
    pub const fn selector(self) -> u8 {
        match self {
            Self::X => 0x01,
            Self::Y => 0x02,
            Self::Z => 0x03,
        }
    }
}

/// One melody note as sent by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NoteSpec {
    /// Note number (48–108 plays, anything else rests).
    pub frequency: f64,
    pub secs: f64,
    /// Target port for the addressed melody format.
    #[serde(default)]
    pub port: Option<Port>,
}

/// Raw BLE module command: an AT string or bytes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandBytes {
    Text(String),
    Bytes(Vec<u8>),
}

impl Default for CommandBytes {
    fn default() -> Self {
        Self::Bytes(Vec::new())
    }
}

impl CommandBytes {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Bytes(b) => b,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Actions
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    BoardInit,
    PortInit {
        port: Port,
        #[serde(rename = "type")]
        kind: DeviceKind,
    },
    PortSettings {
        #[serde(rename = "port-settings")]
        settings: BTreeMap<Port, DeviceKind>,
        #[serde(default, rename = "reset-only")]
        reset_only: bool,
        /// Port → device type name → calibration.
        #[serde(default)]
        calibration: BTreeMap<Port, BTreeMap<String, Calibration>>,
    },
    TurnLed {
        port: Port,
        mode: Switch,
    },
    MultiLed {
        r: f64,
        g: f64,
        b: f64,
    },
    #[serde(rename = "multi-led.1")]
    MultiLedV1 {
        r: f64,
        g: f64,
        b: f64,
    },
    BuzzerOn {
        port: Port,
        frequency: f64,
    },
    BuzzerOff {
        port: Port,
    },
    Melody {
        port: Port,
        melody: Vec<NoteSpec>,
    },
    #[serde(rename = "melody.1")]
    MelodyV1 {
        port: Port,
        melody: Vec<NoteSpec>,
    },
    /// Without a (non-zero) speed this begins buffering; with one it moves.
    ServomotorSynchronizedMotion {
        #[serde(default)]
        speed: Option<f64>,
    },
    SetServomotorDegree {
        port: Port,
        degree: f64,
    },
    SetServomotorDegrees {
        degrees: BTreeMap<Port, f64>,
        #[serde(default)]
        sync: bool,
    },
    /// Board-side synchronized move.
    MoveServomotors {
        speed: f64,
        degrees: BTreeMap<Port, f64>,
    },
    SetDcmotorPower {
        port: Port,
        power: f64,
    },
    TurnDcmotorOn {
        port: Port,
        direction: MotorMode,
    },
    TurnDcmotorOff {
        port: Port,
        mode: MotorMode,
    },
    ButtonValue {
        port: Port,
    },
    TouchSensorValue {
        port: Port,
    },
    IrPhotoReflectorValue {
        port: Port,
    },
    LightSensorValue {
        port: Port,
    },
    SoundSensorValue {
        port: Port,
    },
    #[serde(rename = "3-axis-digital-accelerometer-value")]
    AccelerometerValue {
        port: Port,
        direction: Axis,
    },
    #[serde(rename = "bts01-reset")]
    Bts01Reset {
        #[serde(default)]
        timeout: Option<u16>,
        #[serde(default)]
        command: CommandBytes,
    },
    #[serde(rename = "bts01-cmd")]
    Bts01Cmd {
        #[serde(default)]
        timeout: Option<u16>,
        command: CommandBytes,
    },
    FlashWrite {
        data: Vec<u8>,
        #[serde(skip)]
        progress: Option<ProgressFn>,
    },
    Btpin {
        command: CommandBytes,
    },
    KoovReset {
        #[serde(default)]
        ticks: Option<u16>,
    },
    FirmataVersion,
    FirmataName,
    ServomotorDegrees,
    ResetServomotorSynchronizedMotion,
    SyncDevice,
}

impl Action {
    /// Decode a JSON action object.
    pub fn from_json(json: &str) -> ActionResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ActionError::new(ErrorKind::UnknownAction, format!("invalid action: {e}")))
    }

    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BoardInit => "board-init",
            Self::PortInit { .. } => "port-init",
            Self::PortSettings { .. } => "port-settings",
            Self::TurnLed { .. } => "turn-led",
            Self::MultiLed { .. } => "multi-led",
            Self::MultiLedV1 { .. } => "multi-led.1",
            Self::BuzzerOn { .. } => "buzzer-on",
            Self::BuzzerOff { .. } => "buzzer-off",
            Self::Melody { .. } => "melody",
            Self::MelodyV1 { .. } => "melody.1",
            Self::ServomotorSynchronizedMotion { .. } => "servomotor-synchronized-motion",
            Self::SetServomotorDegree { .. } => "set-servomotor-degree",
            Self::SetServomotorDegrees { .. } => "set-servomotor-degrees",
            Self::MoveServomotors { .. } => "move-servomotors",
            Self::SetDcmotorPower { .. } => "set-dcmotor-power",
            Self::TurnDcmotorOn { .. } => "turn-dcmotor-on",
            Self::TurnDcmotorOff { .. } => "turn-dcmotor-off",
            Self::ButtonValue { .. } => "button-value",
            Self::TouchSensorValue { .. } => "touch-sensor-value",
            Self::IrPhotoReflectorValue { .. } => "ir-photo-reflector-value",
            Self::LightSensorValue { .. } => "light-sensor-value",
            Self::SoundSensorValue { .. } => "sound-sensor-value",
            Self::AccelerometerValue { .. } => "3-axis-digital-accelerometer-value",
            Self::Bts01Reset { .. } => "bts01-reset",
            Self::Bts01Cmd { .. } => "bts01-cmd",
            Self::FlashWrite { .. } => "flash-write",
            Self::Btpin { .. } => "btpin",
            Self::KoovReset { .. } => "koov-reset",
            Self::FirmataVersion => "firmata-version",
            Self::FirmataName => "firmata-name",
            Self::ServomotorDegrees => "servomotor-degrees",
            Self::ResetServomotorSynchronizedMotion => "reset-servomotor-synchronized-motion",
            Self::SyncDevice => "sync-device",
        }
    }

    /// Flash image with a progress callback.
    pub fn flash_write(data: Vec<u8>, progress: Option<ProgressFn>) -> Self {
        Self::FlashWrite { data, progress }
    }
}
