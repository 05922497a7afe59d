//! Port names → board pin assignments for the KOOV controller.
//!
//! Single source of truth: every handler resolves ports through
//! [`Port::assignment`] rather than hard-coding pin numbers.
//!
//! ```text
//!   digital pin D(n) = n + 8       analog channel = K2..K7 → 0..5
//!
//!   V0 ─ pwm D4  / dir D5          V1 ─ pwm D12 / dir D10
//!   V2 D2  V3 D3  V4 D6  V5 D7  V6 D8  V7 D9  V8 D11  V9 D13
//!   K0, K1 ─ accelerometer sockets (no pin)
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Board digital pin for connector index `n`.
pub const fn d(n: u8) -> u8 {
    n + 8
}

// ---------------------------------------------------------------------------
// Multi-LED pins
// ---------------------------------------------------------------------------

pub const LED_R_PIN: u8 = d(13);
pub const LED_G_PIN: u8 = d(12);
pub const LED_B_PIN: u8 = d(10);
/// Shared active-low enable for the three colour channels.
pub const LED_FET_PIN: u8 = d(18);

// ---------------------------------------------------------------------------
// Port names
// ---------------------------------------------------------------------------

/// Every named port the front end can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Port {
    LedLive,
    LedStandalone,
    LedR,
    LedG,
    LedB,
    LedFet,
    LedUsb,
    LedBt,
    LedRx,
    LedTx,
    A0,
    A1,
    A2,
    A3,
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V8,
    V9,
    K0,
    K1,
    K2,
    K3,
    K4,
    K5,
    K6,
    K7,
}

/// What a port name resolves to on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinAssignment {
    /// One digital pin or analog channel.
    Single(u8),
    /// DC motor connector: PWM pin plus direction pin.
    Pair { pwm: u8, dir: u8 },
    /// Socket without a directly addressable pin.
    Unassigned,
}

impl Port {
    pub const ALL: [Port; 32] = [
        Port::LedLive,
        Port::LedStandalone,
        Port::LedR,
        Port::LedG,
        Port::LedB,
        Port::LedFet,
        Port::LedUsb,
        Port::LedBt,
        Port::LedRx,
        Port::LedTx,
        Port::A0,
        Port::A1,
        Port::A2,
        Port::A3,
        Port::V0,
        Port::V1,
        Port::V2,
        Port::V3,
        Port::V4,
        Port::V5,
        Port::V6,
        Port::V7,
        Port::V8,
        Port::V9,
        Port::K0,
        Port::K1,
        Port::K2,
        Port::K3,
        Port::K4,
        Port::K5,
        Port::K6,
        Port::K7,
    ];

    /// DC motor connectors.
    pub const MOTOR_PORTS: [Port; 2] = [Port::V0, Port::V1];

    /// General-purpose digital connectors.
    pub const V_PORTS: [Port; 8] = [
        Port::V2,
        Port::V3,
        Port::V4,
        Port::V5,
        Port::V6,
        Port::V7,
        Port::V8,
        Port::V9,
    ];

    /// Analog sensor connectors.
    pub const K_PORTS: [Port; 6] = [Port::K2, Port::K3, Port::K4, Port::K5, Port::K6, Port::K7];

    pub const fn name(self) -> &'static str {
        match self {
            Self::LedLive => "LED_LIVE",
            Self::LedStandalone => "LED_STANDALONE",
            Self::LedR => "LED_R",
            Self::LedG => "LED_G",
            Self::LedB => "LED_B",
            Self::LedFet => "LED_FET",
            Self::LedUsb => "LED_USB",
            Self::LedBt => "LED_BT",
            Self::LedRx => "LED_RX",
            Self::LedTx => "LED_TX",
            Self::A0 => "A0",
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::A3 => "A3",
            Self::V0 => "V0",
            Self::V1 => "V1",
            Self::V2 => "V2",
            Self::V3 => "V3",
            Self::V4 => "V4",
            Self::V5 => "V5",
            Self::V6 => "V6",
            Self::V7 => "V7",
            Self::V8 => "V8",
            Self::V9 => "V9",
            Self::K0 => "K0",
            Self::K1 => "K1",
            Self::K2 => "K2",
            Self::K3 => "K3",
            Self::K4 => "K4",
            Self::K5 => "K5",
            Self::K6 => "K6",
            Self::K7 => "K7",
        }
    }

    pub const fn assignment(self) -> PinAssignment {
        use PinAssignment::{Pair, Single, Unassigned};
        match self {
            Self::LedLive => Single(d(0)),
            Self::LedStandalone => Single(d(1)),
            Self::LedR => Single(LED_R_PIN),
            Self::LedG => Single(LED_G_PIN),
            Self::LedB => Single(LED_B_PIN),
            Self::LedFet => Single(LED_FET_PIN),
            Self::LedUsb => Single(d(20)),
            Self::LedBt => Single(d(21)),
            Self::LedRx => Single(d(30)),
            Self::LedTx => Single(d(31)),
            // Core buttons share channels with K2..K5.
            Self::A0 | Self::K2 => Single(0),
            Self::A1 | Self::K3 => Single(1),
            Self::A2 | Self::K4 => Single(2),
            Self::A3 | Self::K5 => Single(3),
            Self::K6 => Single(4),
            Self::K7 => Single(5),
            Self::V0 => Pair { pwm: d(4), dir: d(5) },
            Self::V1 => Pair { pwm: d(12), dir: d(10) },
            Self::V2 => Single(d(2)),
            Self::V3 => Single(d(3)),
            Self::V4 => Single(d(6)),
            Self::V5 => Single(d(7)),
            Self::V6 => Single(d(8)),
            Self::V7 => Single(d(9)),
            Self::V8 => Single(d(11)),
            Self::V9 => Single(d(13)),
            Self::K0 | Self::K1 => Unassigned,
        }
    }

    /// The single pin of this port, if it has exactly one.
    pub const fn pin(self) -> Option<u8> {
        match self.assignment() {
            PinAssignment::Single(pin) => Some(pin),
            _ => None,
        }
    }

    /// `(pwm, dir)` for motor connectors.
    pub const fn motor_pins(self) -> Option<(u8, u8)> {
        match self.assignment() {
            PinAssignment::Pair { pwm, dir } => Some((pwm, dir)),
            _ => None,
        }
    }

    pub const fn is_accelerometer_socket(self) -> bool {
        matches!(self, Self::K0 | Self::K1)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognised port name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPortName(pub String);

impl fmt::Display for UnknownPortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown port name {:?}", self.0)
    }
}

impl std::error::Error for UnknownPortName {}

impl FromStr for Port {
    type Err = UnknownPortName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| UnknownPortName(s.to_owned()))
    }
}

// Ports travel as their board names, both as values and as map keys.
impl Serialize for Port {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Port {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
