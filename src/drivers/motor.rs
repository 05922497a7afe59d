//! DC motor driver (V0/V1 connectors: PWM pin + direction pin).
//!
//! Requested power is corrected against measured power→RPM tables so the
//! same power gives roughly the same speed in both directions:
//!
//! ```text
//!   power ≥ 10:  power ──lerp──▶ rpm (20..60) ──table⁻¹──▶ corrected power
//!   power < 10:  corrected(10) · power / 10        (linear toward stall)
//! ```
//!
//! The corrected power is scaled by the port calibration and written as
//! an 8-bit duty.  REVERSE drives the direction pin high, so its duty is
//! inverted.

use embedded_hal::digital::PinState;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::app::ports::{PinIo, PinMode};
use crate::pins::Port;

/// Below this power the correction is a straight line toward zero.
pub const POWER_SWITCH: f64 = 10.0;
pub const RPM_MIN: f64 = 20.0;
pub const RPM_MAX: f64 = 60.0;
/// Power a motor port starts with after initialisation.
pub const INITIAL_POWER: f64 = 30.0;
pub const PWM_MAX: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq)]
struct RpmPoint {
    power: f64,
    rpm: f64,
}

const fn p(power: f64, rpm: f64) -> RpmPoint {
    RpmPoint { power, rpm }
}

const NORMAL_TABLE: [RpmPoint; 11] = [
    p(0.0, 0.0),
    p(10.0, 0.0),
    p(20.0, 10.44),
    p(30.0, 25.51),
    p(40.0, 35.60),
    p(50.0, 45.32),
    p(60.0, 49.12),
    p(70.0, 53.19),
    p(80.0, 56.02),
    p(90.0, 58.43),
    p(100.0, 60.05),
];

const REVERSE_TABLE: [RpmPoint; 11] = [
    p(0.0, 0.0),
    p(10.0, 0.0),
    p(20.0, 6.34),
    p(30.0, 17.78),
    p(40.0, 22.87),
    p(50.0, 23.89),
    p(60.0, 29.54),
    p(70.0, 35.46),
    p(80.0, 43.94),
    p(90.0, 52.59),
    p(100.0, 60.32),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Normal,
    Reverse,
}

/// Drive mode of a motor port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MotorMode {
    Normal,
    Reverse,
    Coast,
    Brake,
}

/// Linear map of `x` from `[min_x, max_x]` onto `[min_y, max_y]`, with `x`
/// clamped to its range.
pub fn interpolate(x: f64, min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> f64 {
    if max_x <= min_x {
        return min_y;
    }
    (max_y - min_y) * (x.clamp(min_x, max_x) - min_x) / (max_x - min_x) + min_y
}

/// Corrected power (0–100) for a requested power (0–100).
pub fn correct(power: f64, direction: Direction) -> f64 {
    let table: &[RpmPoint] = match direction {
        Direction::Normal => &NORMAL_TABLE,
        Direction::Reverse => &REVERSE_TABLE,
    };

    if power < POWER_SWITCH {
        return correct(POWER_SWITCH, direction) * power / POWER_SWITCH;
    }

    let rpm = interpolate(power, POWER_SWITCH, 100.0, RPM_MIN, RPM_MAX);
    table.windows(2).fold(0.0, |acc, w| {
        let (prev, cur) = (w[0], w[1]);
        if prev.rpm <= rpm && rpm <= cur.rpm {
            interpolate(rpm, prev.rpm, cur.rpm, prev.power, cur.power)
        } else {
            acc
        }
    })
}

/// Pin levels for one motor command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorDrive {
    pub dir: PinState,
    pub duty: u8,
}

/// Direction level and duty for `mode` at effective `power` (already
/// scaled by calibration).
pub fn drive(mode: MotorMode, power: f64, correction: bool) -> MotorDrive {
    let duty = |direction| {
        if power <= 0.0 {
            return 0;
        }
        let corrected = if correction {
            correct(power, direction)
        } else {
            power
        };
        (corrected * f64::from(PWM_MAX) / 100.0).floor().clamp(0.0, 255.0) as u8
    };
    match mode {
        MotorMode::Normal => MotorDrive {
            dir: PinState::Low,
            duty: duty(Direction::Normal),
        },
        MotorMode::Reverse => MotorDrive {
            dir: PinState::High,
            duty: PWM_MAX - duty(Direction::Reverse),
        },
        MotorMode::Coast => MotorDrive {
            dir: PinState::Low,
            duty: 0,
        },
        MotorMode::Brake => MotorDrive {
            dir: PinState::High,
            duty: PWM_MAX,
        },
    }
}

/// Per-port motor state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DcMotorState {
    pub port: Port,
    /// Requested power, 0–100.
    pub power: f64,
    pub mode: MotorMode,
    /// Calibration factor, 0–1.
    pub scale: f64,
}

impl DcMotorState {
    const fn new(port: Port) -> Self {
        Self {
            port,
            power: INITIAL_POWER,
            mode: MotorMode::Coast,
            scale: 1.0,
        }
    }
}

/// State and control for both motor connectors.
pub struct DcMotors {
    motors: [DcMotorState; 2],
    correction: bool,
}

impl DcMotors {
    pub fn new(correction: bool) -> Self {
        Self {
            motors: Port::MOTOR_PORTS.map(DcMotorState::new),
            correction,
        }
    }

    pub fn state(&self, port: Port) -> Option<&DcMotorState> {
        self.motors.iter().find(|m| m.port == port)
    }

    pub fn correction(&self) -> bool {
        self.correction
    }

    /// Configure the connector pins, apply `scale` and coast at the
    /// initial power.
    pub fn init(&mut self, io: &mut impl PinIo, port: Port, scale: Option<f64>) -> anyhow::Result<()> {
        let Some((pwm, dir)) = port.motor_pins() else {
            return Ok(());
        };
        io.pin_mode(dir, PinMode::Output)?;
        io.pin_mode(pwm, PinMode::Pwm)?;
        if let Some(m) = self.motors.iter_mut().find(|m| m.port == port) {
            m.scale = scale.unwrap_or(1.0).clamp(0.0, 1.0);
        }
        self.control(io, port, Some(INITIAL_POWER), Some(MotorMode::Coast))
    }

    /// Set the requested power (clamped to 0–100) and re-drive the port.
    pub fn set_power(&mut self, io: &mut impl PinIo, port: Port, power: f64) -> anyhow::Result<()> {
        self.control(io, port, Some(power.clamp(0.0, 100.0)), None)
    }

    pub fn set_mode(&mut self, io: &mut impl PinIo, port: Port, mode: MotorMode) -> anyhow::Result<()> {
        self.control(io, port, None, Some(mode))
    }

    /// Update power and/or mode and write the pins.  Ports without a motor
    /// are ignored.
    pub fn control(
        &mut self,
        io: &mut impl PinIo,
        port: Port,
        power: Option<f64>,
        mode: Option<MotorMode>,
    ) -> anyhow::Result<()> {
        let (Some((pwm, dir)), Some(m)) = (
            port.motor_pins(),
            self.motors.iter_mut().find(|m| m.port == port),
        ) else {
            return Ok(());
        };
        if let Some(power) = power {
            m.power = power;
        }
        if let Some(mode) = mode {
            m.mode = mode;
        }

        let out = drive(m.mode, m.power * m.scale, self.correction);
        debug!(
            "dcmotor {}: {:?} power {} -> dir {:?} duty {}",
            port, m.mode, m.power, out.dir, out.duty
        );
        io.digital_write(dir, out.dir)?;
        io.analog_write(pwm, out.duty)
    }
}
