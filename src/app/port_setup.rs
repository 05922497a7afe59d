//! Port initialisers and whole-board port configuration.
//!
//! `port-settings` order matters on this board:
//!
//! ```text
//!   reset ─▶ multi-LED ─▶ V0/V1 motors ─▶ buzzer V-ports ─▶ other V-ports ─▶ K-ports
//! ```
//!
//! The multi-LED goes first because its pins overlap servo timers.  Buzzer
//! ports go before the remaining V-ports because switching a pin to PWM
//! for the buzzer retunes a clock the servos share, and a later servo
//! initialisation puts it back.

use std::collections::BTreeMap;

use embedded_hal::digital::PinState;
use log::debug;

use super::actions::{Calibration, DeviceKind};
use super::ports::{PinIo, PinMode};
use crate::drivers::HardwareModel;
use crate::drivers::buzzer;
use crate::error::{ActionError, ActionResult};
use crate::pins::Port;
use crate::rpc::transport::Transport;

/// Check that `port` can host `kind` before anything is written.
pub fn validate(port: Port, kind: DeviceKind) -> ActionResult<()> {
    let ok = match kind {
        DeviceKind::DcMotor => port.motor_pins().is_some(),
        DeviceKind::Accelerometer => port.is_accelerometer_socket(),
        DeviceKind::MultiLed => true,
        _ => port.pin().is_some(),
    };
    if ok {
        Ok(())
    } else {
        Err(ActionError::unknown_port(port, kind.name()))
    }
}

fn single_pin(port: Port) -> anyhow::Result<u8> {
    port.pin()
        .ok_or_else(|| anyhow::anyhow!("{port} has no single pin"))
}

pub fn low_output(io: &mut impl PinIo, port: Port) -> anyhow::Result<()> {
    let pin = single_pin(port)?;
    io.pin_mode(pin, PinMode::Output)?;
    io.digital_write(pin, PinState::Low)
}

pub fn init_input(io: &mut impl PinIo, port: Port, mode: PinMode) -> anyhow::Result<()> {
    io.pin_mode(single_pin(port)?, mode)
}

/// Buzzer pins are PWM and start silent.
pub fn init_buzzer<B: PinIo + Transport>(io: &mut B, port: Port) -> anyhow::Result<()> {
    let pin = single_pin(port)?;
    io.pin_mode(pin, PinMode::Pwm)?;
    io.write(&buzzer::tone_frame(pin, None))
}

/// Initialise one port as `kind`.
pub fn init_port<B: PinIo + Transport>(
    io: &mut B,
    hw: &mut HardwareModel,
    port: Port,
    kind: DeviceKind,
    calibration: Option<&Calibration>,
) -> anyhow::Result<()> {
    debug!("init {} as {}", port, kind.name());
    match kind {
        DeviceKind::Output | DeviceKind::Led => low_output(io, port),
        DeviceKind::Input
        | DeviceKind::LightSensor
        | DeviceKind::TouchSensor
        | DeviceKind::SoundSensor
        | DeviceKind::IrPhotoReflector => init_input(io, port, PinMode::Input),
        DeviceKind::PushButton => init_input(io, port, PinMode::InputPullup),
        DeviceKind::MultiLed => hw.rgb.init(io),
        DeviceKind::DcMotor => hw.motors.init(io, port, calibration.and_then(|c| c.scale)),
        DeviceKind::ServoMotor => hw.servos.init(io, port, calibration.and_then(|c| c.drift)),
        DeviceKind::Buzzer => init_buzzer(io, port),
        // The accelerometer needs no pin setup.
        DeviceKind::Accelerometer => Ok(()),
    }
}

/// Arguments of a `port-settings` action.
pub struct PortSettings<'a> {
    pub settings: &'a BTreeMap<Port, DeviceKind>,
    pub reset_only: bool,
    pub calibration: &'a BTreeMap<Port, BTreeMap<String, Calibration>>,
}

impl PortSettings<'_> {
    pub fn validate(&self) -> ActionResult<()> {
        self.settings
            .iter()
            .try_for_each(|(&port, &kind)| validate(port, kind))
    }

    /// Calibration for the type `port` is configured as.
    pub fn calibration(&self, port: Port) -> Option<&Calibration> {
        let kind = self.settings.get(&port)?;
        self.calibration.get(&port)?.get(kind.name())
    }

    /// Reset the board and configure every port.  Ports not listed are set
    /// to safe defaults unless `reset_only`.
    pub fn apply<B: PinIo + Transport>(&self, io: &mut B, hw: &mut HardwareModel) -> anyhow::Result<()> {
        debug!("port-settings: reset_only {} {:?}", self.reset_only, self.settings);
        io.reset()?;
        hw.rgb.init(io)?;

        for port in Port::MOTOR_PORTS {
            if self.settings.contains_key(&port) {
                hw.motors.init(io, port, self.calibration(port).and_then(|c| c.scale))?;
            }
        }

        let is_buzzer = |port: &Port| self.settings.get(port) == Some(&DeviceKind::Buzzer);
        let buzzers = Port::V_PORTS.into_iter().filter(|p| is_buzzer(p));
        let others = Port::V_PORTS.into_iter().filter(|p| !is_buzzer(p));
        for port in buzzers.chain(others) {
            match self.settings.get(&port) {
                Some(&kind) => init_port(io, hw, port, kind, self.calibration(port))?,
                None if !self.reset_only => low_output(io, port)?,
                None => {}
            }
        }

        if !self.reset_only {
            for port in Port::K_PORTS {
                match self.settings.get(&port) {
                    Some(&kind) => init_port(io, hw, port, kind, None)?,
                    None => init_input(io, port, PinMode::Input)?,
                }
            }
        }
        debug!("port-settings: all settings issued");
        Ok(())
    }
}
