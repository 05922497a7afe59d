//! Multi-LED (R/G/B) with a shared enable FET.
//!
//! The colour channels and the FET are active-low: the FET pin is driven
//! LOW whenever any channel is on and HIGH only when all three are off.
//! Every channel write recomputes the FET level.

use embedded_hal::digital::PinState;
use log::debug;

use crate::app::ports::{PinIo, PinMode};
use crate::pins::{LED_B_PIN, LED_FET_PIN, LED_G_PIN, LED_R_PIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Channel {
    pin: u8,
    on: bool,
}

pub struct RgbInterlock {
    channels: [Channel; 3],
}

impl Default for RgbInterlock {
    fn default() -> Self {
        Self::new()
    }
}

impl RgbInterlock {
    pub fn new() -> Self {
        Self {
            channels: [LED_R_PIN, LED_G_PIN, LED_B_PIN].map(|pin| Channel { pin, on: false }),
        }
    }

    pub fn is_channel(&self, pin: u8) -> bool {
        self.channels.iter().any(|c| c.pin == pin)
    }

    pub fn any_on(&self) -> bool {
        self.channels.iter().any(|c| c.on)
    }

    /// FET level for the current channel states.
    pub fn fet_level(&self) -> PinState {
        if self.any_on() {
            PinState::Low
        } else {
            PinState::High
        }
    }

    /// Record a channel state and drive the FET to match.  Pins that are
    /// not colour channels are ignored.
    pub fn set_channel(&mut self, io: &mut impl PinIo, pin: u8, on: bool) -> anyhow::Result<()> {
        let Some(channel) = self.channels.iter_mut().find(|c| c.pin == pin) else {
            return Ok(());
        };
        channel.on = on;
        let fet = self.fet_level();
        debug!("rgb pin {} on={} -> fet {:?}", pin, on, fet);
        io.digital_write(LED_FET_PIN, fet)
    }

    /// All pins as outputs, everything off.
    pub fn init(&mut self, io: &mut impl PinIo) -> anyhow::Result<()> {
        for c in &mut self.channels {
            c.on = false;
        }
        for pin in [LED_R_PIN, LED_G_PIN, LED_B_PIN, LED_FET_PIN] {
            io.pin_mode(pin, PinMode::Output)?;
            io.digital_write(pin, PinState::High)?;
        }
        Ok(())
    }

    /// Drive the three channels as PWM from levels in 0–100.
    pub fn set_levels(&mut self, io: &mut impl PinIo, levels: [f64; 3]) -> anyhow::Result<()> {
        if levels.iter().all(|&l| l <= 0.0) {
            for c in &mut self.channels {
                c.on = false;
            }
            io.digital_write(LED_FET_PIN, PinState::High)?;
            for c in &self.channels {
                io.digital_write(c.pin, PinState::High)?;
            }
            return Ok(());
        }

        for (c, &level) in self.channels.iter_mut().zip(&levels) {
            c.on = level > 0.0;
        }
        io.digital_write(LED_FET_PIN, self.fet_level())?;
        for (c, &level) in self.channels.iter().zip(&levels) {
            let duty = (level.clamp(0.0, 100.0) * 255.0 / 100.0).floor() as u8;
            io.pin_mode(c.pin, PinMode::Pwm)?;
            let idle = if duty == 0 { PinState::High } else { PinState::Low };
            io.digital_write(c.pin, idle)?;
            io.analog_write(c.pin, 255 - duty)?;
        }
        Ok(())
    }

    /// Track levels handled by the board itself (vendor multi-LED frame).
    pub fn note_levels(&mut self, levels: [u8; 3]) {
        for (c, &level) in self.channels.iter_mut().zip(&levels) {
            c.on = level > 0;
        }
    }
}
