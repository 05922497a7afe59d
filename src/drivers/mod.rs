//! Hardware control model: per-session state for every actuator family.
//!
//! Drivers own their state and write through the [`PinIo`] port; they
//! never block and never touch the dispatcher.  Timed sequences (servo
//! interpolation, melody bursts) are planned here and paced by the caller.
//!
//! [`PinIo`]: crate::app::ports::PinIo

pub mod buzzer;
pub mod led;
pub mod motor;
pub mod servo;

use led::RgbInterlock;
use motor::DcMotors;
use servo::ServoBank;

/// Mutable hardware state owned by one session.
pub struct HardwareModel {
    pub motors: DcMotors,
    pub servos: ServoBank,
    pub rgb: RgbInterlock,
}

impl HardwareModel {
    pub fn new(dcmotor_correction: bool) -> Self {
        Self {
            motors: DcMotors::new(dcmotor_correction),
            servos: ServoBank::new(),
            rgb: RgbInterlock::new(),
        }
    }
}
