//! Servo bank: logical degree cache, drift calibration, synchronized motion.
//!
//! ## Degree bookkeeping
//!
//! The bank remembers the last *logical* degree written to each pin.  The
//! per-pin drift is added only at the physical write and never stored, so
//! reading back a degree always returns what the program asked for.
//!
//! ## Synchronized motion
//!
//! ```text
//!   begin()            synchronized = true, buffers cleared
//!   buffer(port, deg)  targets collected instead of written
//!   plan(speed)        per-axis deltas → MotionPlan
//!
//!   tick k of N:  pos = start + delta · k / N     (pos = target at k = N)
//! ```
//!
//! Every axis advances by its own fraction of its distance each tick, so
//! all axes land on their targets on the same final tick.

use std::collections::{BTreeMap, HashMap};

use embassy_time::Duration;
use log::debug;

use crate::app::ports::PinIo;
use crate::pins::Port;

pub const DEGREE_MIN: f64 = 0.0;
pub const DEGREE_MAX: f64 = 180.0;
/// Degree written when a servo port is initialised.
pub const INITIAL_DEGREE: f64 = 90.0;
pub const PULSE_MIN_US: u16 = 500;
pub const PULSE_MAX_US: u16 = 2500;

/// Step delay at speed 0.
const MAX_STEP_DELAY_MS: f64 = 20.0;
/// Settle time per degree when writing without interpolation.
const SETTLE_MS_PER_DEGREE: f64 = 3.0;

pub fn clamp_degree(degree: f64) -> f64 {
    degree.clamp(DEGREE_MIN, DEGREE_MAX)
}

/// Per-step delay for a speed in 0–100.  Zero means "no interpolation".
pub fn step_delay_ms(speed: f64) -> f64 {
    MAX_STEP_DELAY_MS - (speed.clamp(0.0, 100.0) / 5.0).clamp(0.0, MAX_STEP_DELAY_MS)
}

fn millis(ms: f64) -> Duration {
    Duration::from_micros((ms.max(0.0) * 1000.0) as u64)
}

// ── Motion plan ───────────────────────────────────────────────

/// One servo taking part in a synchronized move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axis {
    pub port: Port,
    pub pin: u8,
    pub start: f64,
    pub target: f64,
}

impl Axis {
    pub fn delta(&self) -> f64 {
        self.target - self.start
    }

    /// Logical degree on tick `k` of `ticks` (1-based).
    pub fn position(&self, k: u32, ticks: u32) -> f64 {
        if k >= ticks {
            return self.target;
        }
        self.start + self.delta() * f64::from(k) / f64::from(ticks)
    }
}

/// How a synchronized move is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionPlan {
    /// Write every target at once, then wait for the servos to settle.
    Immediate { axes: Vec<Axis>, settle: Duration },
    /// `ticks` interpolation steps, `step` apart.
    Stepped {
        axes: Vec<Axis>,
        ticks: u32,
        step: Duration,
    },
}

impl MotionPlan {
    pub fn axes(&self) -> &[Axis] {
        match self {
            Self::Immediate { axes, .. } | Self::Stepped { axes, .. } => axes,
        }
    }
}

// ── Synchronized-motion state ─────────────────────────────────

#[derive(Debug, Default)]
pub struct SyncState {
    pub synchronized: bool,
    /// Buffered targets, by port.
    pub expected: BTreeMap<Port, f64>,
}

// ── Bank ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ServoBank {
    degrees: HashMap<u8, f64>,
    drift: HashMap<u8, f64>,
    sync: SyncState,
}

impl ServoBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure `port` as a servo with `drift` and move it to the
    /// initial degree.
    pub fn init(&mut self, io: &mut impl PinIo, port: Port, drift: Option<f64>) -> anyhow::Result<()> {
        let Some(pin) = port.pin() else {
            return Ok(());
        };
        self.drift.insert(pin, drift.unwrap_or(0.0));
        io.servo_config(pin, PULSE_MIN_US, PULSE_MAX_US)?;
        self.write(io, pin, INITIAL_DEGREE)
    }

    /// Record `degree` as the logical position of `pin` and write it with
    /// drift applied.
    pub fn write(&mut self, io: &mut impl PinIo, pin: u8, degree: f64) -> anyhow::Result<()> {
        self.degrees.insert(pin, degree);
        let physical = self.physical_degree(pin, degree);
        debug!("servo pin {}: {} (physical {})", pin, degree, physical);
        io.servo_write(pin, physical)
    }

    /// Degree sent to the board for a logical degree.
    pub fn physical_degree(&self, pin: u8, degree: f64) -> u8 {
        let drift = self.drift.get(&pin).copied().unwrap_or(0.0);
        clamp_degree(degree + drift).floor() as u8
    }

    /// Last logical degree written to `pin`.
    pub fn degree(&self, pin: u8) -> Option<f64> {
        self.degrees.get(&pin).copied()
    }

    pub fn drift(&self, pin: u8) -> f64 {
        self.drift.get(&pin).copied().unwrap_or(0.0)
    }

    /// Last logical degree of every port that has one.
    pub fn port_degrees(&self) -> BTreeMap<Port, f64> {
        Port::ALL
            .iter()
            .filter_map(|&port| Some((port, self.degree(port.pin()?)?)))
            .collect()
    }

    // ── Synchronized motion ───────────────────────────────────

    pub fn is_synchronized(&self) -> bool {
        self.sync.synchronized
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    /// Start buffering targets.
    pub fn begin(&mut self) {
        self.sync.synchronized = true;
        self.sync.expected.clear();
    }

    /// Leave synchronized mode without moving.
    pub fn cancel(&mut self) {
        self.sync.synchronized = false;
    }

    /// Buffer a target.  Returns `false` (nothing buffered) when not in
    /// synchronized mode.
    pub fn buffer(&mut self, port: Port, degree: f64) -> bool {
        if !self.sync.synchronized {
            return false;
        }
        self.sync.expected.insert(port, clamp_degree(degree));
        true
    }

    /// End synchronized mode and plan the move to the buffered targets.
    /// `None` when nothing has to move.  A port with no known position is
    /// taken to already be at its target.
    pub fn plan(&mut self, speed: f64) -> Option<MotionPlan> {
        self.sync.synchronized = false;

        let axes: Vec<Axis> = self
            .sync
            .expected
            .iter()
            .filter_map(|(&port, &target)| {
                let pin = port.pin()?;
                let start = self.degree(pin).unwrap_or(target);
                Some(Axis { port, pin, start, target })
            })
            .collect();

        let max_delta = axes.iter().map(|a| a.delta().abs()).fold(0.0, f64::max);
        if max_delta == 0.0 {
            return None;
        }

        let delay = step_delay_ms(speed);
        debug!("servo sync: max delta {} step {}ms", max_delta, delay);
        if delay == 0.0 {
            Some(MotionPlan::Immediate {
                axes,
                settle: millis(max_delta * SETTLE_MS_PER_DEGREE),
            })
        } else {
            Some(MotionPlan::Stepped {
                axes,
                ticks: max_delta.ceil() as u32,
                step: millis(delay),
            })
        }
    }
}
