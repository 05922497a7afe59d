//! Buzzer tones and melody playback.
//!
//! Plain on/off uses the short buzzer frame.  Melodies are sent in bursts
//! the board can buffer (20 notes legacy, 13 addressed); the player waits
//! until the wall-clock end of a burst before sending the next one:
//!
//! ```text
//!   t0 ──send burst 1──▶ Timer::at(t0 + Σsecs) ──send burst 2──▶ …
//! ```
//!
//! Playback runs outside the dispatcher.  A write failure is parked in
//! the [`DeferredError`] slot for the next action and stops playback.

use core::cell::{Cell, RefCell};
use std::rc::Rc;

use embassy_time::{Duration, Instant, Timer};
use log::{debug, warn};

use crate::error::{ActionError, ErrorKind};
use crate::rpc::codec::{self, END};
use crate::rpc::dispatcher::DeferredError;
use crate::rpc::transport::Transport;

/// Lowest and highest playable note numbers.
pub const NOTE_MIN: f64 = 48.0;
pub const NOTE_MAX: f64 = 108.0;

/// Longest note the player waits for: 0xffff ticks of 10 ms.
pub const MAX_NOTE_MICROS: u64 = 0xffff * 10_000;

pub const LEGACY_BURST: usize = 20;
pub const ADDRESSED_BURST: usize = 13;

/// One note: frequency as a note number, length in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub frequency: f64,
    pub secs: f64,
    /// Buzzer pin; only sent in the addressed format.
    pub pin: u8,
}

impl Note {
    /// Two wire bytes: `(tone << 1) | long`, then the low byte of the
    /// length in 10 ms ticks (never the end byte).
    pub fn encode(&self) -> [u8; 2] {
        let freq = self.frequency.floor();
        let ticks = (self.secs * 100.0).floor().max(0.0) as u32;
        let tone = if (NOTE_MIN..=NOTE_MAX).contains(&freq) {
            (freq - (NOTE_MIN - 1.0)) as u8
        } else {
            0
        };
        let lo = (ticks & 0xff) as u8;
        [
            (tone << 1) | u8::from(ticks > 0xff),
            if lo == END { END + 1 } else { lo },
        ]
    }

    /// Wall-clock length, capped at [`MAX_NOTE_MICROS`].
    pub fn duration(&self) -> Duration {
        // Float casts saturate: NaN and negatives become 0.
        let micros = (self.secs * 1_000_000.0) as u64;
        Duration::from_micros(micros.min(MAX_NOTE_MICROS))
    }
}

/// Melody frame layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MelodyFormat {
    /// One pin for the whole frame (older firmware).
    Legacy { pin: u8 },
    /// Pin per note.
    Addressed,
}

impl MelodyFormat {
    pub fn burst_len(self) -> usize {
        match self {
            Self::Legacy { .. } => LEGACY_BURST,
            Self::Addressed => ADDRESSED_BURST,
        }
    }
}

/// Wall-clock length of a burst.
pub fn burst_duration(notes: &[Note]) -> Duration {
    notes
        .iter()
        .fold(Duration::from_ticks(0), |acc, n| {
            acc.checked_add(n.duration()).unwrap_or(Duration::MAX)
        })
}

/// Tone on/off frame.
pub fn tone_frame(pin: u8, frequency: Option<f64>) -> codec::Frame {
    match frequency {
        Some(f) => codec::buzzer(pin, true, f.clamp(0.0, 127.0).floor() as u8),
        None => codec::buzzer(pin, false, 0),
    }
}

/// Shared stop request for the running melody.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Rc<Cell<bool>>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }
}

/// Play `notes` burst by burst until done or `stop` is raised.
pub async fn play<T: Transport>(
    link: Rc<RefCell<T>>,
    format: MelodyFormat,
    notes: Vec<Note>,
    stop: StopFlag,
    deferred: DeferredError,
) {
    let mut rest = notes.as_slice();
    while !rest.is_empty() {
        if stop.is_stopped() {
            debug!("melody: stop requested");
            return;
        }
        let start = Instant::now();
        let (burst, tail) = rest.split_at(rest.len().min(format.burst_len()));

        let sent = codec::melody(format, burst)
            .map_err(|e| ActionError::new(ErrorKind::WriteError, format!("melody: {e}")))
            .and_then(|frame| {
                link.borrow_mut()
                    .write(&frame)
                    .map_err(|e| ActionError::transport(ErrorKind::WriteError, "melody", &e))
            });
        if let Err(err) = sent {
            warn!("melody: {}", err);
            deferred.record(err);
            return;
        }

        rest = tail;
        if rest.is_empty() {
            break;
        }
        let end = start
            .checked_add(burst_duration(burst))
            .unwrap_or(Instant::MAX);
        debug!(
            "melody: {} notes sent, next burst in {}ms",
            burst.len(),
            end.saturating_duration_since(Instant::now()).as_millis()
        );
        Timer::at(end).await;
    }
    debug!("melody: done");
}
