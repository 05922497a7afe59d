//! Vendor sysex frame codec.
//!
//! Wire format:
//! ```text
//! ┌──────┬────────┬─────────┬────────┬──────────────────┬──────┐
//! │ 0xF0 │ 0x0E   │ sub-cmd │ opcode │ payload (7-bit)  │ 0xF7 │
//! │start │ vendor │ 01 qry  │        │                  │ end  │
//! │      │        │ 02 cmd  │        │                  │      │
//! └──────┴────────┴─────────┴────────┴──────────────────┴──────┘
//!
//! plain buzzer:  F0 0F pin on freq F7
//! ```
//!
//! Numbers inside a frame are packed seven bits per byte so the end byte
//! never appears in a body.  Flash images are byte-stuffed instead
//! (`7F → 7F 00`, `F7 → 7F 01`) before being cut into chunks.
//!
//! Replies are correlated by [`ReplyKey`] (operation type), never by a
//! transaction id.  The streaming [`FrameDecoder`] handles partial reads:
//! a single transport read may carry half a frame, several frames, or
//! garbage between frames.

use core::fmt;

use heapless::Vec;

use super::channels::{Reply, ReplyKey};
use crate::drivers::buzzer::{MelodyFormat, Note};

pub const START: u8 = 0xf0;
pub const END: u8 = 0xf7;
pub const VENDOR: u8 = 0x0e;
/// Two-byte-opcode framing used for plain buzzer on/off.
pub const BUZZER: u8 = 0x0f;
pub const ESCAPE: u8 = 0x7f;

pub const SUB_QUERY: u8 = 0x01;
pub const SUB_COMMAND: u8 = 0x02;

/// Command opcodes (sub-command 0x02).
pub mod op {
    pub const BLE_RESET: u8 = 0x01;
    pub const BLE_COMMAND: u8 = 0x02;
    pub const BOARD_RESET: u8 = 0x03;
    pub const SERVO_SYNC: u8 = 0x05;
    pub const MELODY_LEGACY: u8 = 0x06;
    pub const MULTI_LED: u8 = 0x07;
    pub const FLASH_ERASE: u8 = 0x08;
    pub const FLASH_FINISH: u8 = 0x09;
    pub const FLASH_WRITE: u8 = 0x0a;
    pub const PIN_ENTRY: u8 = 0x0b;
    pub const MELODY: u8 = 0x0c;
}

/// Largest frame the codec builds or accepts.
pub const MAX_FRAME_SIZE: usize = 128;

/// Flash payload bytes per write frame.
pub const FLASH_CHUNK: usize = 50;

/// Outgoing frame buffer.
pub type Frame = Vec<u8, MAX_FRAME_SIZE>;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Frame would exceed [`MAX_FRAME_SIZE`].
    FrameTooLarge,
    /// Missing start/end byte or vendor marker.
    Malformed,
    /// Frame body shorter than its operation requires.
    Truncated,
    UnknownSubCommand(u8),
    UnknownOperation(u8),
    /// Escape byte followed by something other than 0x00/0x01.
    InvalidEscape(u8),
    /// Payload ends with a lone escape byte.
    TrailingEscape,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooLarge => write!(f, "frame exceeds {MAX_FRAME_SIZE} bytes"),
            Self::Malformed => write!(f, "malformed vendor frame"),
            Self::Truncated => write!(f, "truncated vendor frame"),
            Self::UnknownSubCommand(s) => write!(f, "unknown sub-command 0x{s:02x}"),
            Self::UnknownOperation(o) => write!(f, "unknown operation 0x{o:02x}"),
            Self::InvalidEscape(b) => write!(f, "invalid escape sequence 7f {b:02x}"),
            Self::TrailingEscape => write!(f, "payload ends inside an escape sequence"),
        }
    }
}

impl std::error::Error for CodecError {}

// ── 7-bit packing ─────────────────────────────────────────────

/// Pack a value into two 7-bit bytes, MSB first.  Values above 14 bits
/// are clamped.
pub fn pack14(value: u16) -> [u8; 2] {
    let v = value.min(0x3fff);
    [((v >> 7) & 0x7f) as u8, (v & 0x7f) as u8]
}

/// Inverse of [`pack14`].
pub fn unpack14(hi: u8, lo: u8) -> u16 {
    (u16::from(hi & 0x7f) << 7) | u16::from(lo & 0x7f)
}

/// Signed 14-bit value sent LSB first (accelerometer replies).
fn unpack_signed14(lo: u8, hi: u8) -> i16 {
    let raw = unpack14(hi, lo) as i16;
    if raw & 0x2000 != 0 { raw - 0x4000 } else { raw }
}

// ── Frame builders ────────────────────────────────────────────

struct FrameBuilder {
    buf: Frame,
}

impl FrameBuilder {
    fn command(opcode: u8) -> Result<Self, CodecError> {
        let mut b = Self { buf: Vec::new() };
        b.extend(&[START, VENDOR, SUB_COMMAND, opcode])?;
        Ok(b)
    }

    fn query() -> Result<Self, CodecError> {
        let mut b = Self { buf: Vec::new() };
        b.extend(&[START, VENDOR, SUB_QUERY])?;
        Ok(b)
    }

    fn push(&mut self, byte: u8) -> Result<(), CodecError> {
        self.buf.push(byte).map_err(|_| CodecError::FrameTooLarge)
    }

    fn extend(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.buf
            .extend_from_slice(bytes)
            .map_err(|_| CodecError::FrameTooLarge)
    }

    fn finish(mut self) -> Result<Frame, CodecError> {
        self.push(END)?;
        Ok(self.buf)
    }
}

fn timed_command(opcode: u8, timeout_ms: u16, command: &[u8]) -> Result<Frame, CodecError> {
    let mut b = FrameBuilder::command(opcode)?;
    b.extend(&pack14(timeout_ms))?;
    b.extend(command)?;
    b.finish()
}

/// BLE module reset, optionally followed by an AT command.
pub fn ble_reset(timeout_ms: u16, command: &[u8]) -> Result<Frame, CodecError> {
    timed_command(op::BLE_RESET, timeout_ms, command)
}

/// Raw AT command to the BLE module.
pub fn ble_command(timeout_ms: u16, command: &[u8]) -> Result<Frame, CodecError> {
    timed_command(op::BLE_COMMAND, timeout_ms, command)
}

/// Board soft reset after `ticks`.
pub fn board_reset(ticks: u16) -> Result<Frame, CodecError> {
    let mut b = FrameBuilder::command(op::BOARD_RESET)?;
    b.extend(&pack14(ticks))?;
    b.finish()
}

pub fn flash_erase() -> Result<Frame, CodecError> {
    FrameBuilder::command(op::FLASH_ERASE)?.finish()
}

pub fn flash_finish() -> Result<Frame, CodecError> {
    FrameBuilder::command(op::FLASH_FINISH)?.finish()
}

/// One chunk of an already byte-stuffed flash image.
pub fn flash_write(chunk: &[u8]) -> Result<Frame, CodecError> {
    if chunk.len() > FLASH_CHUNK {
        return Err(CodecError::FrameTooLarge);
    }
    let mut b = FrameBuilder::command(op::FLASH_WRITE)?;
    b.push(chunk.len() as u8)?;
    b.extend(chunk)?;
    b.finish()
}

/// PIN entry with an arbitrary payload.
pub fn pin_entry(payload: &[u8]) -> Result<Frame, CodecError> {
    let mut b = FrameBuilder::command(op::PIN_ENTRY)?;
    b.extend(payload)?;
    b.finish()
}

/// PIN entry carrying a 14-bit code.
pub fn pin_code(code: u16) -> Result<Frame, CodecError> {
    pin_entry(&pack14(code))
}

/// Multi-LED levels, each 0–100.
pub fn multi_led(r: u8, g: u8, b: u8) -> Result<Frame, CodecError> {
    let mut f = FrameBuilder::command(op::MULTI_LED)?;
    f.extend(&[r.min(100), g.min(100), b.min(100)])?;
    f.finish()
}

/// Highest servo degree on the wire.
pub const SERVO_DEGREE_MAX: u8 = 180;

// Degrees travel as one raw byte; the range must stay clear of the delimiters.
const _: () = assert!(SERVO_DEGREE_MAX < START && SERVO_DEGREE_MAX < END);

/// Synchronized multi-servo move: `speed count (pin degree)*`.
///
/// Unlike every other field, the degree is not 7-bit packed: the board
/// firmware reads it as a full byte, so 128–180 appear above 0x7f inside
/// the frame body.
pub fn servo_sync(speed: u8, targets: &[(u8, u8)]) -> Result<Frame, CodecError> {
    let mut b = FrameBuilder::command(op::SERVO_SYNC)?;
    b.push(speed & 0x7f)?;
    b.push(targets.len() as u8 & 0x7f)?;
    for &(pin, degree) in targets {
        let degree = degree.min(SERVO_DEGREE_MAX);
        debug_assert!(degree != START && degree != END);
        b.push(pin)?;
        b.push(degree)?;
    }
    b.finish()
}

/// One melody burst.  Legacy frames name the pin once; addressed frames
/// carry a pin per note.
pub fn melody(format: MelodyFormat, notes: &[Note]) -> Result<Frame, CodecError> {
    let mut b = match format {
        MelodyFormat::Legacy { pin } => {
            let mut b = FrameBuilder::command(op::MELODY_LEGACY)?;
            b.push(pin)?;
            b
        }
        MelodyFormat::Addressed => FrameBuilder::command(op::MELODY)?,
    };
    for note in notes {
        if matches!(format, MelodyFormat::Addressed) {
            b.push(note.pin)?;
        }
        b.extend(&note.encode())?;
    }
    b.finish()
}

/// Accelerometer axis query (`1` = x, `2` = y, `3` = z).
pub fn accelerometer_query(axis: u8) -> Result<Frame, CodecError> {
    let mut b = FrameBuilder::query()?;
    b.push(axis)?;
    b.finish()
}

/// Plain buzzer on/off using the two-byte-opcode framing.
pub fn buzzer(pin: u8, on: bool, frequency: u8) -> Frame {
    let mut f = Frame::new();
    // Six bytes always fit.
    let _ = f.extend_from_slice(&[START, BUZZER, pin, u8::from(on), frequency & 0x7f, END]);
    f
}

// ── Device-side builders ──────────────────────────────────────

/// Command reply as the board sends it: `F0 0E 02 op payload F7`.
pub fn command_reply(opcode: u8, payload: &[u8]) -> Result<Frame, CodecError> {
    let mut b = FrameBuilder::command(opcode)?;
    b.extend(payload)?;
    b.finish()
}

/// Accelerometer reply: axis selector then a signed 14-bit value, LSB first.
pub fn accelerometer_reply(axis: u8, value: i16) -> Result<Frame, CodecError> {
    let raw = (value as u16) & 0x3fff;
    let mut b = FrameBuilder::query()?;
    b.extend(&[axis, (raw & 0x7f) as u8, ((raw >> 7) & 0x7f) as u8])?;
    b.finish()
}

// ── Reply parsing ─────────────────────────────────────────────

/// Parse a complete vendor frame into its correlation key and payload.
pub fn decode_reply(frame: &[u8]) -> Result<(ReplyKey, Reply), CodecError> {
    let n = frame.len();
    if n < 4 || frame[0] != START || frame[n - 1] != END || frame[1] != VENDOR {
        return Err(CodecError::Malformed);
    }
    let sub = frame[2];
    let body = &frame[3..n - 1];

    match sub {
        SUB_QUERY => {
            let [axis, lo, hi] = body else {
                return Err(CodecError::Truncated);
            };
            let value = unpack_signed14(*lo, *hi);
            Ok((
                ReplyKey::Accelerometer,
                Reply::Accelerometer { axis: *axis, value },
            ))
        }
        SUB_COMMAND => {
            let (&opcode, payload) = body.split_first().ok_or(CodecError::Truncated)?;
            let status = || payload.first().copied().ok_or(CodecError::Truncated);
            let reply = match opcode {
                op::BLE_RESET => (ReplyKey::BleReset, Reply::Ble(payload.to_vec())),
                op::BLE_COMMAND => (ReplyKey::BleCommand, Reply::Ble(payload.to_vec())),
                op::FLASH_ERASE => (ReplyKey::FlashErase, Reply::Flash { status: status()? }),
                op::FLASH_WRITE => (ReplyKey::FlashWrite, Reply::Flash { status: status()? }),
                op::FLASH_FINISH => (ReplyKey::FlashFinish, Reply::Flash { status: status()? }),
                op::PIN_ENTRY => (
                    ReplyKey::PinEntry,
                    Reply::PinEntry {
                        status: status()?,
                        payload: payload[1..].to_vec(),
                    },
                ),
                other => return Err(CodecError::UnknownOperation(other)),
            };
            Ok(reply)
        }
        other => Err(CodecError::UnknownSubCommand(other)),
    }
}

// ── Byte stuffing ─────────────────────────────────────────────

/// Byte-stuff a flash image so neither the escape nor the end byte
/// appears literally.
pub fn escape(data: &[u8]) -> std::vec::Vec<u8> {
    let mut out = std::vec::Vec::with_capacity(data.len() + data.len() / 16);
    for &byte in data {
        match byte {
            ESCAPE => out.extend_from_slice(&[ESCAPE, 0x00]),
            END => out.extend_from_slice(&[ESCAPE, 0x01]),
            b => out.push(b),
        }
    }
    out
}

/// Inverse of [`escape`].
pub fn unescape(data: &[u8]) -> Result<std::vec::Vec<u8>, CodecError> {
    let mut out = std::vec::Vec::with_capacity(data.len());
    let mut bytes = data.iter().copied();
    while let Some(byte) = bytes.next() {
        if byte != ESCAPE {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(0x00) => out.push(ESCAPE),
            Some(0x01) => out.push(END),
            Some(other) => return Err(CodecError::InvalidEscape(other)),
            None => return Err(CodecError::TrailingEscape),
        }
    }
    Ok(out)
}

// ── Streaming decoder ─────────────────────────────────────────

/// Decoder state machine.
enum DecoderState {
    /// Discarding bytes until a start byte.
    Hunting,
    /// Inside a frame.
    Collecting,
}

/// Streaming vendor-frame decoder.
///
/// Collects bytes from `F0` through `F7`.  A start byte in the middle of a
/// frame restarts collection; an oversized frame is dropped and the
/// decoder resynchronises on the next start byte.
pub struct FrameDecoder {
    state: DecoderState,
    buf: Frame,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Hunting,
            buf: Vec::new(),
        }
    }

    /// Feed bytes into the decoder, calling `on_frame` for every complete
    /// frame (start and end bytes included).  Returns the frame count.
    pub fn feed(&mut self, data: &[u8], mut on_frame: impl FnMut(&[u8])) -> usize {
        let mut frames = 0;
        for &byte in data {
            match self.state {
                DecoderState::Hunting => {
                    if byte == START {
                        self.buf.clear();
                        // Empty buffer always has room.
                        let _ = self.buf.push(byte);
                        self.state = DecoderState::Collecting;
                    }
                }
                DecoderState::Collecting => {
                    if byte == START {
                        self.buf.clear();
                        let _ = self.buf.push(byte);
                        continue;
                    }
                    if self.buf.push(byte).is_err() {
                        // Oversized; drop and hunt for the next frame.
                        self.reset();
                        continue;
                    }
                    if byte == END {
                        on_frame(&self.buf);
                        frames += 1;
                        self.reset();
                    }
                }
            }
        }
        frames
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.state = DecoderState::Hunting;
        self.buf.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
