//! Action service: runs one decoded [`Action`] against the board.
//!
//! [`ActionService`] is the [`ActionHandler`] behind a session's
//! dispatcher.  It owns the hardware model and talks to the board only
//! through the [`Board`] port, so every action is testable with a mock.
//!
//! ```text
//!   Dispatcher ──▶ ActionService::handle(action)
//!                    │
//!                    ├─▶ HardwareModel (motors · servos · rgb)
//!                    ├─▶ Board (PinIo + Transport)        writes
//!                    └─▶ ReplySlots ◀── event pump          replies
//! ```
//!
//! Pin and frame writes borrow the board for the duration of one
//! synchronous call and never across an await.

use core::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use embassy_time::Timer;
use embedded_hal::digital::PinState;
use log::{debug, info};

use super::actions::{Action, CommandBytes, NoteSpec, Switch};
use super::events::{ActionOutput, FirmwareInfo};
use super::port_setup::{self, PortSettings};
use super::ports::{Board, PinMode};
use crate::drivers::HardwareModel;
use crate::drivers::buzzer::{self, MelodyFormat, Note, StopFlag};
use crate::drivers::servo::{self, MotionPlan};
use crate::error::{ActionError, ActionResult, ErrorKind};
use crate::executor::Executor;
use crate::pins::Port;
use crate::rpc::channels::{Reply, ReplyKey, ReplySlots};
use crate::rpc::codec::{self, CodecError};
use crate::rpc::dispatcher::{ActionContext, ActionHandler, DeferredError};
use crate::rpc::flash::FlashWriter;

/// Default `bts01-*` module timeout (milliseconds).
pub const BLE_DEFAULT_TIMEOUT_MS: u16 = 1000;
/// Default `koov-reset` delay (board ticks).
pub const RESET_DEFAULT_TICKS: u16 = 1000;

/// Full scale of an analog report.
const ANALOG_MAX: f64 = 1023.0;
/// Sound sensor output tops out at 1.8 V of the 3.3 V reference.
const SOUND_MAX: f64 = ANALOG_MAX * 1.8 / 3.3;

// ───────────────────────────────────────────────────────────────
// Shared session handles
// ───────────────────────────────────────────────────────────────

/// Handles a service shares with the session that owns it.
pub struct BoardLink<B> {
    pub board: Rc<RefCell<B>>,
    pub replies: ReplySlots,
    pub executor: Rc<Executor>,
    pub deferred: DeferredError,
}

impl<B> Clone for BoardLink<B> {
    fn clone(&self) -> Self {
        Self {
            board: self.board.clone(),
            replies: self.replies.clone(),
            executor: self.executor.clone(),
            deferred: self.deferred.clone(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ActionService
// ───────────────────────────────────────────────────────────────

pub struct ActionService<B: Board + 'static> {
    link: BoardLink<B>,
    hw: RefCell<HardwareModel>,
    /// Stop flag of the melody currently playing, if any.
    melody: RefCell<Option<StopFlag>>,
    firmware: FirmwareInfo,
    selected_device: Option<String>,
}

impl<B: Board + 'static> ActionService<B> {
    pub fn new(
        link: BoardLink<B>,
        firmware: FirmwareInfo,
        selected_device: Option<String>,
        dcmotor_correction: bool,
    ) -> Self {
        Self {
            link,
            hw: RefCell::new(HardwareModel::new(dcmotor_correction)),
            melody: RefCell::new(None),
            firmware,
            selected_device,
        }
    }

    pub fn firmware(&self) -> &FirmwareInfo {
        &self.firmware
    }

    /// Read-only view of the hardware model.
    pub fn with_hardware<R>(&self, f: impl FnOnce(&HardwareModel) -> R) -> R {
        f(&self.hw.borrow())
    }

    // ── Board access ──────────────────────────────────────────

    /// Run `f` with the board and the hardware model borrowed.  A
    /// collaborator failure becomes `kind` with `what` as context.
    fn with_board<R>(
        &self,
        kind: ErrorKind,
        what: &str,
        f: impl FnOnce(&mut B, &mut HardwareModel) -> anyhow::Result<R>,
    ) -> ActionResult<R> {
        let mut board = self.link.board.borrow_mut();
        let mut hw = self.hw.borrow_mut();
        f(&mut board, &mut hw).map_err(|e| ActionError::transport(kind, what, &e))
    }

    fn write_frame(
        &self,
        kind: ErrorKind,
        what: &str,
        frame: Result<codec::Frame, CodecError>,
    ) -> ActionResult<()> {
        let frame = frame.map_err(|e| ActionError::new(kind, format!("{what}: {e}")))?;
        self.with_board(kind, what, |b, _| b.write(&frame))
    }

    fn single_pin(port: Port, what: &str) -> ActionResult<u8> {
        port.pin().ok_or_else(|| ActionError::unknown_port(port, what))
    }

    fn motor_port(port: Port, what: &str) -> ActionResult<Port> {
        match port.motor_pins() {
            Some(_) => Ok(port),
            None => Err(ActionError::unknown_port(port, what)),
        }
    }

    /// Query the version and wait for the answer: every command written
    /// before it has been processed by the board.
    async fn sync_device(&self, what: &str) -> ActionResult<()> {
        let pending = self.link.replies.register(ReplyKey::Version)?;
        self.with_board(ErrorKind::WriteError, what, |b, _| b.query_version())?;
        pending.recv().await;
        Ok(())
    }

    // ── Melody ────────────────────────────────────────────────

    /// Ask the running melody to stop at its next burst boundary.
    pub fn stop_melody(&self) {
        if let Some(stop) = self.melody.borrow_mut().take() {
            debug!("melody: stopping previous");
            stop.stop();
        }
    }

    fn start_melody(&self, format: MelodyFormat, notes: Vec<Note>) {
        self.stop_melody();
        let stop = StopFlag::new();
        self.link
            .executor
            .spawn(buzzer::play(
                self.link.board.clone(),
                format,
                notes,
                stop.clone(),
                self.link.deferred.clone(),
            ))
            .detach();
        *self.melody.borrow_mut() = Some(stop);
    }

    // ── Sensors ───────────────────────────────────────────────

    async fn read_digital(&self, port: Port, what: &str, mode: PinMode) -> ActionResult<ActionOutput> {
        let pin = Self::single_pin(port, what)?;
        let pending = self.link.replies.register(ReplyKey::DigitalRead(pin))?;
        self.with_board(ErrorKind::WriteError, what, |b, _| {
            b.pin_mode(pin, mode)?;
            b.report_digital(pin, true)
        })?;
        let reply = pending.recv().await;
        self.with_board(ErrorKind::WriteError, what, |b, _| b.report_digital(pin, false))?;
        match reply {
            Reply::Digital(value) => Ok(ActionOutput::Value { value: f64::from(value) }),
            other => Err(unexpected(what, &other)),
        }
    }

    async fn read_analog(&self, port: Port, what: &str, full_scale: f64) -> ActionResult<ActionOutput> {
        let channel = Self::single_pin(port, what)?;
        let pending = self.link.replies.register(ReplyKey::AnalogRead(channel))?;
        self.with_board(ErrorKind::WriteError, what, |b, _| {
            b.pin_mode(channel, PinMode::Input)?;
            b.report_analog(channel, true)
        })?;
        let reply = pending.recv().await;
        self.with_board(ErrorKind::WriteError, what, |b, _| b.report_analog(channel, false))?;
        match reply {
            Reply::Analog(raw) => Ok(ActionOutput::Value {
                value: f64::from(raw) * 100.0 / full_scale,
            }),
            other => Err(unexpected(what, &other)),
        }
    }

    async fn read_accelerometer(&self, port: Port, selector: u8) -> ActionResult<ActionOutput> {
        const WHAT: &str = "3-axis-digital-accelerometer-value";
        if !port.is_accelerometer_socket() {
            return Err(ActionError::unknown_port(port, WHAT));
        }
        let pending = self.link.replies.register(ReplyKey::Accelerometer)?;
        self.write_frame(ErrorKind::WriteError, WHAT, codec::accelerometer_query(selector))?;
        match pending.recv().await {
            Reply::Accelerometer { value, .. } => Ok(ActionOutput::Value { value: f64::from(value) }),
            other => Err(unexpected(WHAT, &other)),
        }
    }

    // ── BLE module ────────────────────────────────────────────

    async fn ble_command(
        &self,
        key: ReplyKey,
        what: &str,
        frame: Result<codec::Frame, CodecError>,
    ) -> ActionResult<ActionOutput> {
        let pending = self.link.replies.register(key)?;
        self.write_frame(ErrorKind::BleCommandFailure, what, frame)?;
        match pending.recv().await {
            Reply::Ble(payload) => Ok(ActionOutput::Ble { payload }),
            other => Err(unexpected(what, &other)),
        }
    }

    async fn pin_entry(&self, command: &CommandBytes) -> ActionResult<ActionOutput> {
        let pending = self.link.replies.register(ReplyKey::PinEntry)?;
        self.write_frame(ErrorKind::BleCommandFailure, "btpin", codec::pin_entry(command.as_bytes()))?;
        match pending.recv().await {
            Reply::PinEntry { status: 0, payload } => Ok(ActionOutput::PinEntry { status: 0, payload }),
            Reply::PinEntry { status, .. } => Err(ActionError::new(
                ErrorKind::PinVerifyFailure,
                format!("btpin: module status {status}"),
            )),
            other => Err(unexpected("btpin", &other)),
        }
    }

    // ── Servos ────────────────────────────────────────────────

    async fn run_motion(&self, plan: MotionPlan) -> ActionResult<ActionOutput> {
        const WHAT: &str = "servomotor-synchronized-motion";
        match plan {
            MotionPlan::Immediate { axes, settle } => {
                debug!("servo move: {} axes at once, settle {}ms", axes.len(), settle.as_millis());
                self.with_board(ErrorKind::WriteError, WHAT, |b, hw| {
                    axes.iter().try_for_each(|a| hw.servos.write(b, a.pin, a.target))
                })?;
                Timer::after(settle).await;
            }
            MotionPlan::Stepped { axes, ticks, step } => {
                debug!("servo move: {} axes, {} ticks of {}ms", axes.len(), ticks, step.as_millis());
                for k in 1..=ticks {
                    self.with_board(ErrorKind::WriteError, WHAT, |b, hw| {
                        axes.iter()
                            .try_for_each(|a| hw.servos.write(b, a.pin, a.position(k, ticks)))
                    })?;
                    Timer::after(step).await;
                }
            }
        }
        Ok(ActionOutput::Done)
    }

    async fn move_servomotors(
        &self,
        speed: f64,
        degrees: &BTreeMap<Port, f64>,
    ) -> ActionResult<ActionOutput> {
        const WHAT: &str = "move-servomotors";
        let targets: Vec<(u8, u8)> = degrees
            .iter()
            .filter_map(|(port, &deg)| {
                port.pin()
                    .map(|pin| (pin, servo::clamp_degree(deg).floor() as u8))
            })
            .collect();
        let speed = speed.clamp(0.0, 127.0).floor() as u8;
        self.write_frame(ErrorKind::WriteError, WHAT, codec::servo_sync(speed, &targets))?;
        self.sync_device(WHAT).await?;
        self.hw.borrow_mut().servos.cancel();
        Ok(ActionOutput::Done)
    }

    // ── Dispatch ──────────────────────────────────────────────

    /// Run one action to completion.
    pub async fn execute(&self, action: Action, cx: &ActionContext) -> ActionResult<ActionOutput> {
        let what = action.name();
        match action {
            Action::BoardInit => {
                info!("board-init: {}", self.firmware.name);
                Ok(ActionOutput::Done)
            }

            Action::PortInit { port, kind } => {
                port_setup::validate(port, kind)?;
                self.with_board(ErrorKind::WriteError, what, |b, hw| {
                    port_setup::init_port(b, hw, port, kind, None)
                })?;
                Ok(ActionOutput::Done)
            }

            Action::PortSettings { settings, reset_only, calibration } => {
                let ps = PortSettings { settings: &settings, reset_only, calibration: &calibration };
                ps.validate()?;
                self.stop_melody();
                self.hw.borrow_mut().servos.cancel();
                self.with_board(ErrorKind::WriteError, what, |b, hw| ps.apply(b, hw))?;
                self.sync_device(what).await?;
                Ok(ActionOutput::Done)
            }

            Action::TurnLed { port, mode } => {
                let pin = Self::single_pin(port, what)?;
                let on = mode == Switch::On;
                self.with_board(ErrorKind::WriteError, what, |b, hw| {
                    b.digital_write(pin, PinState::from(on))?;
                    // Recomputes the FET for colour channels, no-op otherwise.
                    hw.rgb.set_channel(b, pin, on)
                })?;
                Ok(ActionOutput::Done)
            }

            Action::MultiLed { r, g, b } => {
                self.with_board(ErrorKind::WriteError, what, |board, hw| {
                    hw.rgb.set_levels(board, [r, g, b])
                })?;
                Ok(ActionOutput::Done)
            }

            Action::MultiLedV1 { r, g, b } => {
                let [r, g, b] = [r, g, b].map(|l| l.clamp(0.0, 100.0).floor() as u8);
                self.write_frame(ErrorKind::WriteError, what, codec::multi_led(r, g, b))?;
                self.hw.borrow_mut().rgb.note_levels([r, g, b]);
                Ok(ActionOutput::Done)
            }

            Action::BuzzerOn { port, frequency } => {
                let pin = Self::single_pin(port, what)?;
                self.write_frame(ErrorKind::WriteError, what, Ok(buzzer::tone_frame(pin, Some(frequency))))?;
                Ok(ActionOutput::Done)
            }

            Action::BuzzerOff { port } => {
                let pin = Self::single_pin(port, what)?;
                self.write_frame(ErrorKind::WriteError, what, Ok(buzzer::tone_frame(pin, None)))?;
                Ok(ActionOutput::Done)
            }

            Action::Melody { port, melody } => {
                let pin = Self::single_pin(port, what)?;
                let notes = melody.iter().map(|n| note(n, pin)).collect();
                self.start_melody(MelodyFormat::Legacy { pin }, notes);
                Ok(ActionOutput::Done)
            }

            Action::MelodyV1 { port, melody } => {
                let pin = Self::single_pin(port, what)?;
                let notes = melody
                    .iter()
                    .map(|n| note(n, n.port.and_then(Port::pin).unwrap_or(pin)))
                    .collect();
                self.start_melody(MelodyFormat::Addressed, notes);
                Ok(ActionOutput::Done)
            }

            Action::ServomotorSynchronizedMotion { speed } => match speed.filter(|&s| s != 0.0) {
                None => {
                    self.hw.borrow_mut().servos.begin();
                    Ok(ActionOutput::Done)
                }
                Some(speed) => {
                    let plan = self.hw.borrow_mut().servos.plan(speed);
                    match plan {
                        Some(plan) => self.run_motion(plan).await,
                        None => Ok(ActionOutput::Done),
                    }
                }
            },

            Action::SetServomotorDegree { port, degree } => {
                let pin = Self::single_pin(port, what)?;
                let degree = servo::clamp_degree(degree);
                self.with_board(ErrorKind::WriteError, what, |b, hw| {
                    if hw.servos.buffer(port, degree) {
                        return Ok(());
                    }
                    hw.servos.write(b, pin, degree)
                })?;
                Ok(ActionOutput::Done)
            }

            Action::SetServomotorDegrees { degrees, sync } => {
                self.with_board(ErrorKind::WriteError, what, |b, hw| {
                    degrees
                        .iter()
                        .filter_map(|(port, &deg)| port.pin().map(|pin| (pin, deg)))
                        .try_for_each(|(pin, deg)| {
                            hw.servos.write(b, pin, servo::clamp_degree(deg))
                        })
                })?;
                if sync {
                    self.sync_device(what).await?;
                }
                Ok(ActionOutput::Done)
            }

            Action::MoveServomotors { speed, degrees } => self.move_servomotors(speed, &degrees).await,

            Action::SetDcmotorPower { port, power } => {
                let port = Self::motor_port(port, what)?;
                self.with_board(ErrorKind::WriteError, what, |b, hw| hw.motors.set_power(b, port, power))?;
                Ok(ActionOutput::Done)
            }

            Action::TurnDcmotorOn { port, direction } => {
                let port = Self::motor_port(port, what)?;
                self.with_board(ErrorKind::WriteError, what, |b, hw| hw.motors.set_mode(b, port, direction))?;
                Ok(ActionOutput::Done)
            }

            Action::TurnDcmotorOff { port, mode } => {
                let port = Self::motor_port(port, what)?;
                self.with_board(ErrorKind::WriteError, what, |b, hw| hw.motors.set_mode(b, port, mode))?;
                Ok(ActionOutput::Done)
            }

            Action::ButtonValue { port } => self.read_digital(port, what, PinMode::InputPullup).await,
            Action::TouchSensorValue { port } => self.read_digital(port, what, PinMode::Input).await,
            Action::IrPhotoReflectorValue { port } | Action::LightSensorValue { port } => {
                self.read_analog(port, what, ANALOG_MAX).await
            }
            Action::SoundSensorValue { port } => self.read_analog(port, what, SOUND_MAX).await,
            Action::AccelerometerValue { port, direction } => {
                self.read_accelerometer(port, direction.selector()).await
            }

            Action::Bts01Reset { timeout, command } => {
                let timeout = timeout.unwrap_or(BLE_DEFAULT_TIMEOUT_MS);
                self.ble_command(ReplyKey::BleReset, what, codec::ble_reset(timeout, command.as_bytes()))
                    .await
            }

            Action::Bts01Cmd { timeout, command } => {
                let timeout = timeout.unwrap_or(BLE_DEFAULT_TIMEOUT_MS);
                self.ble_command(ReplyKey::BleCommand, what, codec::ble_command(timeout, command.as_bytes()))
                    .await
            }

            Action::FlashWrite { data, progress } => {
                FlashWriter::new(&*self.link.board, &self.link.replies)
                    .program(&data, cx, progress.as_ref())
                    .await?;
                Ok(ActionOutput::Done)
            }

            Action::Btpin { command } => self.pin_entry(&command).await,

            Action::KoovReset { ticks } => {
                let ticks = ticks.unwrap_or(RESET_DEFAULT_TICKS);
                info!("koov-reset in {} ticks", ticks);
                self.write_frame(ErrorKind::WriteError, what, codec::board_reset(ticks))?;
                Ok(ActionOutput::Done)
            }

            Action::FirmataVersion => Ok(ActionOutput::Version {
                major: self.firmware.major,
                minor: self.firmware.minor,
            }),

            Action::FirmataName => {
                let (major, minor, patch) = self.firmware.release();
                Ok(ActionOutput::Firmware {
                    name: self.firmware.name.clone(),
                    major,
                    minor,
                    patch,
                })
            }

            Action::ServomotorDegrees => {
                let hw = self.hw.borrow();
                Ok(ActionOutput::ServoDegrees {
                    degrees: hw.servos.port_degrees(),
                    synchronized: hw.servos.is_synchronized(),
                    selected_device: self.selected_device.clone(),
                })
            }

            Action::ResetServomotorSynchronizedMotion => {
                self.hw.borrow_mut().servos.cancel();
                self.sync_device(what).await?;
                Ok(ActionOutput::Done)
            }

            Action::SyncDevice => {
                self.sync_device(what).await?;
                Ok(ActionOutput::Done)
            }
        }
    }
}

impl<B: Board + 'static> ActionHandler for ActionService<B> {
    type Request = Action;
    type Output = ActionOutput;

    fn name(request: &Action) -> &'static str {
        request.name()
    }

    async fn handle(&self, request: Action, cx: &ActionContext) -> ActionResult<ActionOutput> {
        self.execute(request, cx).await
    }
}

fn note(spec: &NoteSpec, pin: u8) -> Note {
    Note {
        frequency: spec.frequency,
        secs: spec.secs,
        pin,
    }
}

fn unexpected(what: &str, reply: &Reply) -> ActionError {
    ActionError::new(ErrorKind::Exception, format!("{what}: unexpected reply {reply:?}"))
}
