//! Device session: owns one board connection end to end.
//!
//! ```text
//!  open(device)
//!    │ Transport::open(inbox)          ── NO_DEVICE on failure
//!    │ spawn event pump ◀── inbox ◀── board collaborator
//!    │ PIN entry (unless Null)
//!    │ handshake: version + firmware   ── HANDSHAKE_TIMEOUT / VERSION_MISMATCH
//!    │ spawn dispatcher driver, board-init
//!    ▼ spawn keep-alive                 ── READY
//!
//!  disconnect / error(e) / close(e) ──▶ terminate ──▶ close
//! ```
//!
//! Everything runs on the session's single-threaded [`Executor`];
//! callers drive it through [`DeviceSession::block_on`].  Background
//! tasks hold only a `Weak` to the session, so dropping the last handle
//! stops them.

pub mod lifecycle;
pub mod recovery;

use core::cell::{Cell, RefCell};
use core::future::Future;
use std::rc::{Rc, Weak};

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer, with_timeout};
use futures_lite::future;
use log::{debug, info, warn};

use crate::app::actions::Action;
use crate::app::events::{ActionOutput, BoardEvent, FirmwareInfo};
use crate::app::ports::Board;
use crate::app::service::{ActionService, BoardLink};
use crate::config::{PinEntry, SessionConfig};
use crate::error::{ActionError, ActionResult, ErrorKind};
use crate::executor::{self, Executor, Task};
use crate::rpc::channels::{EventInbox, Reply, ReplyKey, ReplySlots, event_inbox, route_event};
use crate::rpc::codec;
use crate::rpc::dispatcher::{DeferredError, Dispatcher};
use crate::rpc::transport::DeviceDescriptor;

pub use lifecycle::SessionState;
use lifecycle::Lifecycle;

type SessionDispatcher<B> = Dispatcher<ActionService<B>>;

/// Per-connection signals shared with the event pump.
struct LinkSignals {
    /// Stops the pump.
    stop: Signal<NoopRawMutex, ()>,
    /// A fatal link event arrived while the handshake was running.
    lost: Signal<NoopRawMutex, ()>,
    /// Latched copy of `lost`; waiting on the signal consumes it.
    lost_latch: Cell<bool>,
}

impl LinkSignals {
    const fn new() -> Self {
        Self {
            stop: Signal::new(),
            lost: Signal::new(),
            lost_latch: Cell::new(false),
        }
    }

    fn mark_lost(&self) {
        self.lost_latch.set(true);
        self.lost.signal(());
    }

    fn is_lost(&self) -> bool {
        self.lost_latch.get()
    }
}

/// Everything that exists only while a connection is up.
struct Connection<B: Board + 'static> {
    dispatcher: SessionDispatcher<B>,
    driver: Task<()>,
    keep_alive: Option<Task<()>>,
}

struct SessionInner<B: Board + 'static> {
    executor: Rc<Executor>,
    config: SessionConfig,
    board: Rc<RefCell<B>>,
    replies: ReplySlots,
    deferred: DeferredError,
    lifecycle: Lifecycle,
    conn: RefCell<Option<Connection<B>>>,
    signals: RefCell<Option<Rc<LinkSignals>>>,
    selected_device: RefCell<Option<String>>,
}

/// Cloneable handle to one board session.
pub struct DeviceSession<B: Board + 'static> {
    inner: Rc<SessionInner<B>>,
}

impl<B: Board + 'static> Clone for DeviceSession<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Board + 'static> DeviceSession<B> {
    pub fn new(board: B, config: SessionConfig) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                executor: Rc::new(Executor::new()),
                config,
                board: Rc::new(RefCell::new(board)),
                replies: ReplySlots::new(),
                deferred: DeferredError::new(),
                lifecycle: Lifecycle::new(),
                conn: RefCell::new(None),
                signals: RefCell::new(None),
                selected_device: RefCell::new(None),
            }),
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.current()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lifecycle.is(SessionState::Ready)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn selected_device(&self) -> Option<String> {
        self.inner.selected_device.borrow().clone()
    }

    /// Firmware identity from the last successful handshake.
    pub fn firmware(&self) -> Option<FirmwareInfo> {
        self.inner
            .conn
            .borrow()
            .as_ref()
            .map(|c| c.dispatcher.handler().firmware().clone())
    }

    /// Failure recorded by background work, waiting for the next action.
    pub fn pending_error(&self) -> &DeferredError {
        &self.inner.deferred
    }

    pub fn keep_alive_active(&self) -> bool {
        self.inner
            .conn
            .borrow()
            .as_ref()
            .is_some_and(|c| c.keep_alive.is_some())
    }

    /// Run `fut` to completion while driving every session task.
    pub fn block_on<F>(&self, fut: F) -> F::Output
    where
        F: Future,
        F::Output: 'static,
    {
        executor::block_on(&self.inner.executor, fut)
    }

    // ── Actions ───────────────────────────────────────────────

    fn dispatcher(&self) -> Option<SessionDispatcher<B>> {
        if !self.is_ready() {
            return None;
        }
        self.inner
            .conn
            .borrow()
            .as_ref()
            .map(|c| c.dispatcher.clone())
    }

    /// Queue `action` and wait for its result.
    pub async fn submit(&self, action: Action) -> ActionResult<ActionOutput> {
        let Some(dispatcher) = self.dispatcher() else {
            return Err(ActionError::new(
                ErrorKind::NoDevice,
                format!("{}: no session open", action.name()),
            ));
        };
        dispatcher.submit(action).await
    }

    /// Decode a JSON action object and submit it.  Decoding failures are
    /// `UNKNOWN_ACTION` and never reach the board.
    pub async fn submit_json(&self, json: &str) -> ActionResult<ActionOutput> {
        let action = Action::from_json(json)?;
        self.submit(action).await
    }

    /// Fail the in-flight action as `TERMINATED` and drop the queue.
    pub fn reset(&self) {
        if let Some(d) = self.inner.conn.borrow().as_ref().map(|c| c.dispatcher.clone()) {
            d.reset();
        }
    }

    // ── Open ──────────────────────────────────────────────────

    /// Open the link to `device` and bring the session to `READY`.
    pub async fn open(&self, device: &DeviceDescriptor) -> ActionResult<()> {
        let inner = &self.inner;
        if !inner.lifecycle.is(SessionState::Closed) {
            return Err(ActionError::new(
                ErrorKind::HandshakeFailure,
                format!("open: session is {}", self.state()),
            ));
        }
        inner.lifecycle.transition(SessionState::Opening);
        info!("open {} ({})", device.name, device.link);

        let inbox = event_inbox();
        let opened = inner.board.borrow_mut().open(device, inbox.clone());
        if let Err(e) = opened {
            warn!("open {}: {:#}", device.name, e);
            inner.lifecycle.transition(SessionState::Closed);
            return Err(ActionError::transport(ErrorKind::NoDevice, "open", &e));
        }
        *inner.selected_device.borrow_mut() = Some(device.name.clone());

        let signals = Rc::new(LinkSignals::new());
        inner
            .executor
            .spawn(pump(Rc::downgrade(inner), inbox, inner.replies.clone(), signals.clone()))
            .detach();
        *inner.signals.borrow_mut() = Some(signals.clone());
        inner.lifecycle.transition(SessionState::Handshaking);

        match self.establish(&signals).await {
            Ok(firmware) => {
                inner.lifecycle.transition(SessionState::Ready);
                self.start_keep_alive();
                info!("session ready: {} ({})", device.name, firmware.name);
                Ok(())
            }
            Err(err) => {
                warn!("open {} failed: {}", device.name, err);
                let cleanup = if signals.is_lost() {
                    self.terminate()
                } else {
                    self.shutdown()
                };
                if let Err(e) = cleanup {
                    debug!("open cleanup: {}", e);
                }
                Err(err)
            }
        }
    }

    /// PIN entry, handshake, dispatcher start and board init.
    async fn establish(&self, signals: &LinkSignals) -> ActionResult<FirmwareInfo> {
        let inner = &self.inner;
        self.enter_pin()?;
        let firmware = self.handshake(&signals.lost).await?;
        info!(
            "firmware {} (protocol {}.{})",
            firmware.name, firmware.major, firmware.minor
        );

        let link = BoardLink {
            board: inner.board.clone(),
            replies: inner.replies.clone(),
            executor: inner.executor.clone(),
            deferred: inner.deferred.clone(),
        };
        let service = ActionService::new(
            link,
            firmware.clone(),
            self.selected_device(),
            inner.config.dcmotor_correction,
        );
        let dispatcher = Dispatcher::new(service, inner.config.action_timeout(), inner.deferred.clone());
        let driver = inner.executor.spawn(dispatcher.clone().run());
        *inner.conn.borrow_mut() = Some(Connection {
            dispatcher: dispatcher.clone(),
            driver,
            keep_alive: None,
        });

        dispatcher.submit(Action::BoardInit).await?;
        if signals.is_lost() {
            return Err(ActionError::new(ErrorKind::HandshakeFailure, "link lost during open"));
        }
        Ok(firmware)
    }

    fn enter_pin(&self) -> ActionResult<()> {
        let entry = self.inner.config.pin_entry;
        if entry == PinEntry::Null {
            return Ok(());
        }
        debug!("pin entry {:?}", entry);
        let frame = codec::pin_code(entry.code())
            .map_err(|e| ActionError::new(ErrorKind::PinVerifyFailure, format!("pin entry: {e}")))?;
        self.inner
            .board
            .borrow_mut()
            .write(&frame)
            .map_err(|e| ActionError::transport(ErrorKind::WriteError, "pin entry", &e))
    }

    async fn handshake(&self, lost: &Signal<NoopRawMutex, ()>) -> ActionResult<FirmwareInfo> {
        let inner = &self.inner;
        let required = inner.config.required_major_version;
        let version_reply = inner.replies.register(ReplyKey::Version)?;
        let firmware_reply = inner.replies.register(ReplyKey::Firmware)?;
        query_identity(&mut *inner.board.borrow_mut())
            .map_err(|e| ActionError::transport(ErrorKind::HandshakeFailure, "handshake", &e))?;

        let version = Cell::new(None::<(u8, u8)>);
        let exchange = async {
            if let Reply::Version { major, minor } = version_reply.recv().await {
                version.set(Some((major, minor)));
            }
            match firmware_reply.recv().await {
                Reply::Firmware(info) => Ok(info),
                other => Err(ActionError::new(
                    ErrorKind::HandshakeFailure,
                    format!("handshake: unexpected reply {other:?}"),
                )),
            }
        };
        let link_lost = async {
            lost.wait().await;
            Err(ActionError::new(ErrorKind::HandshakeFailure, "link lost during handshake"))
        };

        let outcome = with_timeout(inner.config.handshake_timeout(), future::or(exchange, link_lost)).await;
        let mismatch = || {
            version
                .get()
                .filter(|&(major, _)| major != 0 && major != required)
                .map(|(major, minor)| {
                    ActionError::new(
                        ErrorKind::VersionMismatch,
                        format!("firmware protocol {major}.{minor}, need {required}.x"),
                    )
                })
        };

        match outcome {
            Err(_) => Err(mismatch().unwrap_or_else(|| {
                ActionError::new(
                    ErrorKind::HandshakeTimeout,
                    format!("no firmware report within {}ms", inner.config.handshake_timeout_ms),
                )
            })),
            Ok(Err(err)) => Err(err),
            Ok(Ok(info)) if info.name.is_empty() => Err(ActionError::new(
                ErrorKind::PinVerifyFailure,
                "firmware name missing, PIN rejected",
            )),
            Ok(Ok(info)) => match mismatch() {
                Some(err) => Err(err),
                None => Ok(info),
            },
        }
    }

    // ── Keep-alive ────────────────────────────────────────────

    fn start_keep_alive(&self) {
        let interval = self.inner.config.keep_alive_interval();
        let task = self
            .inner
            .executor
            .spawn(keep_alive(Rc::downgrade(&self.inner), interval));
        if let Some(conn) = self.inner.conn.borrow_mut().as_mut() {
            conn.keep_alive = Some(task);
        }
    }

    /// Stop the keep-alive timer.  The session stays open.
    pub fn clear_keep_alive(&self) {
        let task = self
            .inner
            .conn
            .borrow_mut()
            .as_mut()
            .and_then(|c| c.keep_alive.take());
        if task.is_some() {
            debug!("keep-alive cleared");
        }
    }

    /// One keep-alive tick.  Returns `false` once the session is gone.
    fn keep_alive_tick(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        if self.dispatcher().is_some_and(|d| d.is_busy()) {
            debug!("keep-alive: action in flight, skipped");
            return true;
        }
        let sent = self.inner.board.borrow_mut().query_version();
        if let Err(e) = sent {
            warn!("keep-alive: {:#}", e);
            self.inner
                .deferred
                .record(ActionError::transport(ErrorKind::WriteError, "keep-alive", &e));
        }
        true
    }

    // ── Close / terminate ─────────────────────────────────────

    /// Orderly close.  Safe to call on a closed session.
    pub fn close(&self) -> ActionResult<()> {
        self.shutdown()
    }

    /// Tear the link down after a fault, then close.
    pub fn terminate(&self) -> ActionResult<()> {
        let lc = &self.inner.lifecycle;
        if lc.is(SessionState::Closed) {
            return Ok(());
        }
        if lc.is(SessionState::Ready) || lc.is(SessionState::Handshaking) {
            lc.transition(SessionState::Terminating);
        }
        let terminated = self.inner.board.borrow_mut().terminate();
        if let Err(e) = terminated {
            warn!("terminate: {:#}", e);
        }
        self.shutdown()
    }

    fn shutdown(&self) -> ActionResult<()> {
        let inner = &self.inner;
        if inner.lifecycle.is(SessionState::Closed) {
            debug!("close: already closed");
            return Ok(());
        }
        if !inner.lifecycle.is(SessionState::Closing) {
            inner.lifecycle.transition(SessionState::Closing);
        }

        self.clear_keep_alive();
        let conn = inner.conn.borrow_mut().take();
        if let Some(conn) = conn {
            conn.dispatcher.handler().stop_melody();
            conn.dispatcher.reset();
            drop(conn.driver);
        }
        let signals = inner.signals.borrow_mut().take();
        if let Some(signals) = signals {
            signals.stop.signal(());
        }
        inner.replies.clear();
        if let Some(err) = inner.deferred.take() {
            debug!("close: discarding deferred error {}", err);
        }
        inner.selected_device.borrow_mut().take();

        let closed = inner.board.borrow_mut().close();
        inner.lifecycle.transition(SessionState::Closed);
        closed.map_err(|e| {
            warn!("close: {:#}", e);
            ActionError::transport(ErrorKind::WriteError, "close", &e)
        })
    }
}

fn query_identity<B: Board>(board: &mut B) -> anyhow::Result<()> {
    board.query_version()?;
    board.query_firmware()
}

// ── Background tasks ──────────────────────────────────────────

/// Route inbox events to reply slots; fatal link events terminate.
async fn pump<B: Board + 'static>(
    session: Weak<SessionInner<B>>,
    inbox: EventInbox,
    replies: ReplySlots,
    signals: Rc<LinkSignals>,
) {
    loop {
        let next = future::or(async { Some(inbox.receive().await) }, async {
            signals.stop.wait().await;
            None
        })
        .await;
        let Some(event) = next else {
            debug!("event pump stopped");
            return;
        };
        let Some(lifecycle) = route_event(&replies, event) else {
            continue;
        };

        let fatal = match &lifecycle {
            BoardEvent::Disconnect => true,
            BoardEvent::Error(e) | BoardEvent::Close(e) => e.is_some(),
            _ => false,
        };
        if !fatal {
            debug!("link event ignored: {:?}", lifecycle);
            continue;
        }
        let Some(inner) = session.upgrade() else {
            return;
        };
        let handle = DeviceSession { inner };
        warn!("link event {:?} in {}", lifecycle, handle.state());
        match handle.state() {
            SessionState::Handshaking => signals.mark_lost(),
            SessionState::Ready => {
                if let Err(e) = handle.terminate() {
                    debug!("terminate: {}", e);
                }
                return;
            }
            _ => {}
        }
    }
}

/// Periodic version query while the session lives.
async fn keep_alive<B: Board + 'static>(session: Weak<SessionInner<B>>, interval: Duration) {
    loop {
        Timer::after(interval).await;
        let Some(inner) = session.upgrade() else {
            debug!("keep-alive: session dropped");
            return;
        };
        let handle = DeviceSession { inner };
        if !handle.keep_alive_tick() {
            debug!("keep-alive: stop");
            return;
        }
    }
}
