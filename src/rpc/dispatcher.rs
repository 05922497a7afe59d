//! Action dispatcher: the single gate between callers and the board.
//!
//! **Handler-decoupled**: the dispatcher knows nothing about boards or
//! frames.  It owns a FIFO of requests and runs them one at a time through
//! an [`ActionHandler`], racing each run against its timeout and against
//! `reset()`:
//!
//! ```text
//!  submit() ──▶ queue (FIFO) ──▶ driver task ──▶ or( handler.handle()
//!                                     ▲             , action timeout
//!                                     │             , reset abort )
//!                                     └── finish(id) ── completion ──▶ caller
//! ```
//!
//! Every dispatch passes through three gates:
//!
//! 1. **Deferred error**: a failure recorded by background work (melody,
//!    keep-alive) short-circuits the next dispatched action.
//! 2. **Timeout**: restarted, never accumulated, by
//!    [`ActionContext::extend_timeout`].
//! 3. **Panic boundary**: a handler panic becomes `EXCEPTION`; it never
//!    reaches the driver loop.
//!
//! Completions carry the sequence id they were started with.  A completion
//! whose id no longer matches the in-flight request (it raced a reset) is
//! dropped without touching state.

use core::cell::{Cell, RefCell};
use core::future::Future;
use core::panic::AssertUnwindSafe;
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use futures_lite::FutureExt;
use futures_lite::future;
use log::{debug, info, warn};

use crate::error::{ActionError, ActionResult, ErrorKind};

// ── Handler seam ──────────────────────────────────────────────

/// The work the dispatcher serialises.
#[allow(async_fn_in_trait)]
pub trait ActionHandler {
    type Request;
    type Output;

    /// Short label for logs and error details.
    fn name(request: &Self::Request) -> &'static str;

    /// Run one request.  Never invoked while another call is in flight.
    async fn handle(&self, request: Self::Request, cx: &ActionContext)
    -> ActionResult<Self::Output>;
}

/// Per-dispatch context handed to the handler.
pub struct ActionContext {
    timeout: Duration,
    deadline: Cell<Instant>,
}

/// `now + timeout`, pinned to the far future instead of overflowing.
fn deadline_after(timeout: Duration) -> Instant {
    Instant::now().checked_add(timeout).unwrap_or(Instant::MAX)
}

impl ActionContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Cell::new(deadline_after(timeout)),
        }
    }

    /// Restart the action timeout from now.
    pub fn extend_timeout(&self) {
        self.deadline.set(deadline_after(self.timeout));
    }

    pub fn deadline(&self) -> Instant {
        self.deadline.get()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves once the (possibly extended) deadline has passed.
    async fn expired(&self) {
        loop {
            Timer::at(self.deadline.get()).await;
            if Instant::now() >= self.deadline.get() {
                return;
            }
        }
    }
}

// ── Deferred error slot ───────────────────────────────────────

/// Single-slot buffer for failures produced outside the call/response
/// cycle.  Holds at most one error: the first one recorded wins and later
/// ones are logged and dropped until the slot is consumed.
#[derive(Clone, Default)]
pub struct DeferredError {
    slot: Rc<RefCell<Option<ActionError>>>,
}

impl DeferredError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `err` if the slot is empty.  Returns whether it was kept.
    pub fn record(&self, err: ActionError) -> bool {
        let mut slot = self.slot.borrow_mut();
        if let Some(held) = slot.as_ref() {
            warn!("deferred error dropped ({}), slot holds {}", err, held);
            return false;
        }
        debug!("deferred error recorded: {}", err);
        *slot = Some(err);
        true
    }

    pub fn take(&self) -> Option<ActionError> {
        self.slot.borrow_mut().take()
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

// ── Dispatcher state ──────────────────────────────────────────

type Completion<O> = Rc<Signal<NoopRawMutex, ActionResult<O>>>;

struct Queued<R, O> {
    id: u64,
    name: &'static str,
    request: R,
    done: Completion<O>,
}

struct InFlight<O> {
    id: u64,
    name: &'static str,
    done: Completion<O>,
}

struct DispatcherState<R, O> {
    queue: VecDeque<Queued<R, O>>,
    current: Option<InFlight<O>>,
    next_id: u64,
    /// Set by `reset()` until the driver has dropped the aborted handler.
    resetting: bool,
}

struct Shared<H: ActionHandler> {
    handler: H,
    state: RefCell<DispatcherState<H::Request, H::Output>>,
    wake: Signal<NoopRawMutex, ()>,
    abort: Signal<NoopRawMutex, ()>,
    pending_error: DeferredError,
    timeout: Duration,
}

/// Cheap cloneable handle; all clones drive the same queue.
pub struct Dispatcher<H: ActionHandler> {
    shared: Rc<Shared<H>>,
}

impl<H: ActionHandler> Clone for Dispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<H: ActionHandler> Dispatcher<H> {
    pub fn new(handler: H, timeout: Duration, pending_error: DeferredError) -> Self {
        Self {
            shared: Rc::new(Shared {
                handler,
                state: RefCell::new(DispatcherState {
                    queue: VecDeque::new(),
                    current: None,
                    next_id: 0,
                    resetting: false,
                }),
                wake: Signal::new(),
                abort: Signal::new(),
                pending_error,
                timeout,
            }),
        }
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    pub fn pending_error(&self) -> &DeferredError {
        &self.shared.pending_error
    }

    /// An action is in flight or queued.
    pub fn is_busy(&self) -> bool {
        let st = self.shared.state.borrow();
        st.current.is_some() || !st.queue.is_empty()
    }

    pub fn is_resetting(&self) -> bool {
        self.shared.state.borrow().resetting
    }

    /// Sequence id of the in-flight request.
    pub fn current_id(&self) -> Option<u64> {
        self.shared.state.borrow().current.as_ref().map(|c| c.id)
    }

    /// Queue `request`.  The request is enqueued immediately; the returned
    /// future only waits for its completion.
    pub fn submit(
        &self,
        request: H::Request,
    ) -> impl Future<Output = ActionResult<H::Output>> + use<H> {
        let done: Completion<H::Output> = Rc::new(Signal::new());
        let name = H::name(&request);
        {
            let mut st = self.shared.state.borrow_mut();
            let id = st.next_id;
            st.next_id += 1;
            debug!("submit #{} {}", id, name);
            st.queue.push_back(Queued {
                id,
                name,
                request,
                done: done.clone(),
            });
        }
        self.shared.wake.signal(());
        async move { done.wait().await }
    }

    /// Complete request `id`.  Returns `false` (and changes nothing) when
    /// `id` is not the in-flight request.
    pub fn finish(&self, id: u64, result: ActionResult<H::Output>) -> bool {
        let current = {
            let mut st = self.shared.state.borrow_mut();
            if st.current.as_ref().is_some_and(|c| c.id == id) {
                st.current.take()
            } else {
                None
            }
        };
        let Some(current) = current else {
            debug!("stale completion #{} dropped", id);
            return false;
        };
        match &result {
            Ok(_) => debug!("#{} {} done", current.id, current.name),
            Err(e) => debug!("#{} {} failed: {}", current.id, current.name, e),
        }
        current.done.signal(result);
        self.shared.wake.signal(());
        true
    }

    /// Fail the in-flight action with `TERMINATED` and cancel everything
    /// queued behind it.  Bytes already written are not retracted.
    pub fn reset(&self) {
        let (current, cancelled) = {
            let mut st = self.shared.state.borrow_mut();
            let current = st.current.take();
            st.resetting = current.is_some();
            let cancelled: Vec<_> = st.queue.drain(..).collect();
            (current, cancelled)
        };

        if let Some(c) = current {
            info!("reset: terminating #{} {}", c.id, c.name);
            c.done
                .signal(Err(ActionError::terminated(format!("{} terminated by reset", c.name))));
            self.shared.abort.signal(());
        }
        for q in cancelled {
            debug!("reset: cancelling #{} {}", q.id, q.name);
            q.done
                .signal(Err(ActionError::terminated(format!("{} cancelled by reset", q.name))));
        }
    }

    /// Driver loop.  Spawn exactly one per dispatcher.
    pub async fn run(self) {
        debug!("dispatcher driver started");
        loop {
            let Some((id, name, request)) = self.begin_next() else {
                self.shared.wake.wait().await;
                continue;
            };
            self.dispatch(id, name, request).await;
            self.shared.state.borrow_mut().resetting = false;
            // Let completions reach their callers before the next action.
            future::yield_now().await;
        }
    }

    fn begin_next(&self) -> Option<(u64, &'static str, H::Request)> {
        let mut st = self.shared.state.borrow_mut();
        if st.current.is_some() {
            return None;
        }
        let next = st.queue.pop_front()?;
        st.current = Some(InFlight {
            id: next.id,
            name: next.name,
            done: next.done,
        });
        self.shared.abort.reset();
        Some((next.id, next.name, next.request))
    }

    async fn dispatch(&self, id: u64, name: &'static str, request: H::Request) {
        if let Some(err) = self.shared.pending_error.take() {
            warn!("#{} {} short-circuited by deferred error: {}", id, name, err);
            self.finish(id, Err(err));
            return;
        }

        let cx = ActionContext::new(self.shared.timeout);
        let handler = async {
            match AssertUnwindSafe(self.shared.handler.handle(request, &cx))
                .catch_unwind()
                .await
            {
                Ok(result) => Some(result),
                Err(panic) => {
                    warn!("#{} {} panicked", id, name);
                    Some(Err(ActionError::exception(&*panic)))
                }
            }
        };
        let timeout = async {
            cx.expired().await;
            warn!("#{} {} timed out", id, name);
            Some(Err(ActionError::new(
                ErrorKind::ActionTimeout,
                format!("{name} timed out"),
            )))
        };
        let abort = async {
            self.shared.abort.wait().await;
            None
        };

        match future::or(handler, future::or(timeout, abort)).await {
            Some(result) => {
                self.finish(id, result);
            }
            None => debug!("#{} {} aborted", id, name),
        }
    }
}
