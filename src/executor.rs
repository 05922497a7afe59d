//! Single-threaded session runtime.
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │  futures_lite::future::block_on                          │
//!  │  ┌───────────────────┐   or   ┌────────────────────────┐ │
//!  │  │ caller future     │◀──────▶│ LocalExecutor::run     │ │
//!  │  │ (open / submit)   │        │  dispatcher driver     │ │
//!  │  └───────────────────┘        │  event pump            │ │
//!  │                               │  keep-alive / melody   │ │
//!  │                               └────────────────────────┘ │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Background tasks only make progress while some caller is blocked in
//! [`block_on`]; timers come from the `embassy-time` std driver.

use core::future::Future;

use edge_executor::LocalExecutor;
use futures_lite::future;

/// Executor shared by one session and all of its background tasks.
pub type Executor = LocalExecutor<'static, 64>;

/// Spawned background task; dropping it cancels the task.
pub type Task<T> = edge_executor::Task<T>;

/// Drive `fut` to completion on the current thread while also running
/// every task spawned on `executor`.
pub fn block_on<F>(executor: &Executor, fut: F) -> F::Output
where
    F: Future,
    F::Output: 'static,
{
    future::block_on(future::or(fut, executor.run(future::pending())))
}
