//! BLE module reset with bounded retry.
//!
//! ```text
//!   attempt 1 ── bts01-reset ──✔──▶ done
//!                    │✘
//!                    ▼
//!            close ─▶ delay ─▶ open ─▶ attempt 2 … attempt N ──✘──▶ last error
//! ```
//!
//! Runs outside the dispatcher: each attempt is an ordinary submission,
//! and the close/reopen between attempts goes through the session.

use embassy_time::Timer;
use log::{info, warn};

use super::DeviceSession;
use crate::app::actions::{Action, CommandBytes};
use crate::app::events::ActionOutput;
use crate::app::ports::Board;
use crate::error::ActionResult;
use crate::rpc::transport::DeviceDescriptor;

impl<B: Board + 'static> DeviceSession<B> {
    /// Send `bts01-reset`, reopening the session between failed attempts.
    /// Gives up after `ble_reset_attempts` tries with the last error.
    pub async fn reset_ble_module(
        &self,
        device: &DeviceDescriptor,
        timeout: Option<u16>,
        command: CommandBytes,
    ) -> ActionResult<ActionOutput> {
        let attempts = self.config().ble_reset_attempts.max(1);
        let delay = self.config().ble_retry_delay();

        let mut attempt = 1;
        loop {
            let result = self
                .submit(Action::Bts01Reset {
                    timeout,
                    command: command.clone(),
                })
                .await;
            match result {
                Ok(out) => {
                    info!("bts01-reset: ok on attempt {}/{}", attempt, attempts);
                    return Ok(out);
                }
                Err(err) if attempt >= attempts => {
                    warn!("bts01-reset: giving up after {} attempts: {}", attempts, err);
                    return Err(err);
                }
                Err(err) => warn!("bts01-reset: attempt {}/{} failed: {}", attempt, attempts, err),
            }

            attempt += 1;
            if let Err(e) = self.close() {
                warn!("bts01-reset: close before retry: {}", e);
            }
            Timer::after(delay).await;
            self.open(device).await?;
        }
    }
}
