//! Flash programming over vendor frames.
//!
//! Flow: erase → N × write (≤ 50 escaped bytes each) → finish
//!
//! Each stage writes one frame, claims its own reply slot and fails with
//! its own error kind.  The first failing stage aborts the rest; there is
//! no partial success.  The image is byte-stuffed once, up front, and
//! progress counts escaped bytes.

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use log::{debug, info, warn};

use super::channels::{Reply, ReplyKey, ReplySlots};
use super::codec::{self, FLASH_CHUNK};
use super::dispatcher::ActionContext;
use super::transport::Transport;
use crate::error::{ActionError, ActionResult, ErrorKind};

// ── Stages ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStage {
    Erase,
    Write,
    Finish,
}

impl FlashStage {
    pub fn error_kind(self) -> ErrorKind {
        match self {
            Self::Erase => ErrorKind::FlashEraseFailure,
            Self::Write => ErrorKind::FlashWriteFailure,
            Self::Finish => ErrorKind::FlashFinishFailure,
        }
    }

    pub fn reply_key(self) -> ReplyKey {
        match self {
            Self::Erase => ReplyKey::FlashErase,
            Self::Write => ReplyKey::FlashWrite,
            Self::Finish => ReplyKey::FlashFinish,
        }
    }
}

impl fmt::Display for FlashStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase => write!(f, "flash-erase"),
            Self::Write => write!(f, "flash-write"),
            Self::Finish => write!(f, "flash-finish"),
        }
    }
}

// ── Progress ──────────────────────────────────────────────────

/// Escaped bytes sent so far out of the escaped image length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashProgress {
    pub written: usize,
    pub total: usize,
}

/// Caller-supplied progress callback.
#[derive(Clone)]
pub struct ProgressFn(Rc<dyn Fn(FlashProgress)>);

impl ProgressFn {
    pub fn new(f: impl Fn(FlashProgress) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn report(&self, progress: FlashProgress) {
        (self.0)(progress);
    }
}

impl fmt::Debug for ProgressFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressFn")
    }
}

// ── Writer ────────────────────────────────────────────────────

/// Runs the flash sequence against a borrowed link.
pub struct FlashWriter<'a, T: Transport + ?Sized> {
    transport: &'a RefCell<T>,
    replies: &'a ReplySlots,
}

impl<'a, T: Transport + ?Sized> FlashWriter<'a, T> {
    pub fn new(transport: &'a RefCell<T>, replies: &'a ReplySlots) -> Self {
        Self { transport, replies }
    }

    /// Program `image`.  The action timeout is restarted before every
    /// chunk so the whole image fits in one action.
    pub async fn program(
        &self,
        image: &[u8],
        cx: &ActionContext,
        progress: Option<&ProgressFn>,
    ) -> ActionResult<FlashProgress> {
        let escaped = codec::escape(image);
        let total = escaped.len();
        info!("flash: {} bytes ({} escaped)", image.len(), total);

        let erase = codec::flash_erase().map_err(|e| codec_failure(FlashStage::Erase, e))?;
        self.stage(FlashStage::Erase, &erase).await?;

        let mut written = 0;
        for chunk in escaped.chunks(FLASH_CHUNK) {
            cx.extend_timeout();
            let frame = codec::flash_write(chunk).map_err(|e| codec_failure(FlashStage::Write, e))?;
            self.stage(FlashStage::Write, &frame).await?;
            written += chunk.len();
            debug!("flash: {}/{}", written, total);
            if let Some(progress) = progress {
                progress.report(FlashProgress { written, total });
            }
        }

        let finish = codec::flash_finish().map_err(|e| codec_failure(FlashStage::Finish, e))?;
        self.stage(FlashStage::Finish, &finish).await?;

        info!("flash: complete");
        Ok(FlashProgress { written, total })
    }

    async fn stage(&self, stage: FlashStage, frame: &[u8]) -> ActionResult<()> {
        let pending = self.replies.register(stage.reply_key())?;
        self.transport
            .borrow_mut()
            .write(frame)
            .map_err(|e| ActionError::transport(stage.error_kind(), &stage.to_string(), &e))?;

        match pending.recv().await {
            Reply::Flash { status: 0 } => Ok(()),
            Reply::Flash { status } => {
                warn!("{}: board status {}", stage, status);
                Err(ActionError::new(
                    stage.error_kind(),
                    format!("{stage}: board status {status}"),
                ))
            }
            other => Err(ActionError::new(
                stage.error_kind(),
                format!("{stage}: unexpected reply {other:?}"),
            )),
        }
    }
}

fn codec_failure(stage: FlashStage, err: codec::CodecError) -> ActionError {
    ActionError::new(stage.error_kind(), format!("{stage}: {err}"))
}
