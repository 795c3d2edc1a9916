//! One-shot completion latch.
//!
//! The upload controller may hit several terminal events for one request
//! (file accepted, bad MIME type, a second file, framing error, end of
//! stream). Only the first may decide the HTTP response; the latch records
//! that decision and turns every later attempt into a no-op.

use imgconv_core::{ConversionResult, ConvertError};
use tokio::sync::oneshot;
use tracing::debug;

/// How a request was settled.
#[derive(Debug)]
pub enum Settlement {
    /// A file was accepted; headers are committed and the body streams.
    Converted(ConversionResult),
    /// The request failed before any output was committed.
    Failed(ConvertError),
}

impl Settlement {
    fn label(&self) -> &'static str {
        match self {
            Settlement::Converted(_) => "converted",
            Settlement::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    Settled,
}

/// Sending half, owned by the upload controller.
#[derive(Debug)]
pub struct CompletionLatch {
    state: CompletionState,
    tx: Option<oneshot::Sender<Settlement>>,
}

impl CompletionLatch {
    /// Create a latch and the receiver the handler awaits.
    pub fn new() -> (Self, oneshot::Receiver<Settlement>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                state: CompletionState::Pending,
                tx: Some(tx),
            },
            rx,
        )
    }

    pub fn state(&self) -> CompletionState {
        self.state
    }

    pub fn is_settled(&self) -> bool {
        self.state == CompletionState::Settled
    }

    /// Settle the request. Returns `false`, and drops `outcome`, if it was
    /// already settled.
    pub fn settle(&mut self, outcome: Settlement) -> bool {
        if self.state == CompletionState::Settled {
            debug!(outcome = outcome.label(), "latch already settled; event absorbed");
            return false;
        }
        self.state = CompletionState::Settled;
        if let Some(tx) = self.tx.take() {
            if tx.send(outcome).is_err() {
                debug!("request handler gone before settlement");
            }
        }
        true
    }
}
