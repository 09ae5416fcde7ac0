//! Services: the chat step loop, feedback learning/recall, the reward
//! judge, and the backward pipeline.

mod backward;
mod chat;
mod feedback;
mod reward;

pub use backward::{BackwardRequest, BackwardResponse, BackwardService};
pub use chat::{ChatService, ChatTurnRequest, ChatTurnResponse, ResultType};
pub use feedback::{FeedbackRecall, FeedbackService};
pub use reward::{RewardResult, RewardService};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Cooperative cancellation handle for one turn.
///
/// The chat loop checks the flag at every suspension point; a turn
/// cancelled after some actions completed leaves those side effects in
/// place but never appends the partial step to memory.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a flag in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`Error::Cancelled`] when cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
