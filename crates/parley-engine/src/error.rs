use std::time::Duration;

use parley_core::errors::{LlmError, NotifyError, StoreError};
use parley_core::ids::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("language model error: {0}")]
    Llm(#[from] LlmError),

    #[error("notify error: {0}")]
    Notify(#[from] NotifyError),

    /// Compaction could not bring the prompt under budget. Not retriable.
    #[error("insufficient context budget for session {session_id}")]
    ContextBudgetExhausted { session_id: SessionId },

    #[error("upstream stream ended abnormally: {0}")]
    UpstreamFinish(String),

    #[error("turn cancelled by caller")]
    Cancelled,

    #[error("turn deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("summarizer returned no text")]
    EmptySummary,
}

impl EngineError {
    /// Caller-initiated cancellation. Everything else finalizes as `failed`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_caller_cancel_is_cancellation() {
        assert!(EngineError::Cancelled.is_cancellation());
        assert!(!EngineError::DeadlineExceeded(Duration::from_secs(180)).is_cancellation());
        assert!(!EngineError::Llm(LlmError::Cancelled).is_cancellation());
        assert!(!EngineError::UpstreamFinish("length".into()).is_cancellation());
    }

    #[test]
    fn exhausted_display_names_session() {
        let err = EngineError::ContextBudgetExhausted { session_id: SessionId::from_raw("sess_9") };
        assert_eq!(err.to_string(), "insufficient context budget for session sess_9");
    }

    #[test]
    fn store_error_converts() {
        let err: EngineError = StoreError::NotFound("message msg_1".into()).into();
        assert!(matches!(err, EngineError::Store(StoreError::NotFound(_))));
    }
}
