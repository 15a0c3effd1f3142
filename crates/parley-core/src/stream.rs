use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::LlmError;

/// The only finish reason that counts as a clean end of stream.
pub const FINISH_STOP: &str = "stop";

/// One increment of a streamed answer.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Set when a safety layer replaced the answer. `text` is then the whole
    /// replacement, not an increment.
    #[serde(default)]
    pub intercepted: bool,
}

impl StreamDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }

    pub fn stop() -> Self {
        Self { finish_reason: Some(FINISH_STOP.into()), ..Default::default() }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self { finish_reason: Some(reason.into()), ..Default::default() }
    }

    pub fn intercepted(text: impl Into<String>) -> Self {
        Self { text: text.into(), finish_reason: None, intercepted: true }
    }

    /// The finish reason when it signals an upstream failure: anything
    /// non-empty other than `"stop"`.
    pub fn abnormal_finish(&self) -> Option<&str> {
        match self.finish_reason.as_deref() {
            None | Some("") | Some(FINISH_STOP) => None,
            Some(other) => Some(other),
        }
    }
}

/// Lazy, finite, non-restartable sequence of deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, LlmError>> + Send>>;
