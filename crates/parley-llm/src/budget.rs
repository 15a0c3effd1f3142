use parley_core::messages::PromptEntry;
use parley_core::settings::LlmSettings;

/// Per-entry framing overhead.
const ENTRY_OVERHEAD: usize = 4;

/// Estimate token count for text content.
/// Approximation: bytes / 4.
pub fn estimate_text_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

pub fn estimate_entries_tokens(entries: &[PromptEntry]) -> usize {
    entries
        .iter()
        .map(|e| ENTRY_OVERHEAD + estimate_text_tokens(&e.content))
        .sum()
}

/// Prompt budget of a model: its window minus what is kept for the answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenBudget {
    pub context_window: usize,
    pub reserved_output: usize,
}

impl TokenBudget {
    pub fn new(context_window: usize, reserved_output: usize) -> Self {
        Self { context_window, reserved_output }
    }

    pub fn prompt_limit(&self) -> usize {
        self.context_window.saturating_sub(self.reserved_output)
    }

    pub fn is_over(&self, entries: &[PromptEntry]) -> bool {
        estimate_entries_tokens(entries) > self.prompt_limit()
    }
}

impl From<&LlmSettings> for TokenBudget {
    fn from(s: &LlmSettings) -> Self {
        Self::new(s.context_window, s.reserved_output_tokens)
    }
}
