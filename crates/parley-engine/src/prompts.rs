/// Summarization instruction used when none is configured.
pub const DEFAULT_SUMMARY_PROMPT: &str = "Summarize the conversation so far into a compact \
note that preserves names, facts, decisions, open questions and the user's goals. \
Write it in the language the conversation uses. Do not add anything that was not said.";

/// Text stored and published when a turn fails.
pub const ASSISTANT_FAILED_MESSAGE: &str =
    "Sorry，the assistant could not answer this time. Please try again later.";

/// Prefixes of stored failure text. Such messages never enter a prompt.
const ERROR_MARKERS: [&str; 2] = ["Sorry，", "抱歉，"];

pub fn is_error_message(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || ERROR_MARKERS.iter().any(|m| text.starts_with(m))
}

/// Folds a summary into the system entry.
pub fn append_summary(base_prompt: &str, summary: &str) -> String {
    format!(
        "{base_prompt}, You will continue the conversation with understanding the context. \
         The following is the context for conversation: {{ {summary} }}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_text_is_an_error_marker() {
        assert!(is_error_message(ASSISTANT_FAILED_MESSAGE));
    }

    #[test]
    fn markers_and_blank() {
        assert!(is_error_message(""));
        assert!(is_error_message("   "));
        assert!(is_error_message("抱歉，服务繁忙"));
        assert!(!is_error_message("Sorry, my mistake, here it is"));
        assert!(!is_error_message("hello"));
    }

    #[test]
    fn summary_is_appended_in_braces() {
        let s = append_summary("be brief", "they like tea");
        assert!(s.starts_with("be brief, You will continue"));
        assert!(s.ends_with("{ they like tea }"));
    }
}
