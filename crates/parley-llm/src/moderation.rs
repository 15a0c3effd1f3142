//! Safety layer over any [`LanguageModel`].
//!
//! The streamed text is accumulated as it passes through. Once the
//! accumulated answer matches a rule, the wrapper emits a single intercepted
//! delta carrying a canned replacement and ends the stream.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use parley_core::errors::LlmError;
use parley_core::messages::PromptEntry;
use parley_core::provider::{LanguageModel, ModelRequest};
use parley_core::stream::{DeltaStream, StreamDelta};

const DEFAULT_ANSWER: &str = "Let's talk about something else.";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Regular expressions matched against the accumulated answer.
    pub patterns: Vec<String>,
    /// Replacement answers; one is picked at random per interception.
    pub answers: Vec<String>,
}

struct Guard {
    rules: Vec<Regex>,
    answers: Vec<String>,
}

impl Guard {
    fn matches(&self, text: &str) -> bool {
        self.rules.iter().any(|r| r.is_match(text))
    }

    fn pick_answer(&self) -> String {
        self.answers
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ANSWER.to_string())
    }
}

pub struct ModeratedModel<M: LanguageModel> {
    inner: M,
    guard: Arc<Guard>,
}

impl<M: LanguageModel> ModeratedModel<M> {
    pub fn new(inner: M, config: ModerationConfig) -> Result<Self, regex::Error> {
        let rules = config
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            inner,
            guard: Arc::new(Guard { rules, answers: config.answers }),
        })
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }
}

struct Moderated {
    inner: DeltaStream,
    accumulated: String,
    guard: Arc<Guard>,
    finished: bool,
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for ModeratedModel<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn query(&self, request: &ModelRequest) -> Result<Vec<String>, LlmError> {
        let texts = self.inner.query(request).await?;
        Ok(texts
            .into_iter()
            .map(|t| {
                if self.guard.matches(&t) {
                    warn!(model = self.inner.name(), "blocking answer intercepted");
                    self.guard.pick_answer()
                } else {
                    t
                }
            })
            .collect())
    }

    async fn query_stream(&self, request: &ModelRequest) -> Result<DeltaStream, LlmError> {
        let state = Moderated {
            inner: self.inner.query_stream(request).await?,
            accumulated: String::new(),
            guard: self.guard.clone(),
            finished: false,
        };

        let moderated = stream::unfold(state, |mut st| async move {
            if st.finished {
                return None;
            }
            match st.inner.next().await? {
                Err(e) => {
                    st.finished = true;
                    Some((Err(e), st))
                }
                Ok(delta) => {
                    st.accumulated.push_str(&delta.text);
                    if st.guard.matches(&st.accumulated) {
                        warn!(chars = st.accumulated.chars().count(), "streamed answer intercepted");
                        st.finished = true;
                        let replacement = StreamDelta::intercepted(st.guard.pick_answer());
                        Some((Ok(replacement), st))
                    } else {
                        Some((Ok(delta), st))
                    }
                }
            }
        });
        Ok(Box::pin(moderated))
    }

    fn is_over_token_budget(&self, entries: &[PromptEntry]) -> bool {
        self.inner.is_over_token_budget(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockModel, MockQuery, MockStream};

    fn config() -> ModerationConfig {
        ModerationConfig {
            patterns: vec![r"(?i)forbidden\s+topic".into()],
            answers: vec!["I can't discuss that.".into()],
        }
    }

    async fn drain(mut s: DeltaStream) -> Vec<StreamDelta> {
        let mut out = Vec::new();
        while let Some(item) = s.next().await {
            out.push(item.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn clean_stream_passes_through() {
        let mock = MockModel::new().with_streams(vec![MockStream::text_chunks(&["hello", " world"])]);
        let model = ModeratedModel::new(mock, config()).unwrap();
        let out = drain(model.query_stream(&ModelRequest::default()).await.unwrap()).await;
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|d| !d.intercepted));
    }

    #[tokio::test]
    async fn match_across_chunks_intercepts_and_ends() {
        let mock = MockModel::new().with_streams(vec![MockStream::text_chunks(&[
            "about the Forbidden",
            " topic you asked",
            " and more",
        ])]);
        let model = ModeratedModel::new(mock, config()).unwrap();
        let out = drain(model.query_stream(&ModelRequest::default()).await.unwrap()).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "about the Forbidden");
        assert!(out[1].intercepted);
        assert_eq!(out[1].text, "I can't discuss that.");
    }

    #[tokio::test]
    async fn empty_answer_list_uses_default() {
        let mock = MockModel::new().with_streams(vec![MockStream::text_chunks(&["forbidden topic"])]);
        let cfg = ModerationConfig { answers: vec![], ..config() };
        let model = ModeratedModel::new(mock, cfg).unwrap();
        let out = drain(model.query_stream(&ModelRequest::default()).await.unwrap()).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, DEFAULT_ANSWER);
    }

    #[tokio::test]
    async fn blocking_query_is_replaced() {
        let mock = MockModel::new().with_queries(vec![MockQuery::Texts(vec![
            "fine".into(),
            "a forbidden topic".into(),
        ])]);
        let model = ModeratedModel::new(mock, config()).unwrap();
        let out = model.query(&ModelRequest::default()).await.unwrap();
        assert_eq!(out, vec!["fine", "I can't discuss that."]);
    }

    #[test]
    fn invalid_pattern_rejected() {
        let cfg = ModerationConfig { patterns: vec!["(unclosed".into()], answers: vec![] };
        assert!(ModeratedModel::new(MockModel::new(), cfg).is_err());
    }

    #[test]
    fn delegates_budget() {
        let model = ModeratedModel::new(MockModel::new(), config()).unwrap();
        assert!(!model.is_over_token_budget(&[PromptEntry::user("x")]));
        assert_eq!(model.name(), "mock");
    }
}
