//! Layered settings.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `PARLEY_*` environment overrides (highest priority)

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// An environment override that failed to parse or was out of range. Loading
/// runs before logging is set up, so callers report these afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgnoredEnvVar {
    pub key: &'static str,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleySettings {
    pub context: ContextSettings,
    pub turn: TurnSettings,
    pub llm: LlmSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Raw history length above which compaction kicks in.
    pub max_history_messages: usize,
    /// Newest survivors never fed to the summarizer.
    pub protected_tail: usize,
    /// Summarization instruction. `None` uses the built-in one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_prompt: Option<String>,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self { max_history_messages: 20, protected_tail: 3, summary_prompt: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnSettings {
    pub deadline_secs: u64,
    pub finalize_timeout_secs: u64,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self { deadline_secs: 180, finalize_timeout_secs: 5 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub context_window: usize,
    pub reserved_output_tokens: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self { context_window: 8192, reserved_output_tokens: 1024 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Per-topic broadcast buffer. Slow subscribers past this lag drop events.
    pub max_send_queue: usize,
    pub heartbeat_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8090,
            max_send_queue: 256,
            heartbeat_secs: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".into(), json: false }
    }
}

impl ParleySettings {
    /// Defaults, then `path` (when present), then env overrides. Also returns
    /// the env overrides that were ignored.
    pub fn load(path: Option<&Path>) -> Result<(Self, Vec<IgnoredEnvVar>), SettingsError> {
        let defaults = serde_json::to_value(Self::default())?;

        let merged = match path {
            Some(p) if p.exists() => {
                debug!(path = ?p, "loading settings from file");
                let content = std::fs::read_to_string(p)?;
                let user: Value = serde_json::from_str(&content)?;
                deep_merge(defaults, user)
            }
            Some(p) => {
                debug!(path = ?p, "settings file not found, using defaults");
                defaults
            }
            None => defaults,
        };

        let mut settings: Self = serde_json::from_value(merged)?;
        let ignored = apply_env_overrides(&mut settings);
        settings.validate()?;
        Ok((settings, ignored))
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.context.protected_tail == 0 {
            return Err(SettingsError::InvalidValue("context.protected_tail must be > 0".into()));
        }
        if self.llm.reserved_output_tokens >= self.llm.context_window {
            return Err(SettingsError::InvalidValue(format!(
                "llm.reserved_output_tokens ({}) must be below llm.context_window ({})",
                self.llm.reserved_output_tokens, self.llm.context_window
            )));
        }
        if self.turn.deadline_secs == 0 {
            return Err(SettingsError::InvalidValue("turn.deadline_secs must be > 0".into()));
        }
        if self.turn.finalize_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue("turn.finalize_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Objects merge per key, everything else is replaced, nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PARLEY_*` variables from the process environment.
pub fn apply_env_overrides(settings: &mut ParleySettings) -> Vec<IgnoredEnvVar> {
    apply_overrides_from(settings, |key| std::env::var(key).ok())
}

/// Invalid values are skipped and returned instead of applied.
pub fn apply_overrides_from(
    settings: &mut ParleySettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<IgnoredEnvVar> {
    let mut env = EnvReader { lookup, ignored: Vec::new() };
    if let Some(v) = env.parsed::<u16>("PARLEY_PORT", |p| *p > 0) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed::<u64>("PARLEY_TURN_DEADLINE_SECS", |s| (1..=3600).contains(s)) {
        settings.turn.deadline_secs = v;
    }
    if let Some(v) = env.string("PARLEY_SUMMARY_PROMPT") {
        settings.context.summary_prompt = Some(v);
    }
    env.ignored
}

/// Parse `val` and keep it only when `accept` holds.
pub fn parse_checked<T: std::str::FromStr>(val: &str, accept: impl Fn(&T) -> bool) -> Option<T> {
    val.trim().parse::<T>().ok().filter(|v| accept(v))
}

struct EnvReader<F> {
    lookup: F,
    ignored: Vec<IgnoredEnvVar>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn parsed<T: std::str::FromStr>(&mut self, key: &'static str, accept: impl Fn(&T) -> bool) -> Option<T> {
        let val = (self.lookup)(key)?;
        let result = parse_checked(&val, accept);
        if result.is_none() {
            self.ignored.push(IgnoredEnvVar { key, value: val });
        }
        result
    }
}
