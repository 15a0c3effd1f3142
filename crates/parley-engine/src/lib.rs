pub mod assistant;
pub mod context;
pub mod error;
pub mod prompts;
pub mod summarizer;
pub mod turn;

#[cfg(test)]
mod test_support;

pub use assistant::{Assistant, EngineDeps};
pub use context::{ContextBuilder, ContextConfig, HistoryMode};
pub use error::EngineError;
pub use summarizer::Summarizer;
pub use turn::{TurnConfig, TurnOrchestrator, TurnOutcome};
