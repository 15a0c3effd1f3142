pub mod database;
pub mod error;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod sequencer;
pub mod summaries;

pub use database::Database;
pub use messages::MessageRepo;
pub use sequencer::SequenceRepo;
pub use summaries::SummaryRepo;
