pub mod budget;
pub mod mock;
pub mod moderation;

pub use budget::TokenBudget;
pub use mock::{MockModel, MockQuery, MockStream};
pub use moderation::{ModeratedModel, ModerationConfig};
