pub mod hub;
pub mod server;
pub mod socket;

pub use hub::TopicHub;
pub use server::{start, ServerConfig, ServerHandle};
