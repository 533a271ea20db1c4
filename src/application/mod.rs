//! Application layer - Use cases and orchestration.
//!
//! Services here combine domain rules with the infrastructure components
//! (cache, memory, retry, circuit breaker) and depend on domain ports
//! rather than concrete model clients.

pub mod services;

pub use services::{ChatReply, ChatService, ChatStats, ReplyMetadata};
