pub mod cache;
pub mod config;
pub mod llm;
pub mod memory;
pub mod resilience;

pub use cache::TtlCache;
pub use config::{AppConfig, ConfigError};
pub use llm::AnthropicLlm;
pub use memory::{ConversationMemory, MemoryConfig};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, RetryExecutor,
    RetryPolicy,
};
