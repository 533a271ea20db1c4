use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::infrastructure::memory::MemoryConfig;
use crate::infrastructure::resilience::{CircuitBreakerConfig, RetryPolicy};

pub const CONFIG_PATH_ENV: &str = "AGENT_KIT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: BreakerConfig,
    pub memory: MemorySettings,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            timeout_seconds: 60,
        }
    }
}

/// Behavior of the chat agent: persona, context window and guardrails.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub id: String,
    pub instructions: Vec<String>,
    pub num_history_messages: usize,
    pub max_input_length: usize,
    pub enable_guardrails: bool,
    pub cache_responses: bool,
    pub refusal_message: String,
    pub fallback_message: String,
}

impl AgentConfig {
    pub fn system_prompt(&self) -> String {
        self.instructions.join("\n")
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: "assistant".to_string(),
            instructions: vec![
                "You are a friendly and helpful virtual assistant.".to_string(),
                "Keep answers concise (2-4 sentences).".to_string(),
                "Never invent product, price or feature information.".to_string(),
            ],
            num_history_messages: 10,
            max_input_length: 2000,
            enable_guardrails: true,
            cache_responses: true,
            refusal_message: "Sorry, I can't share sensitive information. How else can I help?"
                .to_string(),
            fallback_message:
                "Sorry, something went wrong while processing your message. Please try again."
                    .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: Option<u64>,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_delay_ms),
            self.backoff_factor,
        );
        match self.max_delay_ms {
            Some(ms) => policy.with_max_delay(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_seconds: u64,
}

impl BreakerConfig {
    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub max_history: usize,
    pub ttl_minutes: u64,
    pub sweep_interval_seconds: u64,
}

impl MemorySettings {
    pub fn memory(&self) -> MemoryConfig {
        MemoryConfig {
            max_history: self.max_history,
            ttl: Duration::from_secs(self.ttl_minutes.saturating_mul(60)),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_history: 20,
            ttl_minutes: 30,
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    /// Loads the file named by `AGENT_KIT_CONFIG` (or the default path),
    /// falling back to built-in defaults when it does not exist, then
    /// applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

        let mut config = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            tracing::info!(path, "config file not found, using defaults");
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry
            .policy()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0
        {
            return Err(ConfigError::Invalid(
                "circuit breaker thresholds must be at least 1".into(),
            ));
        }
        if self.memory.max_history < 2 {
            return Err(ConfigError::Invalid(
                "memory.max_history must hold at least one interaction".into(),
            ));
        }
        if self.agent.max_input_length == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_input_length must be positive".into(),
            ));
        }
        Ok(())
    }
}
