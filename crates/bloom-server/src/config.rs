//! Configuration management

use bloom_ingest::config::StoreConfig;
use std::time::Duration;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default agent executable.
pub const DEFAULT_AGENT_PROGRAM: &str = "python";

/// Default arguments placed before the session flag.
pub const DEFAULT_AGENT_ARGS: &str = "voice_agent.py";

/// Default flag carrying the session id.
pub const DEFAULT_AGENT_SESSION_FLAG: &str = "--chat_id";

/// Variables the agent cannot run without.
pub const DEFAULT_AGENT_REQUIRED_ENV: &str = "DEEPGRAM_API_KEY";

/// Default time between SIGTERM and SIGKILL.
pub const DEFAULT_AGENT_GRACE_SECS: u64 = 5;

/// Default collection recording started sessions.
pub const DEFAULT_CHATS_COLLECTION: &str = "chats";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub chats_collection: String,
    pub store: StoreConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// How to launch the agent process
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub program: String,
    pub args: Vec<String>,
    pub session_flag: String,
    /// Checked before every start
    pub required_env: Vec<String>,
    pub grace_period: Duration,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("BLOOM_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: parse_env("BLOOM_PORT", DEFAULT_SERVER_PORT)?,
                shutdown_timeout_secs: parse_env(
                    "BLOOM_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                )?,
            },
            agent: AgentConfig {
                program: std::env::var("BLOOM_AGENT_PROGRAM")
                    .unwrap_or_else(|_| DEFAULT_AGENT_PROGRAM.to_string()),
                args: split_words(
                    &std::env::var("BLOOM_AGENT_ARGS").unwrap_or_else(|_| DEFAULT_AGENT_ARGS.to_string()),
                ),
                session_flag: std::env::var("BLOOM_AGENT_SESSION_FLAG")
                    .unwrap_or_else(|_| DEFAULT_AGENT_SESSION_FLAG.to_string()),
                required_env: split_list(
                    &std::env::var("BLOOM_AGENT_REQUIRED_ENV")
                        .unwrap_or_else(|_| DEFAULT_AGENT_REQUIRED_ENV.to_string()),
                ),
                grace_period: Duration::from_secs(parse_env(
                    "BLOOM_AGENT_GRACE_SECS",
                    DEFAULT_AGENT_GRACE_SECS,
                )?),
            },
            chats_collection: std::env::var("BLOOM_CHATS_COLLECTION")
                .unwrap_or_else(|_| DEFAULT_CHATS_COLLECTION.to_string()),
            store: StoreConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.agent.program.trim().is_empty() {
            anyhow::bail!("Agent program cannot be empty");
        }

        if self.agent.session_flag.trim().is_empty() {
            anyhow::bail!("Agent session flag cannot be empty");
        }

        if self.chats_collection.trim().is_empty() || self.chats_collection.contains('/') {
            anyhow::bail!("Chats collection must be a non-empty id without '/'");
        }

        if self.agent.grace_period.is_zero() {
            tracing::warn!("Agent grace period is 0 - agents will be killed without waiting");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            agent: AgentConfig::default(),
            chats_collection: DEFAULT_CHATS_COLLECTION.to_string(),
            store: StoreConfig::Memory,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_AGENT_PROGRAM.to_string(),
            args: split_words(DEFAULT_AGENT_ARGS),
            session_flag: DEFAULT_AGENT_SESSION_FLAG.to_string(),
            required_env: split_list(DEFAULT_AGENT_REQUIRED_ENV),
            grace_period: Duration::from_secs(DEFAULT_AGENT_GRACE_SECS),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

fn split_words(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
