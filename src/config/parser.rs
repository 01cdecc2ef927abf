use super::ConfigError;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use url::Url;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub green_api: GreenApiConfig,
    #[serde(default)]
    pub deepseek: DeepSeekConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on every admin route.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub secret_key: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            secret_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DbType {
        let url = self.connection_string();
        if url.starts_with("sqlite://") {
            DbType::Sqlite
        } else {
            DbType::Postgres
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        if let DbType::Sqlite = self.db_type() {
            let url = self.connection_string();
            Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
        } else {
            None
        }
    }

    pub fn max_connections(&self) -> u32 {
        match self.db_type() {
            DbType::Postgres => self.max_connections.unwrap_or(10),
            DbType::Sqlite => 1,
        }
    }

    pub fn min_connections(&self) -> u32 {
        match self.db_type() {
            DbType::Postgres => self.min_connections.unwrap_or(1),
            DbType::Sqlite => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Dead letters are kept in memory when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_dlq_max_entries")]
    pub dlq_max_entries: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_redis_prefix(),
            dlq_max_entries: default_dlq_max_entries(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GreenApiConfig {
    #[serde(default = "default_green_api_url")]
    pub api_url: String,
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub webhook_token: Option<SecretString>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GreenApiConfig {
    fn default() -> Self {
        Self {
            api_url: default_green_api_url(),
            webhook_token: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeepSeekConfig {
    #[serde(default = "default_deepseek_url")]
    pub api_url: String,
    /// Sentiment and replies always use the fallbacks when unset.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_deepseek_model")]
    pub model: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            api_url: default_deepseek_url(),
            api_key: None,
            model: default_deepseek_model(),
            timeout_secs: default_http_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub green_api: DependencyPolicy,
    #[serde(default)]
    pub deepseek: DependencyPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencyPolicy {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            open_duration_secs: default_open_duration_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Scores at or below this value flag the message for staff attention.
    #[serde(default = "default_negative_threshold")]
    pub negative_sentiment_threshold: f64,
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
    #[serde(default)]
    pub auto_reply: bool,
    #[serde(default = "default_reply_context_messages")]
    pub reply_context_messages: i64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            negative_sentiment_threshold: default_negative_threshold(),
            fallback_reply: default_fallback_reply(),
            auto_reply: false,
            reply_context_messages: default_reply_context_messages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_scheduler_interval_secs")]
    pub interval_secs: u64,
    /// How long after its due time a time-based trigger may still fire.
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_secs: default_scheduler_interval_secs(),
            grace_minutes: default_grace_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_health_cache_ttl_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Config {
    /// A missing file is not an error; the service can be configured from the
    /// environment alone.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(err) => return Err(err.into()),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.connection_string().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.port must be between 1 and 65535".to_string(),
            ));
        }

        if self.server.secret_key.is_none() {
            return Err(ConfigError::InvalidConfig(
                "server.secret_key (SECRET_KEY) must be set".to_string(),
            ));
        }

        for (name, api_url) in [
            ("green_api.api_url", &self.green_api.api_url),
            ("deepseek.api_url", &self.deepseek.api_url),
        ] {
            let parsed = Url::parse(api_url)
                .map_err(|e| ConfigError::InvalidConfig(format!("{name} is not a valid URL: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be an http(s) URL"
                )));
            }
        }

        for (name, policy) in [
            ("green_api", &self.resilience.green_api),
            ("deepseek", &self.resilience.deepseek),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "resilience.{name}.max_attempts must be at least 1"
                )));
            }
            if policy.failure_threshold == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "resilience.{name}.failure_threshold must be at least 1"
                )));
            }
            if policy.base_delay_ms > policy.max_delay_ms {
                return Err(ConfigError::InvalidConfig(format!(
                    "resilience.{name}.base_delay_ms cannot exceed max_delay_ms"
                )));
            }
        }

        if !(-1.0..=1.0).contains(&self.bot.negative_sentiment_threshold) {
            return Err(ConfigError::InvalidConfig(
                "bot.negative_sentiment_threshold must be within [-1, 1]".to_string(),
            ));
        }

        if self.dispatcher.concurrency == 0 || self.dispatcher.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "dispatcher.concurrency and dispatcher.queue_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("DATABASE_URL") {
            self.database.url = Some(value);
        }
        if let Ok(value) = std::env::var("REDIS_URL") {
            self.redis.url = Some(value);
        }
        if let Ok(value) = std::env::var("GREEN_API_URL") {
            self.green_api.api_url = value;
        }
        if let Ok(value) = std::env::var("GREEN_API_WEBHOOK_TOKEN") {
            self.green_api.webhook_token = Some(value.into());
        }
        if let Ok(value) = std::env::var("DEEPSEEK_API_KEY") {
            self.deepseek.api_key = Some(value.into());
        }
        if let Ok(value) = std::env::var("DEEPSEEK_API_URL") {
            self.deepseek.api_url = value;
        }
        if let Ok(value) = std::env::var("DEEPSEEK_MODEL") {
            self.deepseek.model = value;
        }
        if let Ok(value) = std::env::var("SECRET_KEY") {
            self.server.secret_key = Some(value.into());
        }
        if let Ok(value) = std::env::var("BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(value) = std::env::var("LOG_LEVEL") {
            self.logging.level = value;
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()).map(SecretString::from))
}

fn default_port() -> u16 {
    8000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_redis_prefix() -> String {
    "hotelbot".to_string()
}

fn default_dlq_max_entries() -> usize {
    10_000
}

fn default_green_api_url() -> String {
    "https://api.green-api.com".to_string()
}

fn default_deepseek_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_deepseek_model() -> String {
    "deepseek-chat".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.3
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_failure_window_secs() -> u64 {
    60
}

fn default_open_duration_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter() -> bool {
    true
}

fn default_negative_threshold() -> f64 {
    -0.3
}

fn default_fallback_reply() -> String {
    "Thank you for your message! Our team will get back to you shortly.".to_string()
}

fn default_reply_context_messages() -> i64 {
    10
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_concurrency() -> usize {
    8
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_scheduler_interval_secs() -> u64 {
    60
}

fn default_grace_minutes() -> i64 {
    180
}

fn default_health_cache_ttl_secs() -> u64 {
    5
}

fn default_probe_timeout_ms() -> u64 {
    2000
}
