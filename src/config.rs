pub use self::parser::{
    BotConfig, Config, DatabaseConfig, DbType, DeepSeekConfig, DependencyPolicy,
    DispatcherConfig, GreenApiConfig, HealthConfig, LoggingConfig, RedisConfig,
    ResilienceConfig, SchedulerConfig, ServerConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
