use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection settings for the Redis instance holding hash counters.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedisConfig {
    /// Host on which Redis is running (default: 127.0.0.1).
    #[serde(default = "default_redis_host")]
    pub host: String,
    /// Port on which Redis is running (default: 6379).
    #[serde(default = "default_redis_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Prefix prepended, with a `:`, to every counter key.
    pub namespace: Option<String>,
}

impl RedisConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";

    pub const DEFAULT_PORT: u16 = 6379;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::invalid("redis.host", "must not be empty"));
        }

        if let Some(namespace) = &self.namespace
            && namespace.contains(':')
        {
            return Err(ValidationError::invalid(
                "redis.namespace",
                "must not contain `:`",
            ));
        }

        Ok(())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            username: None,
            password: None,
            namespace: None,
        }
    }
}

fn default_redis_host() -> String {
    RedisConfig::DEFAULT_HOST.to_string()
}

fn default_redis_port() -> u16 {
    RedisConfig::DEFAULT_PORT
}
