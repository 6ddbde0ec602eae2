use std::env;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    redis: RedisSettings,
    session: SessionSettings,
    telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: u16,
    pub password: String,
}

/// Knobs for the attempt session store. The defaults are the contract:
/// one-week TTL, three update attempts, 50ms/100ms backoff between them.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl_seconds: u64,
    pub update_max_attempts: u32,
    pub update_backoff_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let ttl_seconds =
            parse_u64("SESSION_TTL_SECONDS", env_or_default("SESSION_TTL_SECONDS", "604800"))?;
        let update_max_attempts = parse_u32(
            "SESSION_UPDATE_MAX_ATTEMPTS",
            env_or_default("SESSION_UPDATE_MAX_ATTEMPTS", "3"),
        )?;
        let update_backoff_ms = parse_u64(
            "SESSION_UPDATE_BACKOFF_MS",
            env_or_default("SESSION_UPDATE_BACKOFF_MS", "50"),
        )?;

        let log_level = env_or_default("ATTEMPTS_LOG_LEVEL", "info");
        let json =
            env_optional("ATTEMPTS_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            session: SessionSettings { ttl_seconds, update_max_attempts, update_backoff_ms },
            telemetry: TelemetrySettings { log_level, json },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub fn session(&self) -> &SessionSettings {
        &self.session
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SESSION_TTL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.session.update_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SESSION_UPDATE_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

impl RedisSettings {
    pub fn redis_url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}
