use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use parley_hub::HubConfig;

/// Runtime configuration, resolved from `PARLEY_*` environment variables
/// with sensible defaults for local runs.
#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub auth_secret: Option<SecretString>,
    pub openai_api_key: Option<SecretString>,
    pub openai_base_url: Option<String>,
    pub model: String,
    pub max_context_messages: usize,
    pub max_connections_per_addr: usize,
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
    pub session_grace_secs: u64,
    pub responder_timeout_secs: u64,
    pub db_path: Option<PathBuf>,
    pub default_session_minutes: u32,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8940,
            auth_secret: None,
            openai_api_key: None,
            openai_base_url: None,
            model: "gpt-4o-mini".to_string(),
            max_context_messages: 15,
            max_connections_per_addr: 50,
            idle_timeout_secs: 300,
            reap_interval_secs: 60,
            session_grace_secs: 120,
            responder_timeout_secs: 60,
            db_path: None,
            default_session_minutes: 30,
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PARLEY_PORT", defaults.port),
            auth_secret: env_secret("PARLEY_AUTH_SECRET"),
            openai_api_key: env_secret("PARLEY_OPENAI_API_KEY"),
            openai_base_url: env_string("PARLEY_OPENAI_BASE_URL"),
            model: env_string("PARLEY_MODEL").unwrap_or(defaults.model),
            max_context_messages: env_parse(
                "PARLEY_MAX_CONTEXT_MESSAGES",
                defaults.max_context_messages,
            ),
            max_connections_per_addr: env_parse(
                "PARLEY_MAX_CONNECTIONS_PER_ADDR",
                defaults.max_connections_per_addr,
            ),
            idle_timeout_secs: env_parse("PARLEY_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            reap_interval_secs: env_parse(
                "PARLEY_REAP_INTERVAL_SECS",
                defaults.reap_interval_secs,
            ),
            session_grace_secs: env_parse(
                "PARLEY_SESSION_GRACE_SECS",
                defaults.session_grace_secs,
            ),
            responder_timeout_secs: env_parse(
                "PARLEY_RESPONDER_TIMEOUT_SECS",
                defaults.responder_timeout_secs,
            ),
            db_path: env_string("PARLEY_DB_PATH").map(PathBuf::from),
            default_session_minutes: env_parse(
                "PARLEY_DEFAULT_SESSION_MINUTES",
                defaults.default_session_minutes,
            ),
            log_json: env_parse("PARLEY_LOG_JSON", defaults.log_json),
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections_per_addr: self.max_connections_per_addr,
            max_context_messages: self.max_context_messages,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            session_grace: Duration::from_secs(self.session_grace_secs),
            default_session_minutes: self.default_session_minutes,
            ..HubConfig::default()
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn responder_timeout(&self) -> Duration {
        Duration::from_secs(self.responder_timeout_secs)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_secret(key: &str) -> Option<SecretString> {
    env_string(key).map(SecretString::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_string(key) {
        Some(raw) => raw.parse().unwrap_or(default),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.port, 8940);
        assert_eq!(config.max_context_messages, 15);
        assert_eq!(config.max_connections_per_addr, 50);
        assert_eq!(config.idle_timeout_secs, 300);
        assert_eq!(config.reap_interval_secs, 60);
        assert_eq!(config.session_grace_secs, 120);
        assert_eq!(config.default_session_minutes, 30);
        assert!(!config.log_json);
    }

    #[test]
    fn hub_config_carries_limits() {
        let config = Config {
            max_connections_per_addr: 7,
            session_grace_secs: 5,
            ..Config::default()
        };
        let hub = config.hub_config();
        assert_eq!(hub.max_connections_per_addr, 7);
        assert_eq!(hub.session_grace, Duration::from_secs(5));
    }
}
