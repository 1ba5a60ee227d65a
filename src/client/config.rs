use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub realtime_url: String,
    pub redis_url: String,
    pub request_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub auth_timeout: Duration,
    pub log_level: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; values that fail to parse fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| -> u64 {
            lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };

        Self {
            api_base_url: lookup("API_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:5000/api".to_string())
                .trim_end_matches('/')
                .to_string(),
            realtime_url: lookup("REALTIME_URL").unwrap_or_else(|| "ws://127.0.0.1:5001/socket".to_string()),
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            request_timeout: Duration::from_secs(number("REQUEST_TIMEOUT_SECS", 10)),
            reconnect_attempts: lookup("RECONNECT_ATTEMPTS")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(5),
            reconnect_delay: Duration::from_millis(number("RECONNECT_DELAY_MS", 1000)),
            reconnect_max_delay: Duration::from_millis(number("RECONNECT_MAX_DELAY_MS", 30_000)),
            auth_timeout: Duration::from_secs(number("AUTH_TIMEOUT_SECS", 20)),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.api_base_url, "http://127.0.0.1:5000/api");
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.reconnect_attempts, 5);
        assert_eq!(cfg.reconnect_delay, Duration::from_millis(1000));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let vars: HashMap<&str, &str> = [
            ("API_BASE_URL", "https://school.example.com/api/"),
            ("RECONNECT_ATTEMPTS", "8"),
            ("REQUEST_TIMEOUT_SECS", "soon"),
        ]
        .into_iter()
        .collect();
        let cfg = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.api_base_url, "https://school.example.com/api");
        assert_eq!(cfg.reconnect_attempts, 8);
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn reconnect_attempts_out_of_range_use_default() {
        for raw in ["4294967301", "-1"] {
            let cfg = ClientConfig::from_lookup(|k| (k == "RECONNECT_ATTEMPTS").then(|| raw.to_string()));
            assert_eq!(cfg.reconnect_attempts, 5, "value {}", raw);
        }
        let cfg = ClientConfig::from_lookup(|k| (k == "RECONNECT_ATTEMPTS").then(|| u32::MAX.to_string()));
        assert_eq!(cfg.reconnect_attempts, u32::MAX);
    }
}
