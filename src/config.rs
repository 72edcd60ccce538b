use std::path::PathBuf;
use std::time::Duration;

use crate::probe::DEFAULT_CONNECT_TIMEOUT;
use crate::sandbox::{DEFAULT_INTERPRETER, DEFAULT_SCRIPT_NAME, DEFAULT_TIMEOUT};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Dashboard origin allowed by CORS in addition to localhost.
    pub allowed_origin: String,
    /// Set via LINKHUB_DB_TIMEOUT_SECS. Default: 5.
    pub db_connect_timeout: Duration,
    /// Set via LINKHUB_EXEC_TIMEOUT_SECS. Default: 30.
    pub exec_timeout: Duration,
    pub interpreter: PathBuf,
    pub script_name: String,
    pub sandbox_root: Option<PathBuf>,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            allowed_origin: "http://localhost:3000".into(),
            db_connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            exec_timeout: DEFAULT_TIMEOUT,
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            script_name: DEFAULT_SCRIPT_NAME.into(),
            sandbox_root: None,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Ok(from_lookup(|key| std::env::var(key).ok()))
}

/// Builds a config from any key lookup; unparseable values fall back to defaults.
pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Config {
    let defaults = Config::default();
    let secs = |key: &str, default: Duration| {
        get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(default)
    };

    Config {
        port: get("LINKHUB_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        allowed_origin: get("LINKHUB_ALLOWED_ORIGIN").unwrap_or(defaults.allowed_origin),
        db_connect_timeout: secs("LINKHUB_DB_TIMEOUT_SECS", defaults.db_connect_timeout),
        exec_timeout: secs("LINKHUB_EXEC_TIMEOUT_SECS", defaults.exec_timeout),
        interpreter: get("LINKHUB_INTERPRETER")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.interpreter),
        script_name: get("LINKHUB_SCRIPT_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.script_name),
        sandbox_root: get("LINKHUB_SANDBOX_ROOT")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from),
        max_body_bytes: get("LINKHUB_MAX_BODY_BYTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_body_bytes),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let cfg = from_lookup(lookup(&[]));
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.db_connect_timeout, Duration::from_secs(5));
        assert_eq!(cfg.exec_timeout, Duration::from_secs(30));
        assert_eq!(cfg.interpreter, PathBuf::from("python3"));
        assert_eq!(cfg.script_name, "main.py");
        assert!(cfg.sandbox_root.is_none());
    }

    #[test]
    fn test_overrides_applied() {
        let cfg = from_lookup(lookup(&[
            ("LINKHUB_PORT", "8080"),
            ("LINKHUB_EXEC_TIMEOUT_SECS", "5"),
            ("LINKHUB_INTERPRETER", "/usr/bin/python3.12"),
            ("LINKHUB_SANDBOX_ROOT", "/var/tmp/linkhub"),
        ]));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.exec_timeout, Duration::from_secs(5));
        assert_eq!(cfg.interpreter, PathBuf::from("/usr/bin/python3.12"));
        assert_eq!(cfg.sandbox_root, Some(PathBuf::from("/var/tmp/linkhub")));
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let cfg = from_lookup(lookup(&[
            ("LINKHUB_PORT", "not-a-port"),
            ("LINKHUB_DB_TIMEOUT_SECS", "0"),
            ("LINKHUB_MAX_BODY_BYTES", "-1"),
        ]));
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.db_connect_timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_body_bytes, 2 * 1024 * 1024);
    }
}
