//! Process configuration, loaded once from the environment at startup.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::substrate::PublicKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// This ledger's own identity: recognises the first recipient tag as
    /// the subscription target.
    pub nostr_public_key: PublicKey,
    /// The sole identity authorised to mint/burn.
    pub minter_public_key: PublicKey,
    pub nostr_relays: Vec<String>,
    pub database_url: String,
    pub port: u16,
    pub max_retries: u32,
    pub republish_interval: Duration,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads and validates configuration from the process environment.
    /// Fails fast: any missing required variable or malformed optional one
    /// is a startup error, never a silent default substitution.
    pub fn from_env() -> Result<Self, ConfigError> {
        let nostr_public_key = PublicKey(required("NOSTR_PUBLIC_KEY")?);
        let minter_public_key = PublicKey(required("MINTER_PUBLIC_KEY")?);
        let database_url = required("DATABASE_URL")?;

        let relays_raw = required("NOSTR_RELAYS")?;
        let nostr_relays: Vec<String> = relays_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if nostr_relays.is_empty() {
            return Err(ConfigError::Invalid {
                name: "NOSTR_RELAYS",
                reason: "must contain at least one relay endpoint".into(),
            });
        }

        let port = optional_parsed("PORT", 8080)?;
        let max_retries = optional_parsed("MAX_RETRIES", 10)?;
        let republish_interval_ms: u64 = optional_parsed("REPUBLISH_INTERVAL_MS", 1000)?;

        let log_format = match env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(v) if v.eq_ignore_ascii_case("text") => LogFormat::Text,
            Ok(v) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    reason: format!("expected \"text\" or \"json\", got \"{v}\""),
                });
            }
            Err(_) => LogFormat::Text,
        };

        Ok(Config {
            nostr_public_key,
            minter_public_key,
            nostr_relays,
            database_url,
            port,
            max_retries,
            republish_interval: Duration::from_millis(republish_interval_ms),
            log_format,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn optional_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("\"{v}\" is not a valid value"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutate process-wide environment variables, so they must not
    // interleave with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "NOSTR_PUBLIC_KEY",
            "MINTER_PUBLIC_KEY",
            "NOSTR_RELAYS",
            "DATABASE_URL",
            "PORT",
            "MAX_RETRIES",
            "REPUBLISH_INTERVAL_MS",
            "LOG_FORMAT",
        ] {
            unsafe { env::remove_var(key) };
        }
    }

    fn set_required() {
        unsafe {
            env::set_var("NOSTR_PUBLIC_KEY", "ledger-pk");
            env::set_var("MINTER_PUBLIC_KEY", "minter-pk");
            env::set_var("NOSTR_RELAYS", "wss://a.example, wss://b.example");
            env::set_var("DATABASE_URL", "postgres://localhost/ledger");
        }
    }

    #[test]
    fn loads_defaults_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_required();

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.republish_interval, Duration::from_millis(1000));
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.nostr_relays, vec!["wss://a.example", "wss://b.example"]);
    }

    #[test]
    fn rejects_missing_required_var() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_required();
        unsafe { env::remove_var("DATABASE_URL") };

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn rejects_malformed_port() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_required();
        unsafe { env::set_var("PORT", "not-a-number") };

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }
}
