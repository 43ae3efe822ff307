//! Gateway configuration, read once from the environment at startup.
//!
//! # Required variables
//! - `TWITTER_CONSUMER_KEY` / `TWITTER_CONSUMER_SECRET`
//! - `TWITTER_ACCESS_TOKEN` / `TWITTER_ACCESS_TOKEN_SECRET`
//!
//! # Optional variables
//! - `DEBUG` (bool, default `false`)
//! - `PORT` (u16, default `8000`)
//! - `TWITTER_LANGUAGES` (comma-separated, default `en`)
//!
//! Secret values are never logged; [`Config`]'s `Debug` output elides them.

use std::fmt;

use crate::oauth::Credentials;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Validated gateway configuration.
#[derive(Clone)]
pub struct Config {
    pub debug: bool,
    pub port: u16,
    /// Languages an event must carry to pass the event filter.
    pub languages: Vec<String>,
    pub credentials: Credentials,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Split out from
    /// [`Config::from_env`] so tests do not have to mutate process-global
    /// environment state.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let debug = match lookup("DEBUG") {
            None => false,
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "DEBUG",
                message: format!("expected a boolean, got {raw:?}"),
            })?,
        };

        let port = match lookup("PORT") {
            None => 8000,
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid {
                key: "PORT",
                message: format!("{e}"),
            })?,
        };

        let languages = parse_list(lookup("TWITTER_LANGUAGES").as_deref().unwrap_or("en"));
        if languages.is_empty() {
            return Err(ConfigError::Invalid {
                key: "TWITTER_LANGUAGES",
                message: "at least one language is required".to_owned(),
            });
        }

        let required = |key: &'static str| -> Result<String, ConfigError> {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
                _ => Err(ConfigError::Missing(key)),
            }
        };

        let credentials = Credentials {
            consumer_key: required("TWITTER_CONSUMER_KEY")?,
            consumer_secret: required("TWITTER_CONSUMER_SECRET")?,
            access_token: required("TWITTER_ACCESS_TOKEN")?,
            access_token_secret: required("TWITTER_ACCESS_TOKEN_SECRET")?,
        };

        Ok(Config {
            debug,
            port,
            languages,
            credentials,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("debug", &self.debug)
            .field("port", &self.port)
            .field("languages", &self.languages)
            .field("credentials", &"<redacted>")
            .finish()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
