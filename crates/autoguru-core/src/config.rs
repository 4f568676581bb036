//! Layered configuration loader and path helpers.
//!
//! Merges `config.toml` + `config.<env>.toml` + `APP_*` env vars with Figment.
//! Sections are extracted on demand with [`Config::get`], so each crate owns
//! the typed shape of its own section.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const DEFAULT_LOG_LEVEL: &str = "info";

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            other => {
                return Err(Error::InvalidConfig(format!(
                    "unknown RUST_ENV '{other}' (expected dev, prod or test)"
                )))
            }
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        let sources: Vec<String> = figment.metadata().map(|m| m.name.to_string()).collect();
        tracing::debug!(env = env_name, ?sources, "configuration loaded");
        Ok(Self::from_figment(figment).with_env_name(env_name))
    }

    /// Wraps an already assembled Figment, e.g. one built in a test.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment, env_name: "custom".to_string() }
    }

    fn with_env_name(mut self, env_name: &str) -> Self {
        self.env_name = env_name.to_string();
        self
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Like [`Config::get`], but a missing key yields `T::default()`.
    pub fn get_or_default<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if self.figment.find_value(key).is_err() {
            return Ok(T::default());
        }
        self.get(key)
    }

    /// `log_level`, defaulting to `info` when absent. A value that is not a
    /// string is an error.
    pub fn log_level(&self) -> Result<String> {
        if self.figment.find_value("log_level").is_err() {
            return Ok(DEFAULT_LOG_LEVEL.to_string());
        }
        self.get("log_level")
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
