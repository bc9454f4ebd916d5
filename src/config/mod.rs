//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

use crate::allocation::MAX_PARTICIPANTS;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::identity::IdentityPolicy;
use secrecy::SecretString;
use std::path::PathBuf;

const DEFAULT_DESCRIPTION: &str = "Reading circle";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Whether callers without an authenticated identity may use a display name.
    pub identity_policy: IdentityPolicy,
    /// TOML catalog replacing the built-in resources.
    pub catalog_path: Option<PathBuf>,
    /// Used when a session is created without a description.
    pub default_description: String,
    /// Largest participant count a session may have.
    pub max_participants: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            identity_policy: identity_policy_from_env()?,
            catalog_path: catalog_path_from_env(),
            default_description: std::env::var("CIRCLE_DEFAULT_DESCRIPTION")
                .ok()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            max_participants: max_participants_from_env()?,
        })
    }

    /// The configured catalog, or the built-in one.
    pub fn load_catalog(&self) -> Result<Catalog> {
        match &self.catalog_path {
            Some(path) => Catalog::load(path),
            None => Ok(Catalog::builtin()),
        }
    }
}

/// `CIRCLE_CATALOG`, for callers that need the catalog without a database.
pub fn catalog_path_from_env() -> Option<PathBuf> {
    std::env::var_os("CIRCLE_CATALOG").map(PathBuf::from)
}

fn identity_policy_from_env() -> Result<IdentityPolicy> {
    let Ok(raw) = std::env::var("CIRCLE_ALLOW_GUEST_NAMES") else {
        return Ok(IdentityPolicy::default());
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(IdentityPolicy::AllowGuestNames),
        "0" | "false" | "no" | "off" => Ok(IdentityPolicy::RequireAuthenticated),
        other => Err(Error::Config(format!(
            "CIRCLE_ALLOW_GUEST_NAMES must be a boolean, got {other:?}"
        ))),
    }
}

fn max_participants_from_env() -> Result<u32> {
    let Ok(raw) = std::env::var("CIRCLE_MAX_PARTICIPANTS") else {
        return Ok(MAX_PARTICIPANTS);
    };
    match raw.trim().parse::<u32>() {
        Ok(n) if (1..=MAX_PARTICIPANTS).contains(&n) => Ok(n),
        _ => Err(Error::Config(format!(
            "CIRCLE_MAX_PARTICIPANTS must be between 1 and {MAX_PARTICIPANTS}, got {raw:?}"
        ))),
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
