// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Configuration loading and validation for the ops control plane.
//!
//! All settings arrive through the environment. Loading is strict about
//! malformed values and advisory about absent optional ones: a bad rate
//! limit is a [`ConfigError`], a missing vault key is a [`ConfigWarning`].

use std::fmt;

// ---------------------------------------------------------------------------
// Variable names
// ---------------------------------------------------------------------------

/// HEAD-probe URL template for artifact existence checks.
pub const ENV_ARTIFACT_STORAGE_HEAD_URL: &str = "ARTIFACT_STORAGE_HEAD_URL";
/// Base URL clients upload artifacts to.
pub const ENV_ARTIFACT_UPLOAD_BASE_URL: &str = "ARTIFACT_UPLOAD_BASE_URL";
/// Secret used to sign session tokens.
pub const ENV_AUTH_SESSION_SECRET: &str = "AUTH_SESSION_SECRET";
/// One-time owner bootstrap token.
pub const ENV_AUTH_BOOTSTRAP_TOKEN: &str = "AUTH_BOOTSTRAP_TOKEN";
/// Allow owner bootstrap from loopback without the token.
pub const ENV_AUTH_BOOTSTRAP_ALLOW_LOOPBACK: &str = "AUTH_BOOTSTRAP_ALLOW_LOOPBACK";
/// Message-scope rate limit, `"<burst>/<window_seconds>"`.
pub const ENV_RATE_LIMIT_SCOPE_MESSAGES: &str = "RATE_LIMIT_SCOPE_MESSAGES";
/// Hex-encoded 32-byte vault master key.
pub const ENV_SECRETS_MASTER_KEY: &str = "SECRETS_MASTER_KEY";

// ---------------------------------------------------------------------------
// Errors and warnings
// ---------------------------------------------------------------------------

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is present but malformed.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// What was wrong.
        reason: String,
    },
}

/// Advisory issues that do not prevent startup but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Artifact HEAD probing is disabled; `payload_ref` messages will be
    /// refused.
    ArtifactProbeDisabled,
    /// The secret vault has no master key; secret routes return 501.
    VaultNotConfigured,
    /// Loopback bootstrap is enabled; fine for development only.
    BootstrapLoopbackAllowed,
    /// No session secret; sessions are process-lifetime only.
    SessionSecretMissing,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArtifactProbeDisabled => {
                write!(f, "{ENV_ARTIFACT_STORAGE_HEAD_URL} unset; payload_ref messages will be refused")
            }
            Self::VaultNotConfigured => {
                write!(f, "{ENV_SECRETS_MASTER_KEY} unset; secret routes return 501")
            }
            Self::BootstrapLoopbackAllowed => {
                write!(f, "{ENV_AUTH_BOOTSTRAP_ALLOW_LOOPBACK} enabled; development only")
            }
            Self::SessionSecretMissing => {
                write!(f, "{ENV_AUTH_SESSION_SECRET} unset; sessions will not survive restarts")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CoreConfig
// ---------------------------------------------------------------------------

/// Message-scope rate limit sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRateLimit {
    /// Bucket burst.
    pub burst: u32,
    /// Full-refill window in seconds.
    pub window_secs: u64,
}

impl Default for MessageRateLimit {
    fn default() -> Self {
        Self {
            burst: 60,
            window_secs: 60,
        }
    }
}

/// Core-relevant runtime settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreConfig {
    /// Artifact HEAD-probe URL template (`{object_key}` placeholder, or the
    /// key is appended as a query parameter).
    pub artifact_head_url: Option<String>,
    /// Artifact upload base URL, surfaced to clients.
    pub artifact_upload_base_url: Option<String>,
    /// Session signing secret.
    pub auth_session_secret: Option<String>,
    /// Owner bootstrap token.
    pub auth_bootstrap_token: Option<String>,
    /// Allow loopback bootstrap.
    pub auth_bootstrap_allow_loopback: bool,
    /// Message-scope rate limit.
    pub rate_limit_messages: MessageRateLimit,
    /// Hex master key for the secret vault.
    pub secrets_master_key: Option<String>,
}

impl CoreConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] on malformed values.
    pub fn from_env() -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through a lookup function; the seam tests use.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] on malformed values.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        let non_empty = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        let rate_limit_messages = match non_empty(ENV_RATE_LIMIT_SCOPE_MESSAGES) {
            None => MessageRateLimit::default(),
            Some(raw) => parse_rate_limit(&raw)?,
        };

        let auth_bootstrap_allow_loopback = match non_empty(ENV_AUTH_BOOTSTRAP_ALLOW_LOOPBACK) {
            None => false,
            Some(raw) => parse_bool(ENV_AUTH_BOOTSTRAP_ALLOW_LOOPBACK, &raw)?,
        };

        let config = Self {
            artifact_head_url: non_empty(ENV_ARTIFACT_STORAGE_HEAD_URL),
            artifact_upload_base_url: non_empty(ENV_ARTIFACT_UPLOAD_BASE_URL),
            auth_session_secret: non_empty(ENV_AUTH_SESSION_SECRET),
            auth_bootstrap_token: non_empty(ENV_AUTH_BOOTSTRAP_TOKEN),
            auth_bootstrap_allow_loopback,
            rate_limit_messages,
            secrets_master_key: non_empty(ENV_SECRETS_MASTER_KEY),
        };

        let mut warnings = Vec::new();
        if config.artifact_head_url.is_none() {
            warnings.push(ConfigWarning::ArtifactProbeDisabled);
        }
        if config.secrets_master_key.is_none() {
            warnings.push(ConfigWarning::VaultNotConfigured);
        }
        if config.auth_bootstrap_allow_loopback {
            warnings.push(ConfigWarning::BootstrapLoopbackAllowed);
        }
        if config.auth_session_secret.is_none() {
            warnings.push(ConfigWarning::SessionSecretMissing);
        }
        Ok((config, warnings))
    }
}

fn parse_rate_limit(raw: &str) -> Result<MessageRateLimit, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        var: ENV_RATE_LIMIT_SCOPE_MESSAGES,
        reason: reason.to_string(),
    };
    let (burst, window) = raw
        .split_once('/')
        .ok_or_else(|| invalid("expected <burst>/<window_seconds>"))?;
    let burst: u32 = burst
        .trim()
        .parse()
        .map_err(|_| invalid("burst is not a number"))?;
    let window_secs: u64 = window
        .trim()
        .parse()
        .map_err(|_| invalid("window is not a number"))?;
    if burst == 0 || window_secs == 0 {
        return Err(invalid("burst and window must be positive"));
    }
    Ok(MessageRateLimit { burst, window_secs })
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            var,
            reason: format!("expected a boolean, got `{other}`"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_with_empty_env() {
        let (config, warnings) = CoreConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.rate_limit_messages, MessageRateLimit::default());
        assert!(!config.auth_bootstrap_allow_loopback);
        assert!(warnings.contains(&ConfigWarning::ArtifactProbeDisabled));
        assert!(warnings.contains(&ConfigWarning::VaultNotConfigured));
    }

    #[test]
    fn full_environment_parses() {
        let key = "00".repeat(32);
        let lookup = lookup_from(&[
            (ENV_ARTIFACT_STORAGE_HEAD_URL, "https://store/head/{object_key}"),
            (ENV_ARTIFACT_UPLOAD_BASE_URL, "https://store/upload"),
            (ENV_AUTH_SESSION_SECRET, "s3cret"),
            (ENV_AUTH_BOOTSTRAP_TOKEN, "boot"),
            (ENV_AUTH_BOOTSTRAP_ALLOW_LOOPBACK, "true"),
            (ENV_RATE_LIMIT_SCOPE_MESSAGES, "120/30"),
            (ENV_SECRETS_MASTER_KEY, key.as_str()),
        ]);
        let (config, warnings) = CoreConfig::from_lookup(lookup).unwrap();
        assert_eq!(
            config.rate_limit_messages,
            MessageRateLimit {
                burst: 120,
                window_secs: 30
            }
        );
        assert!(config.auth_bootstrap_allow_loopback);
        assert!(warnings.contains(&ConfigWarning::BootstrapLoopbackAllowed));
        assert!(!warnings.contains(&ConfigWarning::VaultNotConfigured));
    }

    #[test]
    fn malformed_rate_limit_is_an_error() {
        for bad in ["60", "a/60", "60/b", "0/60", "60/0"] {
            let lookup = lookup_from(&[(ENV_RATE_LIMIT_SCOPE_MESSAGES, bad)]);
            assert!(CoreConfig::from_lookup(lookup).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn malformed_bool_is_an_error() {
        let lookup = lookup_from(&[(ENV_AUTH_BOOTSTRAP_ALLOW_LOOPBACK, "maybe")]);
        assert!(CoreConfig::from_lookup(lookup).is_err());
    }

    #[test]
    fn empty_values_count_as_unset() {
        let lookup = lookup_from(&[(ENV_ARTIFACT_STORAGE_HEAD_URL, "  ")]);
        let (config, _) = CoreConfig::from_lookup(lookup).unwrap();
        assert!(config.artifact_head_url.is_none());
    }
}
