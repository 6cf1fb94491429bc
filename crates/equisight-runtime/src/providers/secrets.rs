//! Secure credential handling for provider adapters.
//!
//! Configuration rows carry API keys as plain persisted text; before any
//! network use the runtime wraps them in [`ApiCredential`], which:
//!
//! - cannot leak through `Debug`/`Display` output (shows `[REDACTED]`)
//! - is zeroed on drop via the `secrecy` crate
//! - must be explicitly exposed with `.expose()` at the point of use
//! - remembers where it was loaded from, for debugging config issues

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use super::ConfigError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// From a persisted provider configuration row.
    Store,
    /// From an environment variable.
    Environment,
    /// Provided programmatically (tests, ad-hoc harnesses).
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Store => write!(f, "store"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-held API key.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    label: &'static str,
}

impl ApiCredential {
    /// Wrap a key value. After this point the value cannot be logged by
    /// accident.
    pub fn new(value: impl Into<String>, source: CredentialSource, label: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            label,
        }
    }

    /// Load from an environment variable.
    pub fn from_env(env_var: &str, label: &'static str) -> Result<Self, ConfigError> {
        std::env::var(env_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| Self::new(v, CredentialSource::Environment, label))
            .ok_or_else(|| ConfigError::MissingCredential {
                kind: label.to_string(),
            })
    }

    /// Wrap a stored key, falling back to an environment variable when the
    /// row carries a blank value.
    pub fn from_store_or_env(
        stored: &str,
        env_var: &str,
        label: &'static str,
    ) -> Result<Self, ConfigError> {
        if !stored.trim().is_empty() {
            return Ok(Self::new(stored, CredentialSource::Store, label));
        }
        Self::from_env(env_var, label)
    }

    /// Expose the key for use in an HTTP header.
    ///
    /// Only call this at the point of use; never store the exposed value.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().trim().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("label", &self.label)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.label, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted_in_debug_and_display() {
        let secret = "sk-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Programmatic, "Test key");

        let debug = format!("{:?}", cred);
        assert!(!debug.contains(secret), "secret exposed in Debug");
        assert!(debug.contains("[REDACTED]"));

        let display = format!("{}", cred);
        assert!(!display.contains(secret), "secret exposed in Display");
        assert!(display.contains("Test key"));
    }

    #[test]
    fn test_expose_returns_value() {
        let cred = ApiCredential::new("sk-abc", CredentialSource::Store, "Test key");
        assert_eq!(cred.expose(), "sk-abc");
        assert!(!cred.is_empty());
    }

    #[test]
    fn test_blank_value_counts_as_empty() {
        let cred = ApiCredential::new("   ", CredentialSource::Store, "Test key");
        assert!(cred.is_empty());
    }

    #[test]
    fn test_from_store_or_env_prefers_store() {
        std::env::set_var("EQUISIGHT_TEST_KEY_PRIORITY", "env-key");
        let cred =
            ApiCredential::from_store_or_env("store-key", "EQUISIGHT_TEST_KEY_PRIORITY", "Test key")
                .unwrap();
        assert_eq!(cred.expose(), "store-key");
        assert_eq!(cred.source(), CredentialSource::Store);
        std::env::remove_var("EQUISIGHT_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_from_store_or_env_falls_back() {
        std::env::set_var("EQUISIGHT_TEST_KEY_FALLBACK", "env-key");
        let cred =
            ApiCredential::from_store_or_env("", "EQUISIGHT_TEST_KEY_FALLBACK", "Test key").unwrap();
        assert_eq!(cred.expose(), "env-key");
        assert_eq!(cred.source(), CredentialSource::Environment);
        std::env::remove_var("EQUISIGHT_TEST_KEY_FALLBACK");
    }

    #[test]
    fn test_missing_everywhere_is_config_error() {
        let result =
            ApiCredential::from_store_or_env("", "EQUISIGHT_NONEXISTENT_VAR_9", "Test key");
        assert!(matches!(result, Err(ConfigError::MissingCredential { .. })));
    }
}
