//! Connection configuration for directory clients.
//!
//! [`DirectoryConfig`] can be deserialized from any serde format or built in code with the
//! `with_*` overrides. Both paths are validated before a connection is attempted.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationError};

/// Default LDAPS port.
pub const DEFAULT_LDAPS_PORT: u16 = 636;
/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Configuration for connecting to a directory server.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DirectoryConfig {
    /// Directory server host name
    #[validate(length(min = 1, max = 253))]
    pub host: String,

    /// Directory server port
    #[validate(range(min = 1))]
    #[serde(default = "default_port")]
    pub port: u16,

    /// DNS domain of the directory (e.g. `example.com`)
    #[validate(custom(function = "validate_domain"))]
    pub domain: String,

    /// Whether to connect over LDAPS
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Whether to verify TLS certificates
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    /// Optional path to custom CA certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Connection timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Per-operation timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

const fn default_port() -> u16 {
    DEFAULT_LDAPS_PORT
}

const fn default_true() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

const fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    let valid = !domain.is_empty()
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("domain"))
    }
}

impl DirectoryConfig {
    /// Creates a configuration for an LDAPS server with default port and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the host or domain is invalid.
    pub fn new(host: impl Into<String>, domain: impl Into<String>) -> Result<Self, Error> {
        let config = Self {
            host: host.into(),
            port: default_port(),
            domain: domain.into(),
            use_tls: true,
            tls_verify: true,
            tls_ca_cert: None,
            connection_timeout_secs: default_connection_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        };
        config.check()?;
        Ok(config)
    }

    /// Validates field constraints and the resulting server URL.
    ///
    /// Deserialized configurations must be checked before use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first problem found.
    pub fn check(&self) -> Result<(), Error> {
        self.validate()
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))?;
        Url::parse(&self.url())?;
        Ok(())
    }

    /// Returns the server URL (`ldaps://host:port` or `ldap://host:port`).
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "ldaps" } else { "ldap" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Returns the base distinguished name of the domain, e.g. `dc=example,dc=com`.
    #[must_use]
    pub fn domain_dn(&self) -> String {
        self.domain
            .split('.')
            .map(|label| format!("dc={}", label.to_ascii_lowercase()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the operation timeout duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Overrides the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables or disables LDAPS.
    #[must_use]
    pub const fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Overrides the operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_ldaps_defaults() {
        let config = DirectoryConfig::new("dc01.example.com", "example.com").unwrap();
        assert_eq!(config.port, 636);
        assert!(config.use_tls);
        assert!(config.tls_verify);
        assert_eq!(config.url(), "ldaps://dc01.example.com:636");
        assert_eq!(config.operation_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn domain_dn_is_lowercased_dc_chain() {
        let config = DirectoryConfig::new("dc01", "Corp.Example.COM").unwrap();
        assert_eq!(config.domain_dn(), "dc=corp,dc=example,dc=com");
    }

    #[test]
    fn builder_overrides() {
        let config = DirectoryConfig::new("dc01.example.com", "example.com")
            .unwrap()
            .with_tls(false)
            .with_port(389)
            .with_tls_verification(false)
            .with_connection_timeout_secs(20)
            .with_operation_timeout_secs(30);

        assert_eq!(config.url(), "ldap://dc01.example.com:389");
        assert!(!config.tls_verify);
        assert_eq!(config.connection_timeout(), Duration::from_secs(20));
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
        assert!(config.check().is_ok());
    }

    #[test]
    fn rejects_malformed_domain() {
        let result = DirectoryConfig::new("dc01.example.com", "example..com");
        assert!(matches!(result, Err(Error::ConfigError(_))));

        let result = DirectoryConfig::new("", "example.com");
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{ "host": "dc01.example.com", "domain": "example.com" }"#;
        let config: DirectoryConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.port, DEFAULT_LDAPS_PORT);
        assert!(config.use_tls);
        assert_eq!(config.connection_timeout_secs, DEFAULT_CONNECTION_TIMEOUT_SECS);
        assert!(config.tls_ca_cert.is_none());
        assert!(config.check().is_ok());
    }

    #[test]
    fn deserialized_out_of_range_timeout_fails_check() {
        let json = r#"{
            "host": "dc01.example.com",
            "domain": "example.com",
            "operation_timeout_secs": 0
        }"#;
        let config: DirectoryConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(config.check(), Err(Error::ConfigError(_))));
    }
}
