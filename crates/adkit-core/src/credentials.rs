//! Bind credentials for directory sessions.

use crate::Error;
use secrecy::{ExposeSecret, SecretString};

/// Credentials used to bind the directory session.
///
/// The password is held in a [`SecretString`] so it is redacted from `Debug` output and zeroed
/// on drop.
#[derive(Debug)]
pub struct BindCredentials {
    principal: String,
    password: SecretString,
}

impl BindCredentials {
    /// Create new bind credentials.
    ///
    /// # Arguments
    ///
    /// * `principal` - Account name, user principal name or full DN of the bind account
    /// * `password` - The bind password
    #[must_use]
    pub fn new(principal: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Principal as configured.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Rejects credentials that cannot be used for a bind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] when the principal is empty or blank.
    pub fn check(&self) -> Result<(), Error> {
        if self.principal.trim().is_empty() {
            return Err(Error::ValidationError("no bind user specified".to_string()));
        }
        Ok(())
    }

    /// Principal to send in the bind request.
    ///
    /// A bare account name is qualified as `<name>@<domain>`; a DN or a user principal name is
    /// used unchanged.
    #[must_use]
    pub fn bind_principal(&self, domain: &str) -> String {
        if self.principal.contains('=') || self.principal.contains('@') {
            self.principal.clone()
        } else {
            format!("{}@{domain}", self.principal)
        }
    }

    /// Get the bind password.
    #[must_use]
    pub fn bind_password(&self) -> &str {
        self.password.expose_secret()
    }
}
