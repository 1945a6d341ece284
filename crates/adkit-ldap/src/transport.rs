//! Directory transport: the session seam and its `ldap3` implementation.

use adkit_core::{DirectoryConfig, Error, Result};
use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use native_tls::{Certificate, TlsConnector};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// LDAP result code for invalid credentials.
const INVALID_CREDENTIALS: u32 = 49;

/// Attribute name to ordered values, used when adding entries.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Snapshot of a directory entry returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Textual attributes; values keep the order the server sent.
    pub attributes: HashMap<String, Vec<String>>,
    /// Attributes whose values are not valid UTF-8 (`objectSid`, `objectGUID`, ...).
    pub binary_attributes: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    /// Creates an entry with no attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Self::default()
        }
    }

    /// Adds a textual attribute value.
    #[must_use]
    pub fn with_attribute(mut self, attribute: &str, value: impl Into<String>) -> Self {
        self.attributes
            .entry(attribute.to_string())
            .or_default()
            .push(value.into());
        self
    }

    /// Adds a binary attribute value.
    #[must_use]
    pub fn with_binary_attribute(mut self, attribute: &str, value: impl Into<Vec<u8>>) -> Self {
        self.binary_attributes
            .entry(attribute.to_string())
            .or_default()
            .push(value.into());
        self
    }

    /// Returns the first value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first().map(String::as_str))
    }

    /// Returns all textual values for the attribute.
    ///
    /// Exact names are tried first, then an ASCII case-insensitive match.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        lookup(&self.attributes, attribute).map(Vec::as_slice)
    }

    /// Returns the first raw value of the attribute.
    ///
    /// Falls back to the textual map: a binary value that happens to be valid UTF-8 is filed
    /// there by the transport.
    #[must_use]
    pub fn first_bytes(&self, attribute: &str) -> Option<&[u8]> {
        lookup(&self.binary_attributes, attribute)
            .and_then(|values| values.first().map(Vec::as_slice))
            .or_else(|| self.first(attribute).map(str::as_bytes))
    }
}

fn lookup<'a, V>(map: &'a HashMap<String, V>, attribute: &str) -> Option<&'a V> {
    map.get(attribute).or_else(|| {
        map.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, value)| value)
    })
}

/// LDAP modification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryModification {
    /// Add attribute values.
    Add {
        /// Attribute to modify.
        attribute: String,
        /// Values to add.
        values: Vec<Vec<u8>>,
    },
    /// Delete attribute values.
    Delete {
        /// Attribute to modify.
        attribute: String,
        /// Values to delete (empty removes attribute).
        values: Vec<Vec<u8>>,
    },
    /// Replace attribute values.
    Replace {
        /// Attribute to modify.
        attribute: String,
        /// Replacement values.
        values: Vec<Vec<u8>>,
    },
}

impl DirectoryModification {
    /// Adds values to `attribute`.
    pub fn add<V: Into<Vec<u8>>>(
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::Add {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Removes values from `attribute`; no values removes the attribute.
    pub fn delete<V: Into<Vec<u8>>>(
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::Delete {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Replaces all values of `attribute`.
    pub fn replace<V: Into<Vec<u8>>>(
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::Replace {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Attribute targeted by the modification.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Add { attribute, .. }
            | Self::Delete { attribute, .. }
            | Self::Replace { attribute, .. } => attribute,
        }
    }

    /// Values carried by the modification.
    #[must_use]
    pub fn values(&self) -> &[Vec<u8>] {
        match self {
            Self::Add { values, .. } | Self::Delete { values, .. } | Self::Replace { values, .. } => {
                values
            }
        }
    }

    fn into_ldap(self) -> Mod<Vec<u8>> {
        match self {
            Self::Add { attribute, values } => {
                Mod::Add(attribute.into_bytes(), values.into_iter().collect())
            }
            Self::Delete { attribute, values } => {
                Mod::Delete(attribute.into_bytes(), values.into_iter().collect())
            }
            Self::Replace { attribute, values } => {
                Mod::Replace(attribute.into_bytes(), values.into_iter().collect())
            }
        }
    }
}

/// An authenticated directory session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapSession: Send {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>>;
    async fn add(&mut self, dn: &str, attributes: &AttributeMap) -> Result<()>;
    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()>;
    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<String>,
    ) -> Result<()>;
    async fn delete(&mut self, dn: &str) -> Result<()>;
    async fn unbind(&mut self) -> Result<()>;
}

/// Opens unauthenticated sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn LdapSession>>;
}

/// Connector backed by `ldap3`.
pub(crate) struct RealLdapConnector {
    config: DirectoryConfig,
}

impl RealLdapConnector {
    pub(crate) fn new(config: DirectoryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LdapConnector for RealLdapConnector {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        let settings = build_ldap_settings(&self.config)?;
        let url = self.config.url();
        debug!(%url, "connecting to directory");
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|err| Error::Connection(format!("{url}: {err}")))?;
        ldap3::drive!(conn);
        Ok(Box::new(RealLdapSession {
            inner: ldap,
            operation_timeout: self.config.operation_timeout(),
        }))
    }
}

struct RealLdapSession {
    inner: ldap3::Ldap,
    operation_timeout: Duration,
}

async fn run<F, T>(limit: Duration, operation: &str, dn: &str, fut: F) -> Result<T>
where
    F: Future<Output = ldap3::result::Result<T>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("directory {operation} on `{dn}`")))?
        .map_err(|err| Error::transport(operation, dn, err))
}

#[async_trait]
impl LdapSession for RealLdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let fut = self.inner.simple_bind(dn, password);
        let result = timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| Error::Timeout(format!("directory bind as `{dn}`")))?
            .map_err(|err| Error::Connection(err.to_string()))?;
        if result.rc == INVALID_CREDENTIALS {
            return Err(Error::Authentication {
                principal: dn.to_string(),
                message: "invalid credentials".to_string(),
            });
        }
        result.success().map_err(|err| Error::Authentication {
            principal: dn.to_string(),
            message: err.to_string(),
        })?;
        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>> {
        let fut = self
            .inner
            .search(base_dn, scope.into(), filter, attributes.to_vec());
        let result = run(self.operation_timeout, "search", base_dn, fut).await?;
        let (entries, _) = result
            .success()
            .map_err(|err| Error::transport("search", base_dn, err))?;
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attributes: entry.attrs,
                binary_attributes: entry.bin_attrs,
            })
            .collect())
    }

    async fn add(&mut self, dn: &str, attributes: &AttributeMap) -> Result<()> {
        let attrs = attributes
            .iter()
            .map(|(name, values)| {
                (
                    name.clone().into_bytes(),
                    values
                        .iter()
                        .map(|value| value.clone().into_bytes())
                        .collect::<HashSet<_>>(),
                )
            })
            .collect::<Vec<_>>();
        let fut = self.inner.add(dn, attrs);
        let result = run(self.operation_timeout, "add", dn, fut).await?;
        result
            .success()
            .map_err(|err| Error::transport("add", dn, err))?;
        Ok(())
    }

    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()> {
        let mods = modifications
            .iter()
            .cloned()
            .map(DirectoryModification::into_ldap)
            .collect::<Vec<_>>();
        let fut = self.inner.modify(dn, mods);
        let result = run(self.operation_timeout, "modify", dn, fut).await?;
        result
            .success()
            .map_err(|err| Error::transport("modify", dn, err))?;
        Ok(())
    }

    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<String>,
    ) -> Result<()> {
        let fut = self
            .inner
            .modifydn(dn, new_rdn, delete_old_rdn, new_superior.as_deref());
        let result = run(self.operation_timeout, "modify-dn", dn, fut).await?;
        result
            .success()
            .map_err(|err| Error::transport("modify-dn", dn, err))?;
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        let fut = self.inner.delete(dn);
        let result = run(self.operation_timeout, "delete", dn, fut).await?;
        result
            .success()
            .map_err(|err| Error::transport("delete", dn, err))?;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        let fut = self.inner.unbind();
        run(self.operation_timeout, "unbind", "", fut).await
    }
}

fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if !config.use_tls {
        return Ok(settings);
    }

    if !config.tls_verify {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = &config.tls_ca_cert {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read directory CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|err| {
            Error::ConfigError(format!("invalid directory CA certificate: {err}"))
        })?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to load directory CA certificate: {err}"))
            })?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

/// Escapes a value for use inside an LDAP search filter (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
