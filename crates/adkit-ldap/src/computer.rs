//! Computer accounts.

use adkit_core::{DirectoryConfig, ObjectGuid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::decode;
use crate::dn::DistinguishedName;
use crate::reconciler::{CreateRequest, DirectoryRecord, EntityKind};
use crate::transport::{AttributeMap, DirectoryEntry};
use crate::user::AccountControl;
use crate::Result;

const SEARCH_ATTRIBUTES: &[&str] = &[
    "cn",
    "sAMAccountName",
    "description",
    "dNSHostName",
    "operatingSystem",
    "userAccountControl",
    "objectGUID",
    "whenCreated",
];

/// Computer account entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computer {
    /// Distinguished name of the account.
    pub dn: DistinguishedName,
    /// Common name.
    pub name: String,
    /// Pre-Windows 2000 account name (`NAME$`).
    #[serde(default)]
    pub account_name: Option<String>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Fully qualified host name, once the machine has joined.
    #[serde(default)]
    pub dns_host_name: Option<String>,
    /// Operating system reported by the machine.
    #[serde(default)]
    pub operating_system: Option<String>,
    /// Decoded `userAccountControl`.
    pub account_control: AccountControl,
    /// Directory-assigned GUID.
    #[serde(default)]
    pub guid: Option<ObjectGuid>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl DirectoryRecord for Computer {
    fn name(&self) -> &str {
        &self.name
    }

    fn dn(&self) -> &DistinguishedName {
        &self.dn
    }
}

/// Request to pre-stage a computer account.
#[derive(Debug, Clone, Validate)]
pub struct NewComputer {
    /// NetBIOS computer name.
    #[validate(length(min = 1, max = 15))]
    pub name: String,
    /// Container the account is created in.
    pub container: DistinguishedName,
    /// Optional description.
    #[validate(length(max = 1024))]
    pub description: Option<String>,
}

impl NewComputer {
    /// Creates a request without a description.
    #[must_use]
    pub fn new(name: impl Into<String>, container: DistinguishedName) -> Self {
        Self {
            name: name.into(),
            container,
            description: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl CreateRequest for NewComputer {
    fn name(&self) -> &str {
        &self.name
    }

    fn container(&self) -> &DistinguishedName {
        &self.container
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// [`EntityKind`] for computer accounts.
#[derive(Debug, Clone, Copy)]
pub struct ComputerKind;

impl EntityKind for ComputerKind {
    type Record = Computer;
    type Request = NewComputer;

    const KIND: &'static str = "computer";
    const NAMING_ATTRIBUTE: &'static str = "cn";
    const OBJECT_CLASSES: &'static [&'static str] = &["computer"];
    const SEARCH_ATTRIBUTES: &'static [&'static str] = SEARCH_ATTRIBUTES;
    const REAPPLIES_DESCRIPTION: bool = true;

    fn search_filter(escaped_name: &str) -> String {
        format!("(&(objectClass=computer)(cn={escaped_name}))")
    }

    fn from_entry(entry: &DirectoryEntry) -> Result<Computer> {
        let dn = decode::entry_dn(entry)?;
        Ok(Computer {
            name: decode::entry_name(entry, &dn, "cn"),
            account_name: decode::optional(entry, "sAMAccountName"),
            description: decode::optional(entry, "description"),
            dns_host_name: decode::optional(entry, "dNSHostName"),
            operating_system: decode::optional(entry, "operatingSystem"),
            account_control: decode::integer(entry, "userAccountControl")
                .map(AccountControl::from_bits)
                .unwrap_or_default(),
            guid: decode::object_guid(entry)?,
            created_at: decode::timestamp(entry, "whenCreated"),
            dn,
        })
    }

    fn create_attributes(request: &NewComputer, _config: &DirectoryConfig) -> Result<AttributeMap> {
        request.validate()?;

        let mut attributes = AttributeMap::new();
        attributes.insert("name".to_string(), vec![request.name.clone()]);
        attributes.insert(
            "sAMAccountName".to_string(),
            vec![format!("{}$", request.name)],
        );
        attributes.insert(
            "userAccountControl".to_string(),
            vec![AccountControl::WORKSTATION_TRUST_ACCOUNT.to_string()],
        );
        if let Some(description) = request.description.as_deref().filter(|d| !d.is_empty()) {
            attributes.insert("description".to_string(), vec![description.to_string()]);
        }
        Ok(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adkit_core::Error;

    fn config() -> DirectoryConfig {
        DirectoryConfig::new("dc01.example.com", "example.com").unwrap()
    }

    fn servers() -> DistinguishedName {
        DistinguishedName::parse("ou=Servers,dc=example,dc=com").unwrap()
    }

    #[test]
    fn create_attributes_use_machine_account_name() {
        let request = NewComputer::new("WEB01", servers());
        let attributes = ComputerKind::create_attributes(&request, &config()).unwrap();

        assert_eq!(
            attributes.get("sAMAccountName"),
            Some(&vec!["WEB01$".to_string()])
        );
        assert_eq!(
            attributes.get("userAccountControl"),
            Some(&vec!["4096".to_string()])
        );
        assert!(!attributes.contains_key("description"));
    }

    #[test]
    fn netbios_names_are_limited() {
        let request = NewComputer::new("a-very-long-host-name", servers());
        let err = ComputerKind::create_attributes(&request, &config()).unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[test]
    fn decodes_entry() {
        let entry = DirectoryEntry::new("CN=WEB01,OU=Servers,DC=example,DC=com")
            .with_attribute("cn", "WEB01")
            .with_attribute("sAMAccountName", "WEB01$")
            .with_attribute("dNSHostName", "web01.example.com")
            .with_attribute("userAccountControl", "4098");
        let computer = ComputerKind::from_entry(&entry).unwrap();

        assert_eq!(computer.name, "WEB01");
        assert_eq!(computer.account_name.as_deref(), Some("WEB01$"));
        assert_eq!(computer.dns_host_name.as_deref(), Some("web01.example.com"));
        assert!(computer.account_control.is_disabled());
    }
}
