//! Organizational units.

use adkit_core::{DirectoryConfig, ObjectGuid};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::decode;
use crate::dn::DistinguishedName;
use crate::reconciler::{CreateRequest, DirectoryRecord, EntityKind};
use crate::transport::{AttributeMap, DirectoryEntry};
use crate::Result;

const SEARCH_ATTRIBUTES: &[&str] = &["ou", "description", "objectGUID", "whenCreated"];

/// Organizational unit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    /// Distinguished name of the unit.
    pub dn: DistinguishedName,
    /// Value of the `ou` attribute.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Directory-assigned GUID.
    #[serde(default)]
    pub guid: Option<ObjectGuid>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DirectoryRecord for OrganizationalUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn dn(&self) -> &DistinguishedName {
        &self.dn
    }
}

/// Request to create an organizational unit.
#[derive(Debug, Clone, Validate)]
pub struct NewOrganizationalUnit {
    /// Unit name.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Container the unit is created in.
    pub container: DistinguishedName,
    /// Optional description.
    #[validate(length(max = 1024))]
    pub description: Option<String>,
}

impl NewOrganizationalUnit {
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

impl CreateRequest for NewOrganizationalUnit {
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

/// [`EntityKind`] for organizational units.
#[derive(Debug, Clone, Copy)]
pub struct OrganizationalUnitKind;

impl EntityKind for OrganizationalUnitKind {
    type Record = OrganizationalUnit;
    type Request = NewOrganizationalUnit;

    const KIND: &'static str = "organizational unit";
    const NAMING_ATTRIBUTE: &'static str = "ou";
    const OBJECT_CLASSES: &'static [&'static str] = &["organizationalUnit", "top"];
    const SEARCH_ATTRIBUTES: &'static [&'static str] = SEARCH_ATTRIBUTES;
    const REAPPLIES_DESCRIPTION: bool = true;

    fn search_filter(escaped_name: &str) -> String {
        format!("(&(objectClass=organizationalUnit)(ou={escaped_name}))")
    }

    fn from_entry(entry: &DirectoryEntry) -> Result<OrganizationalUnit> {
        let dn = decode::entry_dn(entry)?;
        Ok(OrganizationalUnit {
            name: decode::entry_name(entry, &dn, "ou"),
            description: decode::optional(entry, "description"),
            guid: decode::object_guid(entry)?,
            created_at: decode::timestamp(entry, "whenCreated"),
            dn,
        })
    }

    fn create_attributes(
        request: &NewOrganizationalUnit,
        _config: &DirectoryConfig,
    ) -> Result<AttributeMap> {
        request.validate()?;

        let mut attributes = AttributeMap::new();
        attributes.insert("ou".to_string(), vec![request.name.clone()]);
        if let Some(description) = request.description.as_deref().filter(|d| !d.is_empty()) {
            attributes.insert("description".to_string(), vec![description.to_string()]);
        }
        Ok(attributes)
    }
}
