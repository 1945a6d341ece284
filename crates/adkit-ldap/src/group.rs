//! Directory groups.

use adkit_core::{DirectoryConfig, ObjectGuid};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::decode;
use crate::dn::DistinguishedName;
use crate::reconciler::{CreateRequest, DirectoryRecord, EntityKind};
use crate::transport::{AttributeMap, DirectoryEntry};
use crate::Result;

const SEARCH_ATTRIBUTES: &[&str] = &[
    "cn",
    "sAMAccountName",
    "description",
    "member",
    "groupType",
    "objectGUID",
];

/// Value of `instanceType` for objects written on this domain controller.
const INSTANCE_TYPE_WRITABLE: &str = "4";

const SECURITY_ENABLED: u32 = 0x8000_0000;

/// Group scope encoded in the low bits of `groupType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupScope {
    /// Domain-wide membership, usable across trusts.
    #[default]
    Global,
    /// Usable only inside the domain.
    DomainLocal,
    /// Forest-wide.
    Universal,
}

impl GroupScope {
    const fn bits(self) -> u32 {
        match self {
            Self::Global => 0x2,
            Self::DomainLocal => 0x4,
            Self::Universal => 0x8,
        }
    }

    fn from_group_type(group_type: u32) -> Option<Self> {
        [Self::Global, Self::DomainLocal, Self::Universal]
            .into_iter()
            .find(|scope| group_type & scope.bits() != 0)
    }
}

/// Encodes scope and security flag as the signed 32-bit `groupType` value.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn group_type(scope: GroupScope, security: bool) -> i32 {
    let mut bits = scope.bits();
    if security {
        bits |= SECURITY_ENABLED;
    }
    bits as i32
}

/// Group entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Distinguished name of the group.
    pub dn: DistinguishedName,
    /// Common name.
    pub name: String,
    /// Pre-Windows 2000 group name.
    #[serde(default)]
    pub account_name: Option<String>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Distinguished names of group members.
    #[serde(default)]
    pub members: Vec<DistinguishedName>,
    /// Scope decoded from `groupType`.
    #[serde(default)]
    pub scope: Option<GroupScope>,
    /// Whether this is a security group (as opposed to distribution).
    #[serde(default)]
    pub security: bool,
    /// Directory-assigned GUID.
    #[serde(default)]
    pub guid: Option<ObjectGuid>,
}

impl Group {
    /// Returns the number of members in the group.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Checks whether the given distinguished name is a member, ignoring case.
    #[must_use]
    pub fn has_member(&self, member_dn: &DistinguishedName) -> bool {
        self.members.iter().any(|dn| dn.matches(member_dn))
    }
}

impl DirectoryRecord for Group {
    fn name(&self) -> &str {
        &self.name
    }

    fn dn(&self) -> &DistinguishedName {
        &self.dn
    }
}

/// Request to create a group.
#[derive(Debug, Clone, Validate)]
pub struct NewGroup {
    /// Group name, also used as `sAMAccountName`.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Container the group is created in.
    pub container: DistinguishedName,
    /// Optional description.
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    /// Group scope.
    pub scope: GroupScope,
    /// Whether to create a security group.
    pub security: bool,
}

impl NewGroup {
    /// Creates a request for a global security group.
    #[must_use]
    pub fn new(name: impl Into<String>, container: DistinguishedName) -> Self {
        Self {
            name: name.into(),
            container,
            description: None,
            scope: GroupScope::Global,
            security: true,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the scope.
    #[must_use]
    pub const fn with_scope(mut self, scope: GroupScope) -> Self {
        self.scope = scope;
        self
    }

    /// Creates a distribution group instead of a security group.
    #[must_use]
    pub const fn distribution(mut self) -> Self {
        self.security = false;
        self
    }
}

impl CreateRequest for NewGroup {
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

/// [`EntityKind`] for groups.
#[derive(Debug, Clone, Copy)]
pub struct GroupKind;

impl EntityKind for GroupKind {
    type Record = Group;
    type Request = NewGroup;

    const KIND: &'static str = "group";
    const NAMING_ATTRIBUTE: &'static str = "cn";
    const OBJECT_CLASSES: &'static [&'static str] = &["top", "group"];
    const SEARCH_ATTRIBUTES: &'static [&'static str] = SEARCH_ATTRIBUTES;
    const REAPPLIES_DESCRIPTION: bool = true;

    fn search_filter(escaped_name: &str) -> String {
        format!("(&(objectClass=group)(cn={escaped_name}))")
    }

    #[allow(clippy::cast_sign_loss)]
    fn from_entry(entry: &DirectoryEntry) -> Result<Group> {
        let dn = decode::entry_dn(entry)?;
        let group_type = decode::integer::<i32>(entry, "groupType").map(|value| value as u32);

        Ok(Group {
            name: decode::entry_name(entry, &dn, "cn"),
            account_name: decode::optional(entry, "sAMAccountName"),
            description: decode::optional(entry, "description"),
            members: decode::dn_values(entry, "member"),
            scope: group_type.and_then(GroupScope::from_group_type),
            security: group_type.is_some_and(|bits| bits & SECURITY_ENABLED != 0),
            guid: decode::object_guid(entry)?,
            dn,
        })
    }

    fn create_attributes(request: &NewGroup, _config: &DirectoryConfig) -> Result<AttributeMap> {
        request.validate()?;

        let mut attributes = AttributeMap::new();
        attributes.insert("sAMAccountName".to_string(), vec![request.name.clone()]);
        attributes.insert("name".to_string(), vec![request.name.clone()]);
        attributes.insert(
            "instanceType".to_string(),
            vec![INSTANCE_TYPE_WRITABLE.to_string()],
        );
        attributes.insert(
            "groupType".to_string(),
            vec![group_type(request.scope, request.security).to_string()],
        );
        if let Some(description) = request.description.as_deref().filter(|d| !d.is_empty()) {
            attributes.insert("description".to_string(), vec![description.to_string()]);
        }
        Ok(attributes)
    }
}
