//! User accounts.
//!
//! Creating a user is a four-step sequence: the entry is added disabled, then the initial
//! password is written, the account is enabled, and finally the `uidNumber` derived from the
//! account's security identifier is stored. A failure after the add leaves the entry behind and
//! is reported as [`Error::IncompleteCreate`].

use adkit_core::{DirectoryConfig, Error, ObjectGuid};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

use crate::decode;
use crate::dn::DistinguishedName;
use crate::reconciler::{find_unique, CreateRequest, DirectoryRecord, EntityKind};
use crate::repository::ObjectRepository;
use crate::sid::SecurityIdentifier;
use crate::transport::{AttributeMap, DirectoryEntry, DirectoryModification};
use crate::Result;

const SEARCH_ATTRIBUTES: &[&str] = &[
    "cn",
    "sAMAccountName",
    "userPrincipalName",
    "displayName",
    "givenName",
    "sn",
    "mail",
    "description",
    "userAccountControl",
    "uidNumber",
    "memberOf",
    "objectSid",
    "objectGUID",
    "whenCreated",
];

/// `accountExpires` value meaning "never".
const NEVER_EXPIRES: &str = "0";

/// Decoded `userAccountControl` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountControl(u32);

impl AccountControl {
    /// Account is disabled.
    pub const ACCOUNTDISABLE: u32 = 0x0002;
    /// Account is locked out.
    pub const LOCKOUT: u32 = 0x0010;
    /// Regular user account.
    pub const NORMAL_ACCOUNT: u32 = 0x0200;
    /// Computer account of a domain member.
    pub const WORKSTATION_TRUST_ACCOUNT: u32 = 0x1000;
    /// Password never expires.
    pub const DONT_EXPIRE_PASSWORD: u32 = 0x0001_0000;

    /// Wraps raw flag bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if the account is disabled.
    #[must_use]
    pub const fn is_disabled(self) -> bool {
        self.0 & Self::ACCOUNTDISABLE != 0
    }

    /// Returns true if the account is locked out.
    #[must_use]
    pub const fn is_locked(self) -> bool {
        self.0 & Self::LOCKOUT != 0
    }

    /// Returns true if the password never expires.
    #[must_use]
    pub const fn password_never_expires(self) -> bool {
        self.0 & Self::DONT_EXPIRE_PASSWORD != 0
    }

    /// Returns true if the account can sign in.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !self.is_disabled() && !self.is_locked()
    }
}

/// Normal account, disabled: the state a user is created in.
const DISABLED_USER: u32 = AccountControl::NORMAL_ACCOUNT | AccountControl::ACCOUNTDISABLE;
/// Normal account, enabled.
const ENABLED_USER: u32 = AccountControl::NORMAL_ACCOUNT;

/// User account entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Distinguished name of the account.
    pub dn: DistinguishedName,
    /// Common name.
    pub name: String,
    /// Logon name (`sAMAccountName`).
    #[serde(default)]
    pub account_name: Option<String>,
    /// User principal name (`name@domain`).
    #[serde(default)]
    pub principal_name: Option<String>,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Given name (first name).
    #[serde(default)]
    pub given_name: Option<String>,
    /// Surname (last name).
    #[serde(default)]
    pub surname: Option<String>,
    /// Primary email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Decoded `userAccountControl`.
    pub account_control: AccountControl,
    /// POSIX uid number, once assigned.
    #[serde(default)]
    pub uid_number: Option<u64>,
    /// Security identifier.
    #[serde(default)]
    pub sid: Option<SecurityIdentifier>,
    /// Directory-assigned GUID.
    #[serde(default)]
    pub guid: Option<ObjectGuid>,
    /// Groups the user belongs to.
    #[serde(default)]
    pub groups: Vec<DistinguishedName>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Returns true if the account can sign in.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.account_control.is_active()
    }

    /// Returns true if the user is a direct member of the group (case-insensitive).
    #[must_use]
    pub fn in_group(&self, group: &DistinguishedName) -> bool {
        self.groups.iter().any(|dn| dn.matches(group))
    }
}

impl DirectoryRecord for User {
    fn name(&self) -> &str {
        &self.name
    }

    fn dn(&self) -> &DistinguishedName {
        &self.dn
    }
}

/// Request to create a user account.
#[derive(Debug, Validate)]
pub struct NewUser {
    /// Logon name; also the common name and the local part of the principal name.
    #[validate(length(min = 1, max = 20))]
    pub name: String,
    /// Container the account is created in.
    pub container: DistinguishedName,
    /// Given name.
    #[validate(length(max = 64))]
    pub given_name: Option<String>,
    /// Surname.
    #[validate(length(max = 64))]
    pub surname: Option<String>,
    /// Email address.
    #[validate(email)]
    pub email: Option<String>,
    /// Optional description.
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    /// Initial password.
    pub password: SecretString,
}

impl NewUser {
    /// Creates a request with only the mandatory fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        container: DistinguishedName,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            container,
            given_name: None,
            surname: None,
            email: None,
            description: None,
            password: SecretString::from(password.into()),
        }
    }

    /// Sets the given name.
    #[must_use]
    pub fn with_given_name(mut self, given_name: impl Into<String>) -> Self {
        self.given_name = Some(given_name.into());
        self
    }

    /// Sets the surname.
    #[must_use]
    pub fn with_surname(mut self, surname: impl Into<String>) -> Self {
        self.surname = Some(surname.into());
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// `"<given> <surname>"`, or the logon name when neither is set.
    #[must_use]
    pub fn full_name(&self) -> String {
        let parts = [self.given_name.as_deref(), self.surname.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();
        if parts.is_empty() {
            self.name.clone()
        } else {
            parts.join(" ")
        }
    }
}

impl CreateRequest for NewUser {
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

/// Encodes a password for the `unicodePwd` attribute: quoted, then UTF-16LE.
#[must_use]
pub fn encode_password(password: &str) -> Vec<u8> {
    format!("\"{password}\"")
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn insert_optional(attributes: &mut AttributeMap, attribute: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|value| !value.is_empty()) {
        attributes.insert(attribute.to_string(), vec![value.to_string()]);
    }
}

/// [`EntityKind`] for user accounts.
#[derive(Debug, Clone, Copy)]
pub struct UserKind;

#[async_trait]
impl EntityKind for UserKind {
    type Record = User;
    type Request = NewUser;

    const KIND: &'static str = "user";
    const NAMING_ATTRIBUTE: &'static str = "cn";
    const OBJECT_CLASSES: &'static [&'static str] = &["organizationalPerson", "person", "top", "user"];
    const SEARCH_ATTRIBUTES: &'static [&'static str] = SEARCH_ATTRIBUTES;
    const REAPPLIES_DESCRIPTION: bool = false;

    fn search_filter(escaped_name: &str) -> String {
        format!("(&(objectCategory=person)(objectClass=user)(cn={escaped_name}))")
    }

    fn from_entry(entry: &DirectoryEntry) -> Result<User> {
        let dn = decode::entry_dn(entry)?;
        Ok(User {
            name: decode::entry_name(entry, &dn, "cn"),
            account_name: decode::optional(entry, "sAMAccountName"),
            principal_name: decode::optional(entry, "userPrincipalName"),
            display_name: decode::optional(entry, "displayName"),
            given_name: decode::optional(entry, "givenName"),
            surname: decode::optional(entry, "sn"),
            email: decode::optional(entry, "mail"),
            description: decode::optional(entry, "description"),
            account_control: decode::integer(entry, "userAccountControl")
                .map(AccountControl::from_bits)
                .unwrap_or_default(),
            uid_number: decode::integer(entry, "uidNumber"),
            sid: decode::object_sid(entry)?,
            guid: decode::object_guid(entry)?,
            groups: decode::dn_values(entry, "memberOf"),
            created_at: decode::timestamp(entry, "whenCreated"),
            dn,
        })
    }

    fn create_attributes(request: &NewUser, config: &DirectoryConfig) -> Result<AttributeMap> {
        request.validate()?;
        if request.password.expose_secret().is_empty() {
            return Err(Error::InvalidRequest("initial password is empty".to_string()));
        }
        if !config.use_tls {
            return Err(Error::InvalidRequest(
                "user passwords can only be set over an encrypted connection".to_string(),
            ));
        }

        let full_name = request.full_name();
        let mut attributes = AttributeMap::new();
        attributes.insert("sAMAccountName".to_string(), vec![request.name.clone()]);
        attributes.insert(
            "userPrincipalName".to_string(),
            vec![format!("{}@{}", request.name, config.domain)],
        );
        attributes.insert("name".to_string(), vec![full_name.clone()]);
        attributes.insert("displayName".to_string(), vec![full_name]);
        attributes.insert(
            "userAccountControl".to_string(),
            vec![DISABLED_USER.to_string()],
        );
        attributes.insert("accountExpires".to_string(), vec![NEVER_EXPIRES.to_string()]);
        insert_optional(&mut attributes, "givenName", request.given_name.as_deref());
        insert_optional(&mut attributes, "sn", request.surname.as_deref());
        insert_optional(&mut attributes, "mail", request.email.as_deref());
        insert_optional(&mut attributes, "description", request.description.as_deref());
        Ok(attributes)
    }

    async fn after_create(
        repo: &mut ObjectRepository<'_>,
        request: &NewUser,
        dn: &DistinguishedName,
    ) -> Result<()> {
        let incomplete = |step: &str| {
            let dn = dn.to_string();
            let step = step.to_string();
            move |err: Error| Error::incomplete_create(dn, step, err)
        };

        let password = encode_password(request.password.expose_secret());
        repo.modify(dn, &[DirectoryModification::replace("unicodePwd", [password])])
            .await
            .map_err(incomplete("setting the initial password"))?;
        debug!(%dn, "initial password set");

        repo.modify(
            dn,
            &[DirectoryModification::replace(
                "userAccountControl",
                [ENABLED_USER.to_string()],
            )],
        )
        .await
        .map_err(incomplete("enabling the account"))?;

        let created = find_unique::<UserKind>(repo, &request.name, &request.container)
            .await
            .and_then(|user| {
                user.ok_or_else(|| Error::NotFound(format!("user `{}`", request.name)))
            })
            .map_err(incomplete("reading back the account"))?;
        let sid = created
            .sid
            .ok_or_else(|| Error::InvalidSid("objectSid missing from created account".to_string()))
            .map_err(incomplete("reading the security identifier"))?;

        let uid_number = sid.local_uid();
        repo.modify(
            dn,
            &[DirectoryModification::replace(
                "uidNumber",
                [uid_number.to_string()],
            )],
        )
        .await
        .map_err(incomplete("assigning the uid number"))?;

        info!(%dn, %sid, uid_number, "user account enabled");
        Ok(())
    }
}
