//! Idempotent reconciliation shared by every entity kind.
//!
//! [`Reconciler`] implements the lookup, create-or-reject, move, rename, description update and
//! guarded delete policies once. Each entity kind only supplies an [`EntityKind`]: its filter,
//! naming attribute, object classes, create attributes and optional post-create step.

use crate::dn::{DistinguishedName, RelativeDistinguishedName};
use crate::repository::{AttributeChanges, ObjectRepository};
use crate::transport::{escape_filter_value, AttributeMap, DirectoryEntry};
use crate::Result;
use adkit_core::{DirectoryConfig, Error};
use async_trait::async_trait;
use std::marker::PhantomData;
use tracing::{debug, info, instrument, warn};

/// Result of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new entry was added.
    Created,
    /// The entry already existed at the requested DN.
    AlreadyExists,
}

/// Result of a move or rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// A modify-DN request was issued.
    Applied,
    /// The entry was already in the requested place; nothing was sent.
    Unchanged,
}

/// Typed projection of a directory entry.
pub trait DirectoryRecord {
    /// Value of the naming attribute.
    fn name(&self) -> &str;
    /// Distinguished name of the entry.
    fn dn(&self) -> &DistinguishedName;
}

/// Input of a create operation.
pub trait CreateRequest {
    /// Name of the new entry (the RDN value).
    fn name(&self) -> &str;
    /// Container the entry is created in.
    fn container(&self) -> &DistinguishedName;
    /// Description to set, if any.
    fn description(&self) -> Option<&str>;
}

/// Capabilities that specialise [`Reconciler`] for one kind of directory object.
#[async_trait]
pub trait EntityKind: Send + Sync + 'static {
    /// Record decoded from search results.
    type Record: DirectoryRecord + Send;
    /// Create request accepted by [`Reconciler::create`].
    type Request: CreateRequest + Send + Sync;

    /// Human-readable kind, used in errors and logs.
    const KIND: &'static str;
    /// RDN attribute (`cn` or `ou`).
    const NAMING_ATTRIBUTE: &'static str;
    /// Object classes of new entries.
    const OBJECT_CLASSES: &'static [&'static str];
    /// Attributes requested by lookups.
    const SEARCH_ATTRIBUTES: &'static [&'static str];
    /// Whether create on an existing entry re-applies the requested description.
    const REAPPLIES_DESCRIPTION: bool;

    /// Filter matching entries of this kind named `escaped_name`.
    ///
    /// The name is already filter-escaped.
    fn search_filter(escaped_name: &str) -> String;

    /// Decodes a search result.
    ///
    /// # Errors
    ///
    /// Fails when a mandatory attribute is missing or malformed.
    fn from_entry(entry: &DirectoryEntry) -> Result<Self::Record>;

    /// Attributes of a new entry, excluding `objectClass`.
    ///
    /// # Errors
    ///
    /// Fails when the request is invalid; nothing has been sent at that point.
    fn create_attributes(request: &Self::Request, config: &DirectoryConfig) -> Result<AttributeMap>;

    /// Runs after the entry was added.
    ///
    /// # Errors
    ///
    /// Failures leave the created entry in place.
    async fn after_create(
        _repo: &mut ObjectRepository<'_>,
        _request: &Self::Request,
        _dn: &DistinguishedName,
    ) -> Result<()> {
        Ok(())
    }
}

/// Looks up the single entry of kind `K` named `name` under `base`.
///
/// # Errors
///
/// Returns [`Error::AmbiguousResult`] when more than one entry matches.
pub(crate) async fn find_unique<K: EntityKind>(
    repo: &mut ObjectRepository<'_>,
    name: &str,
    base: &DistinguishedName,
) -> Result<Option<K::Record>> {
    let filter = K::search_filter(&escape_filter_value(name));
    let mut entries = repo.search(&filter, base, K::SEARCH_ATTRIBUTES).await?;

    match entries.len() {
        0 => Ok(None),
        1 => {
            let entry = entries.remove(0);
            K::from_entry(&entry).map(Some)
        }
        count => Err(Error::AmbiguousResult {
            kind: K::KIND.to_string(),
            name: name.to_string(),
            base: base.to_string(),
            count,
        }),
    }
}

/// Logs failures caused by the directory rather than by the request.
fn logged(err: Error) -> Error {
    if err.should_log() {
        warn!(code = err.error_code(), error = %err, "directory operation failed");
    }
    err
}

/// Reconciler for one entity kind, borrowing the client's session.
pub struct Reconciler<'a, K: EntityKind> {
    repo: ObjectRepository<'a>,
    config: &'a DirectoryConfig,
    kind: PhantomData<K>,
}

impl<'a, K: EntityKind> Reconciler<'a, K> {
    pub(crate) fn new(repo: ObjectRepository<'a>, config: &'a DirectoryConfig) -> Self {
        Self {
            repo,
            config,
            kind: PhantomData,
        }
    }

    /// Returns the entry named `name` under `base`, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AmbiguousResult`] if several entries match, or a transport error.
    pub async fn get(&mut self, name: &str, base: &DistinguishedName) -> Result<Option<K::Record>> {
        find_unique::<K>(&mut self.repo, name, base)
            .await
            .map_err(logged)
    }

    /// Creates the entry unless it already exists at the requested DN.
    ///
    /// An existing entry at the same DN is success; kinds that support it get the requested
    /// description re-applied. An entry with the same name elsewhere under the container is a
    /// conflict and nothing is changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`], a validation error, a transport error, or
    /// [`Error::IncompleteCreate`] when a post-create step fails after the entry was added.
    #[instrument(skip_all, fields(kind = K::KIND, name = request.name()))]
    pub async fn create(&mut self, request: &K::Request) -> Result<CreateOutcome> {
        let target = DistinguishedName::child(
            request.container(),
            K::NAMING_ATTRIBUTE,
            request.name(),
        );

        if let Some(existing) = self.get(request.name(), request.container()).await? {
            if !existing.dn().matches(&target) {
                return Err(Error::Conflict {
                    kind: K::KIND.to_string(),
                    name: request.name().to_string(),
                    existing: existing.dn().to_string(),
                    requested: target.to_string(),
                });
            }

            match request.description() {
                Some(description) if K::REAPPLIES_DESCRIPTION => {
                    debug!(dn = %target, "entry exists, re-applying description");
                    self.set_description(existing.dn(), description).await?;
                }
                _ => debug!(dn = %target, "entry exists, nothing to do"),
            }
            return Ok(CreateOutcome::AlreadyExists);
        }

        let attributes = K::create_attributes(request, self.config)?;
        self.repo
            .create(&target, K::OBJECT_CLASSES, attributes)
            .await?;
        K::after_create(&mut self.repo, request, &target)
            .await
            .map_err(logged)?;

        info!(dn = %target, "{} created", K::KIND);
        Ok(CreateOutcome::Created)
    }

    /// Moves the entry named `name` from under `base` into `new_container`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no such entry, or a transport error.
    pub async fn move_to(
        &mut self,
        name: &str,
        base: &DistinguishedName,
        new_container: &DistinguishedName,
    ) -> Result<ChangeOutcome> {
        let record = self.require(name, base).await?;
        let rdn = record.dn().rdn().clone();
        let target = new_container.clone().with_prefix(rdn.clone());

        if record.dn().matches(&target) {
            debug!(dn = %target, "{} already in target container", K::KIND);
            return Ok(ChangeOutcome::Unchanged);
        }

        self.repo
            .rename(record.dn(), &rdn, Some(new_container))
            .await?;
        info!(from = %record.dn(), to = %target, "{} moved", K::KIND);
        Ok(ChangeOutcome::Applied)
    }

    /// Renames the entry named `name` under `base` to `new_name`, keeping its container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no such entry, or a transport error.
    pub async fn rename(
        &mut self,
        name: &str,
        base: &DistinguishedName,
        new_name: &str,
    ) -> Result<ChangeOutcome> {
        let record = self.require(name, base).await?;
        if record.dn().rdn().value() == new_name {
            return Ok(ChangeOutcome::Unchanged);
        }

        let new_rdn = RelativeDistinguishedName::new(K::NAMING_ATTRIBUTE, new_name);
        self.repo.rename(record.dn(), &new_rdn, None).await?;
        info!(dn = %record.dn(), %new_name, "{} renamed", K::KIND);
        Ok(ChangeOutcome::Applied)
    }

    /// Replaces the description of the entry named `name` under `base`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no such entry, or a transport error.
    pub async fn update_description(
        &mut self,
        name: &str,
        base: &DistinguishedName,
        description: &str,
    ) -> Result<()> {
        let record = self.require(name, base).await?;
        self.set_description(record.dn(), description).await
    }

    /// Deletes `dn` unless it has subordinate entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HasChildren`] when the entry is a non-empty container, or a transport
    /// error (including when `dn` does not exist).
    pub async fn delete(&mut self, dn: &DistinguishedName) -> Result<()> {
        if let Some(child) = self.repo.first_child(dn).await.map_err(logged)? {
            return Err(Error::HasChildren {
                dn: dn.to_string(),
                child: child.dn,
            });
        }

        self.repo.delete(dn).await.map_err(logged)
    }

    async fn require(&mut self, name: &str, base: &DistinguishedName) -> Result<K::Record> {
        self.get(name, base).await?.ok_or_else(|| {
            Error::NotFound(format!("{} `{name}` under `{base}`", K::KIND))
        })
    }

    async fn set_description(&mut self, dn: &DistinguishedName, description: &str) -> Result<()> {
        let changes = AttributeChanges::new().replace("description", vec![description.to_string()]);
        self.repo.update(dn, &changes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computer::{ComputerKind, NewComputer};
    use crate::ou::{NewOrganizationalUnit, OrganizationalUnitKind};
    use crate::transport::{DirectoryModification, MockLdapSession, SearchScope};

    fn dn(value: &str) -> DistinguishedName {
        DistinguishedName::parse(value).unwrap()
    }

    fn config() -> DirectoryConfig {
        DirectoryConfig::new("dc01.example.com", "example.com").unwrap()
    }

    fn ou_entry(dn: &str, name: &str) -> DirectoryEntry {
        DirectoryEntry::new(dn)
            .with_attribute("ou", name)
            .with_attribute("description", "Staff accounts")
    }

    fn staff_request() -> NewOrganizationalUnit {
        NewOrganizationalUnit::new("Staff", dn("dc=example,dc=com"))
            .with_description("Staff accounts")
    }

    #[tokio::test]
    async fn get_returns_none_when_nothing_matches() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .withf(|base, _, filter, _| {
                base == "dc=example,dc=com" && filter == "(&(objectClass=organizationalUnit)(ou=Staff))"
            })
            .returning(|_, _, _, _| Ok(Vec::new()));

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let found = ous.get("Staff", &dn("dc=example,dc=com")).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn get_escapes_the_name_in_the_filter() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .withf(|_, _, filter, _| filter == "(&(objectClass=organizationalUnit)(ou=a\\2a))")
            .returning(|_, _, _, _| Ok(Vec::new()));

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        assert!(ous.get("a*", &dn("dc=example,dc=com")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_rejects_ambiguous_results() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![
                ou_entry("ou=Staff,dc=example,dc=com", "Staff"),
                ou_entry("ou=Staff,ou=Branch,dc=example,dc=com", "Staff"),
            ])
        });

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let err = ous
            .get("Staff", &dn("dc=example,dc=com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AmbiguousResult { count: 2, .. }));
    }

    #[tokio::test]
    async fn create_adds_missing_entry() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .times(1)
            .returning(|_, _, _, _| Ok(Vec::new()));
        session
            .expect_add()
            .withf(|dn, attributes| {
                dn == "ou=Staff,dc=example,dc=com"
                    && attributes.get("description") == Some(&vec!["Staff accounts".to_string()])
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let outcome = ous.create(&staff_request()).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created);
    }

    #[tokio::test]
    async fn create_twice_is_idempotent() {
        let mut session = MockLdapSession::new();
        let mut sequence = mockall::Sequence::new();
        session
            .expect_search()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _, _| Ok(Vec::new()));
        session
            .expect_add()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));
        session
            .expect_search()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _, _| Ok(vec![ou_entry("OU=Staff,DC=example,DC=com", "Staff")]));
        session
            .expect_modify()
            .withf(|dn, modifications| {
                dn == "OU=Staff,DC=example,DC=com"
                    && modifications
                        == [DirectoryModification::replace("description", ["Staff accounts"])]
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        assert_eq!(
            ous.create(&staff_request()).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            ous.create(&staff_request()).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn create_rejects_same_name_in_other_container() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![ou_entry("ou=Staff,ou=Branch,dc=example,dc=com", "Staff")])
        });

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let err = ous.create(&staff_request()).await.unwrap_err();

        match err {
            Error::Conflict {
                existing, requested, ..
            } => {
                assert_eq!(existing, "ou=Staff,ou=Branch,dc=example,dc=com");
                assert_eq!(requested, "ou=Staff,dc=example,dc=com");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn move_into_current_container_sends_nothing() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![DirectoryEntry::new("CN=web01,OU=Servers,DC=example,DC=com")
                .with_attribute("cn", "web01")])
        });

        let config = config();
        let mut computers =
            Reconciler::<ComputerKind>::new(ObjectRepository::new(&mut session), &config);
        let outcome = computers
            .move_to(
                "web01",
                &dn("ou=Servers,dc=example,dc=com"),
                &dn("ou=servers,dc=example,dc=com"),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ChangeOutcome::Unchanged);
    }

    #[tokio::test]
    async fn move_keeps_rdn_and_changes_container() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![DirectoryEntry::new("cn=web01,ou=Servers,dc=example,dc=com")
                .with_attribute("cn", "web01")])
        });
        session
            .expect_modify_dn()
            .withf(|dn, new_rdn, delete_old, new_superior| {
                dn == "cn=web01,ou=Servers,dc=example,dc=com"
                    && new_rdn == "cn=web01"
                    && *delete_old
                    && new_superior.as_deref() == Some("ou=Retired,dc=example,dc=com")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let config = config();
        let mut computers =
            Reconciler::<ComputerKind>::new(ObjectRepository::new(&mut session), &config);
        let outcome = computers
            .move_to(
                "web01",
                &dn("ou=Servers,dc=example,dc=com"),
                &dn("ou=Retired,dc=example,dc=com"),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ChangeOutcome::Applied);
    }

    #[tokio::test]
    async fn move_of_missing_entry_is_not_found() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .returning(|_, _, _, _| Ok(Vec::new()));

        let config = config();
        let mut computers =
            Reconciler::<ComputerKind>::new(ObjectRepository::new(&mut session), &config);
        let err = computers
            .move_to(
                "web01",
                &dn("ou=Servers,dc=example,dc=com"),
                &dn("ou=Retired,dc=example,dc=com"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn rename_issues_new_rdn_without_parent() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![ou_entry("ou=Staff,dc=example,dc=com", "Staff")])
        });
        session
            .expect_modify_dn()
            .withf(|dn, new_rdn, delete_old, new_superior| {
                dn == "ou=Staff,dc=example,dc=com"
                    && new_rdn == "ou=Employees"
                    && *delete_old
                    && new_superior.is_none()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let outcome = ous
            .rename("Staff", &dn("dc=example,dc=com"), "Employees")
            .await
            .unwrap();
        assert_eq!(outcome, ChangeOutcome::Applied);
    }

    #[tokio::test]
    async fn rename_to_same_name_is_unchanged() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![ou_entry("ou=Staff,dc=example,dc=com", "Staff")])
        });
        session.expect_modify_dn().times(0);

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let outcome = ous
            .rename("Staff", &dn("dc=example,dc=com"), "Staff")
            .await
            .unwrap();
        assert_eq!(outcome, ChangeOutcome::Unchanged);
    }

    #[tokio::test]
    async fn rename_changing_only_case_is_applied() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![ou_entry("ou=Staff,dc=example,dc=com", "Staff")])
        });
        session
            .expect_modify_dn()
            .withf(|dn, new_rdn, _, new_superior| {
                dn == "ou=Staff,dc=example,dc=com" && new_rdn == "ou=staff" && new_superior.is_none()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let outcome = ous
            .rename("Staff", &dn("dc=example,dc=com"), "staff")
            .await
            .unwrap();
        assert_eq!(outcome, ChangeOutcome::Applied);
    }

    #[tokio::test]
    async fn update_description_of_missing_entry_is_not_found() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .returning(|_, _, _, _| Ok(Vec::new()));

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let err = ous
            .update_description("Staff", &dn("dc=example,dc=com"), "text")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_refuses_container_with_children() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .withf(|base, scope, filter, attributes| {
                base == "ou=Staff,dc=example,dc=com"
                    && *scope == SearchScope::OneLevel
                    && filter == "(objectClass=*)"
                    && attributes == ["1.1"]
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(vec![DirectoryEntry::new("cn=jdoe,ou=Staff,dc=example,dc=com")])
            });
        session.expect_delete().times(0);

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let err = ous
            .delete(&dn("ou=Staff,dc=example,dc=com"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::HasChildren {
                dn: "ou=Staff,dc=example,dc=com".to_string(),
                child: "cn=jdoe,ou=Staff,dc=example,dc=com".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn delete_of_leaf_issues_one_delete() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .withf(|_, scope, _, _| *scope == SearchScope::OneLevel)
            .times(1)
            .returning(|_, _, _, _| Ok(Vec::new()));
        session
            .expect_delete()
            .withf(|dn| dn == "cn=web01,ou=Servers,dc=example,dc=com")
            .times(1)
            .returning(|_| Ok(()));

        let config = config();
        let mut computers =
            Reconciler::<ComputerKind>::new(ObjectRepository::new(&mut session), &config);
        computers
            .delete(&dn("cn=web01,ou=Servers,dc=example,dc=com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_child_lookup_is_not_reported_as_children() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .times(1)
            .returning(|base, _, _, _| Err(Error::transport("search", base, "busy")));
        session.expect_delete().times(0);

        let config = config();
        let mut ous =
            Reconciler::<OrganizationalUnitKind>::new(ObjectRepository::new(&mut session), &config);
        let err = ous
            .delete(&dn("ou=Staff,dc=example,dc=com"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    }

    #[tokio::test]
    async fn existing_computer_gets_description_reapplied() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![DirectoryEntry::new("cn=web01,ou=Servers,dc=example,dc=com")
                .with_attribute("cn", "web01")])
        });
        session
            .expect_modify()
            .withf(|_, modifications| {
                modifications == [DirectoryModification::replace("description", ["frontend"])]
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let config = config();
        let mut computers =
            Reconciler::<ComputerKind>::new(ObjectRepository::new(&mut session), &config);
        let request = NewComputer::new("web01", dn("ou=Servers,dc=example,dc=com"))
            .with_description("frontend");
        assert_eq!(
            computers.create(&request).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
    }
}
