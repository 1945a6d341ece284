//! Generic object repository over a borrowed directory session.
//!
//! Every entity lookup goes through [`ObjectRepository::search`], and every mutation goes through
//! one of the methods below, so existence checks behave the same for all entity kinds.

use crate::dn::{DistinguishedName, RelativeDistinguishedName};
use crate::transport::{AttributeMap, DirectoryEntry, DirectoryModification, LdapSession, SearchScope};
use crate::Result;
use tracing::{debug, info};

/// Matches every entry.
pub(crate) const ANY_OBJECT_FILTER: &str = "(objectClass=*)";
/// Requests no attributes, only DNs.
pub(crate) const NO_ATTRIBUTES: &[&str] = &["1.1"];

/// Attribute edits applied to one entry in a single modify request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeChanges {
    added: AttributeMap,
    changed: AttributeMap,
    removed: AttributeMap,
}

impl AttributeChanges {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds values to an attribute.
    #[must_use]
    pub fn add(mut self, attribute: impl Into<String>, values: Vec<String>) -> Self {
        self.added.insert(attribute.into(), values);
        self
    }

    /// Replaces all values of an attribute.
    #[must_use]
    pub fn replace(mut self, attribute: impl Into<String>, values: Vec<String>) -> Self {
        self.changed.insert(attribute.into(), values);
        self
    }

    /// Removes values from an attribute; an empty list removes the attribute.
    #[must_use]
    pub fn remove(mut self, attribute: impl Into<String>, values: Vec<String>) -> Self {
        self.removed.insert(attribute.into(), values);
        self
    }

    /// Returns true when no edit is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Modifications in add, replace, remove order.
    #[must_use]
    pub fn to_modifications(&self) -> Vec<DirectoryModification> {
        let added = self
            .added
            .iter()
            .map(|(attribute, values)| DirectoryModification::add(attribute.as_str(), values.clone()));
        let changed = self.changed.iter().map(|(attribute, values)| {
            DirectoryModification::replace(attribute.as_str(), values.clone())
        });
        let removed = self.removed.iter().map(|(attribute, values)| {
            DirectoryModification::delete(attribute.as_str(), values.clone())
        });
        added.chain(changed).chain(removed).collect()
    }
}

/// Search and mutation primitives shared by every entity kind.
pub struct ObjectRepository<'a> {
    session: &'a mut dyn LdapSession,
}

impl<'a> ObjectRepository<'a> {
    pub(crate) fn new(session: &'a mut dyn LdapSession) -> Self {
        Self { session }
    }

    /// Searches the subtree under `base`.
    ///
    /// An empty result is not an error.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the search fails.
    pub async fn search(
        &mut self,
        filter: &str,
        base: &DistinguishedName,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>> {
        self.search_scoped(filter, base, SearchScope::Subtree, attributes)
            .await
    }

    /// Searches `base` with an explicit scope.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the search fails.
    pub async fn search_scoped(
        &mut self,
        filter: &str,
        base: &DistinguishedName,
        scope: SearchScope,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>> {
        let base = base.to_string();
        let entries = self
            .session
            .search(&base, scope, filter, attributes)
            .await?;
        debug!(%base, ?scope, %filter, count = entries.len(), "directory search");
        Ok(entries)
    }

    /// Returns one entry directly below `dn`, if there is any.
    ///
    /// Only immediate children are requested, so large containers stay under server size limits.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the search fails.
    pub async fn first_child(&mut self, dn: &DistinguishedName) -> Result<Option<DirectoryEntry>> {
        let children = self
            .search_scoped(ANY_OBJECT_FILTER, dn, SearchScope::OneLevel, NO_ATTRIBUTES)
            .await?;
        Ok(children.into_iter().next())
    }

    /// Adds a new entry with the given object classes and attributes.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the entry exists or the server rejects it.
    pub async fn create(
        &mut self,
        dn: &DistinguishedName,
        object_classes: &[&str],
        mut attributes: AttributeMap,
    ) -> Result<()> {
        attributes.insert(
            "objectClass".to_string(),
            object_classes.iter().map(ToString::to_string).collect(),
        );
        let dn = dn.to_string();
        self.session.add(&dn, &attributes).await?;
        info!(%dn, "created directory entry");
        Ok(())
    }

    /// Applies added, changed and removed attributes as one modify request.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the modify request fails.
    pub async fn update(&mut self, dn: &DistinguishedName, changes: &AttributeChanges) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.modify(dn, &changes.to_modifications()).await
    }

    /// Sends an ordered list of modifications as one request.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the modify request fails.
    pub async fn modify(
        &mut self,
        dn: &DistinguishedName,
        modifications: &[DirectoryModification],
    ) -> Result<()> {
        let dn = dn.to_string();
        self.session.modify(&dn, modifications).await?;
        debug!(
            %dn,
            attributes = ?modifications.iter().map(DirectoryModification::attribute).collect::<Vec<_>>(),
            "modified directory entry"
        );
        Ok(())
    }

    /// Renames an entry and optionally moves it under `new_parent`.
    ///
    /// The old RDN value is deleted from the entry.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the modify-DN request fails.
    pub async fn rename(
        &mut self,
        dn: &DistinguishedName,
        new_rdn: &RelativeDistinguishedName,
        new_parent: Option<&DistinguishedName>,
    ) -> Result<()> {
        let dn = dn.to_string();
        let new_rdn = new_rdn.to_string();
        let new_parent = new_parent.map(ToString::to_string);
        self.session
            .modify_dn(&dn, &new_rdn, true, new_parent.clone())
            .await?;
        info!(%dn, %new_rdn, new_parent = ?new_parent, "renamed directory entry");
        Ok(())
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the entry has children or does not exist.
    pub async fn delete(&mut self, dn: &DistinguishedName) -> Result<()> {
        let dn = dn.to_string();
        self.session.delete(&dn).await?;
        info!(%dn, "deleted directory entry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockLdapSession;
    use adkit_core::Error;

    fn dn(value: &str) -> DistinguishedName {
        DistinguishedName::parse(value).unwrap()
    }

    #[tokio::test]
    async fn search_uses_subtree_scope() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .withf(|base, scope, filter, attributes| {
                base == "ou=People,dc=example,dc=com"
                    && *scope == SearchScope::Subtree
                    && filter == "(cn=jdoe)"
                    && attributes == ["cn"]
            })
            .times(1)
            .returning(|_, _, _, _| Ok(Vec::new()));

        let mut repo = ObjectRepository::new(&mut session);
        let entries = repo
            .search("(cn=jdoe)", &dn("ou=People,dc=example,dc=com"), &["cn"])
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn first_child_searches_one_level_only() {
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

        let mut repo = ObjectRepository::new(&mut session);
        let child = repo
            .first_child(&dn("ou=Staff,dc=example,dc=com"))
            .await
            .unwrap();
        assert_eq!(
            child.map(|entry| entry.dn),
            Some("cn=jdoe,ou=Staff,dc=example,dc=com".to_string())
        );
    }

    #[tokio::test]
    async fn create_adds_object_classes() {
        let mut session = MockLdapSession::new();
        session
            .expect_add()
            .withf(|dn, attributes| {
                dn == "ou=Staff,dc=example,dc=com"
                    && attributes.get("objectClass")
                        == Some(&vec!["organizationalUnit".to_string(), "top".to_string()])
                    && attributes.get("ou") == Some(&vec!["Staff".to_string()])
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut attributes = AttributeMap::new();
        attributes.insert("ou".to_string(), vec!["Staff".to_string()]);

        let mut repo = ObjectRepository::new(&mut session);
        repo.create(
            &dn("ou=Staff,dc=example,dc=com"),
            &["organizationalUnit", "top"],
            attributes,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn update_sends_one_combined_request() {
        let mut session = MockLdapSession::new();
        session
            .expect_modify()
            .withf(|dn, modifications| {
                dn == "cn=ops,dc=example,dc=com"
                    && modifications
                        == [
                            DirectoryModification::add("member", ["cn=a"]),
                            DirectoryModification::replace("description", ["Operators"]),
                            DirectoryModification::delete("info", Vec::<String>::new()),
                        ]
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let changes = AttributeChanges::new()
            .add("member", vec!["cn=a".to_string()])
            .replace("description", vec!["Operators".to_string()])
            .remove("info", Vec::new());

        let mut repo = ObjectRepository::new(&mut session);
        repo.update(&dn("cn=ops,dc=example,dc=com"), &changes)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_update_is_not_sent() {
        let mut session = MockLdapSession::new();
        let mut repo = ObjectRepository::new(&mut session);
        repo.update(&dn("cn=ops,dc=example,dc=com"), &AttributeChanges::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rename_deletes_old_rdn() {
        let mut session = MockLdapSession::new();
        session
            .expect_modify_dn()
            .withf(|dn, new_rdn, delete_old, new_superior| {
                dn == "cn=web01,ou=Old,dc=example,dc=com"
                    && new_rdn == "cn=web01"
                    && *delete_old
                    && new_superior.as_deref() == Some("ou=New,dc=example,dc=com")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut repo = ObjectRepository::new(&mut session);
        repo.rename(
            &dn("cn=web01,ou=Old,dc=example,dc=com"),
            &RelativeDistinguishedName::new("cn", "web01"),
            Some(&dn("ou=New,dc=example,dc=com")),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn delete_propagates_transport_error() {
        let mut session = MockLdapSession::new();
        session
            .expect_delete()
            .times(1)
            .returning(|dn| Err(Error::transport("delete", dn, "noSuchObject")));

        let mut repo = ObjectRepository::new(&mut session);
        let err = repo
            .delete(&dn("cn=gone,dc=example,dc=com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { ref operation, .. } if operation == "delete"));
    }
}
