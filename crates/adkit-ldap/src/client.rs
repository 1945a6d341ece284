//! Directory client: owns one bound session and hands out per-kind reconcilers.

use crate::{
    computer::ComputerKind,
    dn::DistinguishedName,
    group::GroupKind,
    ou::OrganizationalUnitKind,
    reconciler::{ChangeOutcome, Reconciler},
    repository::{ObjectRepository, NO_ATTRIBUTES},
    transport::{
        escape_filter_value, DirectoryModification, LdapConnector, LdapSession, RealLdapConnector,
        SearchScope,
    },
    user::UserKind,
    Result,
};
use adkit_core::{BindCredentials, DirectoryConfig};
use tracing::{info, instrument};

/// Reconciler for user accounts.
pub type Users<'a> = Reconciler<'a, UserKind>;
/// Reconciler for groups.
pub type Groups<'a> = Reconciler<'a, GroupKind>;
/// Reconciler for organizational units.
pub type OrganizationalUnits<'a> = Reconciler<'a, OrganizationalUnitKind>;
/// Reconciler for computer accounts.
pub type Computers<'a> = Reconciler<'a, ComputerKind>;

/// Client bound to a directory server.
///
/// Operations run one at a time over a single session; reconcilers borrow the client mutably.
pub struct DirectoryClient {
    config: DirectoryConfig,
    session: Box<dyn LdapSession>,
}

impl DirectoryClient {
    /// Connects to the configured server and binds with `credentials`.
    ///
    /// A principal that is neither a DN nor already qualified is bound as `principal@domain`.
    ///
    /// # Errors
    ///
    /// Returns [`adkit_core::Error::ConfigError`] for an invalid configuration,
    /// [`adkit_core::Error::ValidationError`] when no bind user is given,
    /// [`adkit_core::Error::Connection`] if the server is unreachable, or
    /// [`adkit_core::Error::Authentication`] if the bind is rejected.
    pub async fn connect(config: DirectoryConfig, credentials: &BindCredentials) -> Result<Self> {
        config.check()?;
        let connector = RealLdapConnector::new(config.clone());
        Self::connect_with(config, &connector, credentials).await
    }

    #[instrument(skip_all, fields(host = %config.host, principal = credentials.principal()))]
    pub(crate) async fn connect_with(
        config: DirectoryConfig,
        connector: &dyn LdapConnector,
        credentials: &BindCredentials,
    ) -> Result<Self> {
        credentials.check()?;
        let mut session = connector.connect().await?;
        let principal = credentials.bind_principal(&config.domain);
        session
            .simple_bind(&principal, credentials.bind_password())
            .await?;
        info!(%principal, "bound to directory");
        Ok(Self { config, session })
    }

    /// Connection configuration in use.
    #[must_use]
    pub const fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Base DN of the configured domain.
    ///
    /// # Errors
    ///
    /// Returns [`adkit_core::Error::InvalidRequest`] if the domain does not form a valid DN.
    pub fn domain_dn(&self) -> Result<DistinguishedName> {
        Ok(DistinguishedName::parse(self.config.domain_dn())?)
    }

    /// User account reconciler.
    pub fn users(&mut self) -> Users<'_> {
        Reconciler::new(ObjectRepository::new(self.session.as_mut()), &self.config)
    }

    /// Group reconciler.
    pub fn groups(&mut self) -> Groups<'_> {
        Reconciler::new(ObjectRepository::new(self.session.as_mut()), &self.config)
    }

    /// Organizational unit reconciler.
    pub fn organizational_units(&mut self) -> OrganizationalUnits<'_> {
        Reconciler::new(ObjectRepository::new(self.session.as_mut()), &self.config)
    }

    /// Computer account reconciler.
    pub fn computers(&mut self) -> Computers<'_> {
        Reconciler::new(ObjectRepository::new(self.session.as_mut()), &self.config)
    }

    /// Adds `user_dn` to the `member` attribute of `group_dn`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the group does not exist or the modify fails.
    pub async fn add_user_to_group(
        &mut self,
        user_dn: &DistinguishedName,
        group_dn: &DistinguishedName,
    ) -> Result<ChangeOutcome> {
        if self.is_member(user_dn, group_dn).await? {
            return Ok(ChangeOutcome::Unchanged);
        }
        ObjectRepository::new(self.session.as_mut())
            .modify(
                group_dn,
                &[DirectoryModification::add("member", [user_dn.to_string()])],
            )
            .await?;
        info!(user = %user_dn, group = %group_dn, "added group member");
        Ok(ChangeOutcome::Applied)
    }

    /// Removes `user_dn` from the `member` attribute of `group_dn`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the group does not exist or the modify fails.
    pub async fn remove_user_from_group(
        &mut self,
        user_dn: &DistinguishedName,
        group_dn: &DistinguishedName,
    ) -> Result<ChangeOutcome> {
        if !self.is_member(user_dn, group_dn).await? {
            return Ok(ChangeOutcome::Unchanged);
        }
        ObjectRepository::new(self.session.as_mut())
            .modify(
                group_dn,
                &[DirectoryModification::delete("member", [user_dn.to_string()])],
            )
            .await?;
        info!(user = %user_dn, group = %group_dn, "removed group member");
        Ok(ChangeOutcome::Applied)
    }

    /// Unbinds and drops the session.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the unbind request fails.
    pub async fn close(mut self) -> Result<()> {
        self.session.unbind().await
    }

    async fn is_member(
        &mut self,
        user_dn: &DistinguishedName,
        group_dn: &DistinguishedName,
    ) -> Result<bool> {
        let filter = format!(
            "(&(objectClass=group)(member={}))",
            escape_filter_value(&user_dn.to_string())
        );
        let entries = ObjectRepository::new(self.session.as_mut())
            .search_scoped(&filter, group_dn, SearchScope::Base, NO_ATTRIBUTES)
            .await?;
        Ok(!entries.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DirectoryEntry, MockLdapConnector, MockLdapSession};
    use adkit_core::Error;

    fn config() -> DirectoryConfig {
        DirectoryConfig::new("dc01.example.com", "example.com").unwrap()
    }

    fn dn(value: &str) -> DistinguishedName {
        DistinguishedName::parse(value).unwrap()
    }

    fn connector_with(session: MockLdapSession) -> MockLdapConnector {
        let mut connector = MockLdapConnector::new();
        let mut session = Some(session);
        connector.expect_connect().times(1).returning(move || {
            let session = session.take().expect("connect called once");
            Ok(Box::new(session) as Box<dyn LdapSession>)
        });
        connector
    }

    async fn client(session: MockLdapSession) -> DirectoryClient {
        let mut session = session;
        session.expect_simple_bind().returning(|_, _| Ok(()));
        let connector = connector_with(session);
        DirectoryClient::connect_with(
            config(),
            &connector,
            &BindCredentials::new("administrator", "pw"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn binds_with_qualified_principal() {
        let mut session = MockLdapSession::new();
        session
            .expect_simple_bind()
            .withf(|principal, password| {
                principal == "administrator@example.com" && password == "pw"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let connector = connector_with(session);

        let client = DirectoryClient::connect_with(
            config(),
            &connector,
            &BindCredentials::new("administrator", "pw"),
        )
        .await
        .unwrap();
        assert_eq!(
            client.domain_dn().unwrap().to_string(),
            "dc=example,dc=com"
        );
    }

    #[tokio::test]
    async fn empty_principal_is_rejected_before_connecting() {
        let mut connector = MockLdapConnector::new();
        connector.expect_connect().times(0);

        let result = DirectoryClient::connect_with(
            config(),
            &connector,
            &BindCredentials::new("", "pw"),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::ValidationError(ref message)) if message == "no bind user specified"
        ));
    }

    #[tokio::test]
    async fn rejected_bind_is_authentication_error() {
        let mut session = MockLdapSession::new();
        session.expect_simple_bind().returning(|principal, _| {
            Err(Error::Authentication {
                principal: principal.to_string(),
                message: "invalid credentials".to_string(),
            })
        });
        let connector = connector_with(session);

        let result = DirectoryClient::connect_with(
            config(),
            &connector,
            &BindCredentials::new("cn=admin,dc=example,dc=com", "wrong"),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::Authentication { ref principal, .. }) if principal == "cn=admin,dc=example,dc=com"
        ));
    }

    #[tokio::test]
    async fn add_member_when_missing() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .withf(|base, scope, filter, _| {
                base == "cn=ops,ou=Groups,dc=example,dc=com"
                    && *scope == SearchScope::Base
                    && filter
                        == "(&(objectClass=group)(member=cn=jdoe,ou=People,dc=example,dc=com))"
            })
            .returning(|_, _, _, _| Ok(Vec::new()));
        session
            .expect_modify()
            .withf(|dn, modifications| {
                dn == "cn=ops,ou=Groups,dc=example,dc=com"
                    && modifications
                        == [DirectoryModification::add(
                            "member",
                            ["cn=jdoe,ou=People,dc=example,dc=com"],
                        )]
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut client = client(session).await;
        let outcome = client
            .add_user_to_group(
                &dn("cn=jdoe,ou=People,dc=example,dc=com"),
                &dn("cn=ops,ou=Groups,dc=example,dc=com"),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ChangeOutcome::Applied);
    }

    #[tokio::test]
    async fn add_existing_member_is_unchanged() {
        let mut session = MockLdapSession::new();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![DirectoryEntry::new("CN=ops,OU=Groups,DC=example,DC=com")])
        });

        let mut client = client(session).await;
        let outcome = client
            .add_user_to_group(
                &dn("cn=jdoe,ou=People,dc=example,dc=com"),
                &dn("cn=ops,ou=Groups,dc=example,dc=com"),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ChangeOutcome::Unchanged);
    }

    #[tokio::test]
    async fn remove_non_member_is_unchanged() {
        let mut session = MockLdapSession::new();
        session
            .expect_search()
            .returning(|_, _, _, _| Ok(Vec::new()));

        let mut client = client(session).await;
        let outcome = client
            .remove_user_from_group(
                &dn("cn=jdoe,ou=People,dc=example,dc=com"),
                &dn("cn=ops,ou=Groups,dc=example,dc=com"),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ChangeOutcome::Unchanged);
    }

    #[tokio::test]
    async fn close_unbinds() {
        let mut session = MockLdapSession::new();
        session.expect_unbind().times(1).returning(|| Ok(()));

        let client = client(session).await;
        client.close().await.unwrap();
    }
}
