//! Idempotent management of users, groups, organizational units and computers in an
//! Active Directory style LDAP directory.
//!
//! A [`DirectoryClient`] owns one bound session. Each entity kind is managed through a
//! [`Reconciler`] obtained from the client; create, move and rename are safe to repeat and
//! report whether anything was sent to the server.
//!
//! ```no_run
//! use adkit_core::{BindCredentials, DirectoryConfig};
//! use adkit_ldap::{CreateOutcome, DirectoryClient, NewOrganizationalUnit};
//!
//! # async fn example() -> adkit_ldap::Result<()> {
//! let config = DirectoryConfig::new("dc01.example.com", "example.com")?;
//! let credentials = BindCredentials::new("administrator", "secret");
//! let mut client = DirectoryClient::connect(config, &credentials).await?;
//!
//! let base = client.domain_dn()?;
//! let request = NewOrganizationalUnit::new("Staff", base).with_description("Staff accounts");
//! if client.organizational_units().create(&request).await? == CreateOutcome::Created {
//!     println!("created ou=Staff");
//! }
//! client.close().await
//! # }
//! ```

#![deny(missing_docs)]

mod client;
mod computer;
mod decode;
mod dn;
mod group;
mod ou;
mod reconciler;
mod repository;
mod sid;
mod transport;
mod user;

pub use client::{Computers, DirectoryClient, Groups, OrganizationalUnits, Users};
pub use computer::{Computer, ComputerKind, NewComputer};
pub use dn::{DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use group::{group_type, Group, GroupKind, GroupScope, NewGroup};
pub use ou::{NewOrganizationalUnit, OrganizationalUnit, OrganizationalUnitKind};
pub use reconciler::{
    ChangeOutcome, CreateOutcome, CreateRequest, DirectoryRecord, EntityKind, Reconciler,
};
pub use repository::{AttributeChanges, ObjectRepository};
pub use sid::{SecurityIdentifier, SidError, MAX_SUB_AUTHORITIES, UID_OFFSET};
pub use transport::{
    escape_filter_value, AttributeMap, DirectoryEntry, DirectoryModification, SearchScope,
};
pub use user::{encode_password, AccountControl, NewUser, User, UserKind};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = adkit_core::Result<T>;
