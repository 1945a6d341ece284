//! Helpers for turning [`DirectoryEntry`] attributes into typed record fields.

use crate::dn::DistinguishedName;
use crate::sid::SecurityIdentifier;
use crate::transport::DirectoryEntry;
use crate::Result;
use adkit_core::{Error, ObjectGuid};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

pub(crate) fn entry_dn(entry: &DirectoryEntry) -> Result<DistinguishedName> {
    Ok(DistinguishedName::parse(&entry.dn)?)
}

/// Naming attribute value, falling back to the entry's own RDN.
pub(crate) fn entry_name(entry: &DirectoryEntry, dn: &DistinguishedName, attribute: &str) -> String {
    entry
        .first(attribute)
        .map_or_else(|| dn.rdn().value().to_string(), ToString::to_string)
}

pub(crate) fn optional(entry: &DirectoryEntry, attribute: &str) -> Option<String> {
    entry
        .first(attribute)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

pub(crate) fn object_guid(entry: &DirectoryEntry) -> Result<Option<ObjectGuid>> {
    entry
        .first_bytes("objectGUID")
        .map(ObjectGuid::from_directory_bytes)
        .transpose()
}

pub(crate) fn object_sid(entry: &DirectoryEntry) -> Result<Option<SecurityIdentifier>> {
    entry
        .first_bytes("objectSid")
        .map(|bytes| SecurityIdentifier::decode(bytes).map_err(Error::from))
        .transpose()
}

pub(crate) fn integer<T: std::str::FromStr>(entry: &DirectoryEntry, attribute: &str) -> Option<T> {
    entry.first(attribute).and_then(|value| match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring non-numeric `{attribute}` value `{value}` on `{}`", entry.dn);
            None
        }
    })
}

pub(crate) fn dn_values(entry: &DirectoryEntry, attribute: &str) -> Vec<DistinguishedName> {
    entry
        .values(attribute)
        .map(|values| {
            values
                .iter()
                .filter_map(|value| match DistinguishedName::parse(value) {
                    Ok(dn) => Some(dn),
                    Err(err) => {
                        warn!("Failed to parse `{attribute}` DN `{value}`: {err}");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parses an LDAP GeneralizedTime such as `20240115103000.0Z`.
pub(crate) fn timestamp(entry: &DirectoryEntry, attribute: &str) -> Option<DateTime<Utc>> {
    let value = entry.first(attribute)?;
    let whole_seconds = value.trim_end_matches('Z').split('.').next()?;
    NaiveDateTime::parse_from_str(whole_seconds, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}
