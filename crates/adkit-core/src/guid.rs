//! Directory object GUIDs.
//!
//! `objectGUID` values are 16 raw bytes whose first three fields are little-endian, the layout
//! [`Uuid::from_slice_le`] expects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Object GUID assigned by the directory server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectGuid(Uuid);

impl ObjectGuid {
    /// Creates a GUID wrapper from a [`Uuid`].
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Decodes the raw `objectGUID` attribute value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGuid`] if the value is not exactly 16 bytes.
    pub fn from_directory_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self(Uuid::from_slice_le(bytes)?))
    }

    /// Encodes the GUID in the directory's byte layout.
    #[must_use]
    pub fn to_directory_bytes(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }

    /// Returns the inner [`Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parses a GUID from its hyphenated string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid GUID.
    pub fn parse_str(input: &str) -> Result<Self> {
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|_| Error::InvalidGuid(input.to_string()))
    }
}

impl From<Uuid> for ObjectGuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for ObjectGuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

impl fmt::Display for ObjectGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
