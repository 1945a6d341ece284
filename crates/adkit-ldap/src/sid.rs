//! Security identifier (`objectSid`) decoding.
//!
//! Binary layout:
//!
//! | offset | width | order         | field                     |
//! |--------|-------|---------------|---------------------------|
//! | 0      | 1     | -             | revision                  |
//! | 1      | 1     | -             | sub-authority count `N`   |
//! | 2      | 6     | big-endian    | identifier authority      |
//! | 8      | 4 × N | little-endian | sub-authorities           |
//!
//! The decoder reads each field through a [`FieldLayout`] so short buffers, a zero or oversized
//! count and trailing bytes all come back as a [`SidError`] instead of an out-of-bounds panic.

use bytes::Buf;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use adkit_core::Error as CoreError;

/// Offset added to a RID to obtain the local uid number.
pub const UID_OFFSET: u32 = 1000;

/// Largest sub-authority count a well-formed identifier carries.
pub const MAX_SUB_AUTHORITIES: u8 = 15;

/// Errors produced while decoding or parsing a security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SidError {
    /// The buffer ended inside a field.
    #[error("truncated security identifier: {field} needs {needed} bytes, {available} left")]
    Truncated {
        /// Field being read
        field: &'static str,
        /// Bytes required by the field
        needed: usize,
        /// Bytes remaining in the buffer
        available: usize,
    },
    /// The identifier has no sub-authorities, so it has no RID.
    #[error("security identifier has no sub-authorities")]
    NoSubAuthorities,
    /// The count field exceeds the protocol maximum.
    #[error("security identifier declares {0} sub-authorities, at most 15 are allowed")]
    TooManySubAuthorities(usize),
    /// Bytes remain after the declared sub-authorities.
    #[error("security identifier has {0} trailing bytes after the declared sub-authorities")]
    TrailingBytes(usize),
    /// The identifier authority does not fit in 48 bits.
    #[error("identifier authority {0} does not fit in 48 bits")]
    AuthorityOutOfRange(u64),
    /// The textual form could not be parsed.
    #[error("malformed security identifier string `{0}`")]
    Malformed(String),
}

impl From<SidError> for CoreError {
    fn from(err: SidError) -> Self {
        CoreError::InvalidSid(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Big,
    Little,
}

/// Width and byte order of one fixed-size field of the binary record.
#[derive(Debug, Clone, Copy)]
struct FieldLayout {
    name: &'static str,
    width: usize,
    order: ByteOrder,
}

impl FieldLayout {
    const fn new(name: &'static str, width: usize, order: ByteOrder) -> Self {
        Self { name, width, order }
    }

    fn read<B: Buf>(&self, buf: &mut B) -> Result<u64, SidError> {
        if buf.remaining() < self.width {
            return Err(SidError::Truncated {
                field: self.name,
                needed: self.width,
                available: buf.remaining(),
            });
        }
        Ok(match self.order {
            ByteOrder::Big => buf.get_uint(self.width),
            ByteOrder::Little => buf.get_uint_le(self.width),
        })
    }

    fn write(&self, out: &mut Vec<u8>, value: u64) {
        let bytes = match self.order {
            ByteOrder::Big => value.to_be_bytes()[8 - self.width..].to_vec(),
            ByteOrder::Little => value.to_le_bytes()[..self.width].to_vec(),
        };
        out.extend_from_slice(&bytes);
    }
}

const REVISION: FieldLayout = FieldLayout::new("revision", 1, ByteOrder::Little);
const SUB_AUTHORITY_COUNT: FieldLayout =
    FieldLayout::new("sub-authority count", 1, ByteOrder::Little);
const AUTHORITY: FieldLayout = FieldLayout::new("identifier authority", 6, ByteOrder::Big);
const SUB_AUTHORITY: FieldLayout = FieldLayout::new("sub-authority", 4, ByteOrder::Little);

const MAX_AUTHORITY: u64 = (1 << 48) - 1;

/// Decoded security identifier.
///
/// Always holds at least one sub-authority; the last one is the RID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecurityIdentifier {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl SecurityIdentifier {
    /// Builds an identifier from its parts.
    ///
    /// # Errors
    ///
    /// Fails when `sub_authorities` is empty or longer than 15, or when `authority` exceeds
    /// 48 bits.
    pub fn new(revision: u8, authority: u64, sub_authorities: Vec<u32>) -> Result<Self, SidError> {
        if sub_authorities.is_empty() {
            return Err(SidError::NoSubAuthorities);
        }
        if sub_authorities.len() > usize::from(MAX_SUB_AUTHORITIES) {
            return Err(SidError::TooManySubAuthorities(sub_authorities.len()));
        }
        if authority > MAX_AUTHORITY {
            return Err(SidError::AuthorityOutOfRange(authority));
        }
        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Decodes the binary `objectSid` attribute value.
    ///
    /// # Errors
    ///
    /// Returns a [`SidError`] for truncated input, a zero or oversized sub-authority count, or
    /// bytes left over after the declared sub-authorities.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, SidError> {
        let buf = &mut bytes;
        // Single-byte fields always fit their target type.
        let revision = u8::try_from(REVISION.read(buf)?).unwrap_or_default();
        let count = usize::try_from(SUB_AUTHORITY_COUNT.read(buf)?).unwrap_or_default();
        if count == 0 {
            return Err(SidError::NoSubAuthorities);
        }
        if count > usize::from(MAX_SUB_AUTHORITIES) {
            return Err(SidError::TooManySubAuthorities(count));
        }

        let authority = AUTHORITY.read(buf)?;
        let sub_authorities = (0..count)
            .map(|_| {
                SUB_AUTHORITY
                    .read(buf)
                    .map(|value| u32::try_from(value).unwrap_or_default())
            })
            .collect::<Result<Vec<_>, _>>()?;

        if buf.has_remaining() {
            return Err(SidError::TrailingBytes(buf.remaining()));
        }

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Encodes the identifier in its binary layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 4 * self.sub_authorities.len());
        REVISION.write(&mut out, u64::from(self.revision));
        SUB_AUTHORITY_COUNT.write(&mut out, u64::from(self.sub_authority_count()));
        AUTHORITY.write(&mut out, self.authority);
        for value in &self.sub_authorities {
            SUB_AUTHORITY.write(&mut out, u64::from(*value));
        }
        out
    }

    /// Revision level.
    #[must_use]
    pub const fn revision(&self) -> u8 {
        self.revision
    }

    /// Number of sub-authorities.
    #[must_use]
    pub fn sub_authority_count(&self) -> u8 {
        // Bounded by MAX_SUB_AUTHORITIES at construction.
        u8::try_from(self.sub_authorities.len()).unwrap_or(MAX_SUB_AUTHORITIES)
    }

    /// 48-bit identifier authority.
    #[must_use]
    pub const fn authority(&self) -> u64 {
        self.authority
    }

    /// Sub-authorities in order.
    #[must_use]
    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// Relative identifier: the last sub-authority.
    #[must_use]
    pub fn rid(&self) -> u32 {
        // Non-empty by construction.
        self.sub_authorities[self.sub_authorities.len() - 1]
    }

    /// Local uid number derived from the RID (`RID + 1000`).
    #[must_use]
    pub fn local_uid(&self) -> u64 {
        u64::from(self.rid()) + u64::from(UID_OFFSET)
    }
}

impl fmt::Display for SecurityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-", self.revision)?;
        if self.authority > u64::from(u32::MAX) {
            write!(f, "0x{:012X}", self.authority)?;
        } else {
            write!(f, "{}", self.authority)?;
        }
        for value in &self.sub_authorities {
            write!(f, "-{value}")?;
        }
        Ok(())
    }
}

impl FromStr for SecurityIdentifier {
    type Err = SidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SidError::Malformed(s.to_string());
        let mut parts = s.split('-');

        if !parts.next().is_some_and(|prefix| prefix.eq_ignore_ascii_case("S")) {
            return Err(malformed());
        }
        let revision = parts
            .next()
            .and_then(|part| part.parse::<u8>().ok())
            .ok_or_else(malformed)?;
        let authority = parts
            .next()
            .and_then(|part| match part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => part.parse::<u64>().ok(),
            })
            .ok_or_else(malformed)?;
        let sub_authorities = parts
            .map(|part| part.parse::<u32>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(revision, authority, sub_authorities)
    }
}

impl Serialize for SecurityIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SecurityIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
