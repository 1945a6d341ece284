//! Distinguished names.
//!
//! Parsing follows RFC 4514 closely enough for directory-issued names: `\`-escapes (both the
//! `\,` form and the two-digit hex form) are decoded, and the canonical rendering re-escapes the
//! special characters. Multi-valued RDNs (`cn=a+uid=b`) are rejected because no entity this crate
//! manages is named that way.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use adkit_core::Error as CoreError;

/// Errors that can occur when parsing distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component has no `=` separator or is empty.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component was missing the attribute name to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component was missing the value to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The distinguished name ended with an escape character.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
    /// A hex escape did not decode to valid UTF-8.
    #[error("distinguished name contains an invalid escape sequence: {0}")]
    InvalidEscape(String),
    /// The component joins several attribute/value pairs with `+`.
    #[error("multi-valued relative distinguished names are not supported: {0}")]
    MultiValuedRdn(String),
}

impl From<DistinguishedNameError> for CoreError {
    fn from(err: DistinguishedNameError) -> Self {
        CoreError::InvalidRequest(err.to_string())
    }
}

/// Relative distinguished name: the leftmost `attribute=value` step of a DN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Creates an RDN from an attribute name and an unescaped value.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute portion of the RDN (e.g. `cn`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped value portion of the RDN.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if this RDN names the given attribute (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

impl fmt::Display for RelativeDistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute, escape_value(&self.value))
    }
}

/// Parsed distinguished name, most specific RDN first.
///
/// Equality (`==`) is exact; use [`DistinguishedName::matches`] for the case-insensitive
/// comparison directory servers apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistinguishedName {
    rdns: Vec<RelativeDistinguishedName>,
}

impl DistinguishedName {
    /// Parses a distinguished name.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the input is empty or malformed.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, DistinguishedNameError> {
        let input = trim_component(input.as_ref());
        if input.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let rdns = split_unescaped(input, ',')?
            .into_iter()
            .map(parse_rdn)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rdns })
    }

    /// Builds `<attribute>=<value>,<container>`.
    #[must_use]
    pub fn child(container: &DistinguishedName, attribute: &str, value: &str) -> Self {
        container
            .clone()
            .with_prefix(RelativeDistinguishedName::new(attribute, value))
    }

    /// Canonical string form.
    #[must_use]
    pub fn as_string(&self) -> String {
        self.rdns
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Relative distinguished names in order, most specific first.
    #[must_use]
    pub fn rdns(&self) -> &[RelativeDistinguishedName] {
        &self.rdns
    }

    /// The leftmost RDN.
    #[must_use]
    pub fn rdn(&self) -> &RelativeDistinguishedName {
        &self.rdns[0]
    }

    /// The container holding this entry, or `None` for a single-RDN name.
    #[must_use]
    pub fn parent(&self) -> Option<DistinguishedName> {
        (self.rdns.len() > 1).then(|| Self {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    /// Value of the first RDN naming `attribute` (case-insensitive).
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.rdns
            .iter()
            .find(|rdn| rdn.matches_attribute(attribute))
            .map(RelativeDistinguishedName::value)
    }

    /// Case-insensitive comparison of two names.
    #[must_use]
    pub fn matches(&self, other: &DistinguishedName) -> bool {
        self.rdns.len() == other.rdns.len()
            && self.rdns.iter().zip(&other.rdns).all(|(left, right)| {
                left.matches_attribute(right.attribute())
                    && left.value.to_lowercase() == right.value.to_lowercase()
            })
    }

    /// Returns a new name with `rdn` prepended.
    #[must_use]
    pub fn with_prefix(mut self, rdn: RelativeDistinguishedName) -> Self {
        self.rdns.insert(0, rdn);
        self
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DistinguishedName> for String {
    fn from(value: DistinguishedName) -> Self {
        value.as_string()
    }
}

/// Splits on `delimiter` where it is not escaped; escapes are kept for later decoding.
fn split_unescaped(input: &str, delimiter: char) -> Result<Vec<&str>, DistinguishedNameError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            _ if ch == delimiter => {
                parts.push(trim_component(&input[start..idx]));
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }

    if escaped {
        return Err(DistinguishedNameError::UnterminatedEscape);
    }
    parts.push(trim_component(&input[start..]));

    if parts.iter().any(|part| part.is_empty()) {
        return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

/// Trims surrounding whitespace, keeping a trailing space that is escaped.
fn trim_component(part: &str) -> &str {
    let part = part.trim_start();
    let mut end = 0;
    let mut escaped = false;

    for (idx, ch) in part.char_indices() {
        if escaped || !ch.is_whitespace() {
            end = idx + ch.len_utf8();
        }
        escaped = !escaped && ch == '\\';
    }

    &part[..end]
}

fn parse_rdn(component: &str) -> Result<RelativeDistinguishedName, DistinguishedNameError> {
    if split_unescaped(component, '+')?.len() > 1 {
        return Err(DistinguishedNameError::MultiValuedRdn(component.to_string()));
    }

    let (attribute, value) = component
        .split_once('=')
        .ok_or_else(|| DistinguishedNameError::InvalidComponent(component.to_string()))?;
    let attribute = attribute.trim();
    let value = value.trim_start();

    if attribute.is_empty() {
        return Err(DistinguishedNameError::MissingAttribute(
            component.to_string(),
        ));
    }
    if value.is_empty() {
        return Err(DistinguishedNameError::MissingValue(attribute.to_string()));
    }

    Ok(RelativeDistinguishedName::new(attribute, unescape_value(value)?))
}

fn unescape_value(value: &str) -> Result<String, DistinguishedNameError> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        let first = chars
            .next()
            .ok_or(DistinguishedNameError::UnterminatedEscape)?;
        let hex_pair = first
            .to_digit(16)
            .zip(chars.peek().and_then(|next| next.to_digit(16)));
        match hex_pair {
            Some((high, low)) => {
                chars.next();
                // Both digits are < 16, so the pair fits in a byte.
                bytes.push(u8::try_from(high * 16 + low).unwrap_or_default());
            }
            None => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(first.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    String::from_utf8(bytes).map_err(|_| DistinguishedNameError::InvalidEscape(value.to_string()))
}

fn escape_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());

    for (idx, ch) in value.chars().enumerate() {
        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (idx == 0 && matches!(ch, ' ' | '#'))
            || (idx == last && ch == ' ');
        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
}
