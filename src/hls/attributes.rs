//! Attribute lists as carried by `#EXT-X-KEY`, `#EXT-X-MEDIA`,
//! `#EXT-X-STREAM-INF` and similar tags.
//!
//! Entries are kept in their original order together with their original
//! quoting, so that formatting a parsed list reproduces the input exactly.

use std::fmt;
use thiserror::Error;

/// Reasons an attribute list can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeListError {
    #[error("attribute without '=' separator")]
    MissingSeparator,
    #[error("attribute with an empty or invalid name")]
    InvalidName,
    #[error("unterminated quoted string")]
    UnterminatedQuote,
    #[error("unexpected text after quoted string")]
    TrailingCharacters,
    #[error("trailing comma")]
    TrailingComma,
}

/// A single attribute value, remembering whether it was quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Quoted(String),
    Bare(String),
}

impl AttributeValue {
    /// The value without surrounding quotes.
    pub fn as_str(&self) -> &str {
        match self {
            AttributeValue::Quoted(value) | AttributeValue::Bare(value) => value,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Quoted(value) => write!(f, "\"{}\"", value),
            AttributeValue::Bare(value) => f.write_str(value),
        }
    }
}

/// Ordered `NAME=VALUE` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    entries: Vec<(String, AttributeValue)>,
}

impl AttributeList {
    /// Parse the value part of an attribute-list tag (the text after `:`).
    pub fn parse(input: &str) -> Result<Self, AttributeListError> {
        let mut entries = Vec::new();
        let mut rest = input;

        while !rest.is_empty() {
            let eq = rest.find('=').ok_or(AttributeListError::MissingSeparator)?;
            let name = &rest[..eq];
            if name.is_empty() || name.contains([',', '"']) {
                return Err(AttributeListError::InvalidName);
            }

            let after = &rest[eq + 1..];
            let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
                let close = quoted
                    .find('"')
                    .ok_or(AttributeListError::UnterminatedQuote)?;
                (
                    AttributeValue::Quoted(quoted[..close].to_string()),
                    &quoted[close + 1..],
                )
            } else {
                let end = after.find(',').unwrap_or(after.len());
                (AttributeValue::Bare(after[..end].to_string()), &after[end..])
            };
            entries.push((name.to_string(), value));

            rest = match remainder.strip_prefix(',') {
                Some("") => return Err(AttributeListError::TrailingComma),
                Some(next) => next,
                None if remainder.is_empty() => remainder,
                None => return Err(AttributeListError::TrailingCharacters),
            };
        }

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Unquoted value of `name`, if present.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(AttributeValue::as_str)
    }

    /// Replace the value of `name` in place, or append it when absent.
    pub fn set(&mut self, name: &str, value: AttributeValue) {
        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for AttributeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (name, value)) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}
