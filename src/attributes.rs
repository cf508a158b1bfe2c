//! Newline-separated `Key=Value` attribute blocks.
//!
//! Attribute blocks carry the out-of-band parts of the protocol: the login
//! payload embedded in the handshake and the checksum control messages. Keys
//! are case-sensitive and unique; insertion order is preserved so a block
//! renders back exactly as it was built.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Errors raised while building or parsing an [`AttributeBlock`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttributeError {
    /// A line had no `=` separator.
    #[error("line {line} has no '=' separator")]
    MissingSeparator {
        /// One-based line number.
        line: usize,
    },
    /// A key was empty or contained a reserved character.
    #[error("invalid attribute key {key:?}")]
    InvalidKey {
        /// Offending key.
        key: String,
    },
    /// A value contained a line break.
    #[error("value for {key:?} contains a line break")]
    InvalidValue {
        /// Key whose value was rejected.
        key: String,
    },
    /// The same key appeared twice.
    #[error("duplicate attribute {key:?}")]
    Duplicate {
        /// Repeated key.
        key: String,
    },
}

/// Ordered collection of unique `Key=Value` pairs.
///
/// # Examples
///
/// ```
/// use muxframe::attributes::AttributeBlock;
///
/// let mut block = AttributeBlock::new();
/// block.insert("Command", "Checksum").unwrap();
/// block.insert("Counter", "100").unwrap();
///
/// let text = block.to_string();
/// assert_eq!(text, "Command=Checksum\nCounter=100");
/// let parsed: AttributeBlock = text.parse().unwrap();
/// assert_eq!(parsed.get("Counter"), Some("100"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeBlock {
    entries: Vec<(String, String)>,
}

fn validate_key(key: &str) -> Result<(), AttributeError> {
    if key.is_empty() || key.trim() != key || key.contains(['=', '\n', '\r']) {
        return Err(AttributeError::InvalidKey {
            key: key.to_owned(),
        });
    }
    Ok(())
}

impl AttributeBlock {
    /// Create an empty block.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Insert or replace `key`.
    ///
    /// # Errors
    ///
    /// Rejects empty or whitespace-padded keys, keys containing `=` or line
    /// breaks, and values containing line breaks. Values are kept verbatim.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), AttributeError> {
        let key = key.into();
        let value = value.into();
        validate_key(&key)?;
        if value.contains(['\n', '\r']) {
            return Err(AttributeError::InvalidValue { key });
        }
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    ///
    /// # Errors
    ///
    /// See [`insert`](Self::insert).
    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, AttributeError> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Look up the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns `true` when the block has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for AttributeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for AttributeBlock {
    type Err = AttributeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut block = Self::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or(AttributeError::MissingSeparator { line: index + 1 })?;
            let key = key.trim();
            validate_key(key)?;
            if block.get(key).is_some() {
                return Err(AttributeError::Duplicate {
                    key: key.to_owned(),
                });
            }
            block
                .entries
                .push((key.to_owned(), value.to_owned()));
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn preserves_insertion_order_and_replaces_in_place() {
        let mut block = AttributeBlock::new();
        block.insert("b", "1").expect("insert b");
        block.insert("a", "2").expect("insert a");
        block.insert("b", "3").expect("replace b");
        assert_eq!(block.to_string(), "b=3\na=2");
    }

    #[test]
    fn values_may_contain_separator() {
        let block: AttributeBlock = "Password=a=b".parse().expect("parse");
        assert_eq!(block.get("Password"), Some("a=b"));
    }

    #[test]
    fn blank_lines_and_crlf_are_tolerated() {
        let block: AttributeBlock = "A=1\r\n\r\nB = 2 \r\n".parse().expect("parse");
        assert_eq!(block.get("A"), Some("1"));
        assert_eq!(block.get("B"), Some(" 2 "));
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn padded_values_round_trip_verbatim() {
        let block = AttributeBlock::new()
            .with("Password", " pw ")
            .and_then(|b| b.with("Motto", "\tlead and trail\t"))
            .expect("block");
        let parsed: AttributeBlock = block.to_string().parse().expect("parse");
        assert_eq!(parsed, block);
        assert_eq!(parsed.get("Password"), Some(" pw "));
    }

    #[rstest]
    #[case("NoSeparator", AttributeError::MissingSeparator { line: 1 })]
    #[case("=value", AttributeError::InvalidKey { key: String::new() })]
    #[case("A=1\nA=2", AttributeError::Duplicate { key: "A".into() })]
    fn rejects_malformed_text(#[case] text: &str, #[case] expected: AttributeError) {
        assert_eq!(text.parse::<AttributeBlock>(), Err(expected));
    }

    #[test]
    fn rejects_line_breaks_in_values() {
        let mut block = AttributeBlock::new();
        assert!(matches!(
            block.insert("Key", "two\nlines"),
            Err(AttributeError::InvalidValue { .. })
        ));
        assert!(block.is_empty());
    }

    #[test]
    fn rejects_padded_keys() {
        assert_eq!(
            AttributeBlock::new().with(" Key", "v"),
            Err(AttributeError::InvalidKey { key: " Key".into() })
        );
    }
}
