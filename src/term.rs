//! Terms: the typed identifiers that make up a triple.
//!
//! A term is either a reference to an entity or a literal value carrying a
//! datatype tag (string, integer, datetime, URI, boolean).

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subject, predicate or object slot value.
///
/// Terms are totally ordered so that triple sets and query results iterate
/// deterministically.
///
/// # Examples
///
/// ```
/// use pactgraph::Term;
///
/// let system = Term::entity("pact:hr-portal");
/// let owner = Term::string("root");
/// let port = Term::int(443);
///
/// assert!(system.is_entity());
/// assert!(owner.is_literal());
/// assert_eq!(port.as_int(), Some(443));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Term {
    Entity(String),
    String(String),
    Int(i64),
    DateTime(DateTime<Utc>),
    Uri(String),
    Bool(bool),
}

impl Term {
    /// Creates an entity reference.
    #[must_use]
    pub fn entity(id: impl Into<String>) -> Self {
        Self::Entity(id.into())
    }

    /// Creates a plain string literal.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Creates an integer literal.
    #[must_use]
    pub const fn int(value: i64) -> Self {
        Self::Int(value)
    }

    /// Creates a datetime literal.
    #[must_use]
    pub const fn datetime(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }

    /// Creates a URI literal.
    #[must_use]
    pub fn uri(value: impl Into<String>) -> Self {
        Self::Uri(value.into())
    }

    pub const fn is_entity(&self) -> bool {
        matches!(self, Self::Entity(_))
    }

    pub const fn is_literal(&self) -> bool {
        !self.is_entity()
    }

    pub fn as_entity(&self) -> Option<&str> {
        match self {
            Self::Entity(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the lexical form used for regex matching and message rendering.
    #[must_use]
    pub fn lexical(&self) -> String {
        match self {
            Self::Entity(v) | Self::String(v) | Self::Uri(v) => v.clone(),
            Self::Int(v) => v.to_string(),
            Self::DateTime(v) => v.to_rfc3339(),
            Self::Bool(v) => v.to_string(),
        }
    }

    /// Returns the datatype tag name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Entity(_) => "entity",
            Self::String(_) => "string",
            Self::Int(_) => "integer",
            Self::DateTime(_) => "datetime",
            Self::Uri(_) => "uri",
            Self::Bool(_) => "boolean",
        }
    }

    /// Compares two terms by value when their datatypes are comparable.
    ///
    /// Returns `None` for mismatched datatypes; the derived `Ord` is a storage
    /// order and must not be used for policy comparisons.
    #[must_use]
    pub fn compare_value(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b))
            | (Self::Uri(a), Self::Uri(b))
            | (Self::Entity(a), Self::Entity(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(v) => write!(f, "<{v}>"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{}^^datetime", v.to_rfc3339()),
            Self::Uri(v) => write!(f, "{v:?}^^uri"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Term {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Term {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Term {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Term {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Term {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Term {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_term_constructors() {
        assert!(Term::entity("pact:System").is_entity());
        assert_eq!(Term::string("root").as_str(), Some("root"));
        assert_eq!(Term::int(22).as_int(), Some(22));
        assert!(Term::uri("https://example.com").is_literal());
    }

    #[test]
    fn test_term_type_mismatch() {
        let t = Term::string("22");
        assert!(t.as_int().is_none());
        assert!(t.as_entity().is_none());
    }

    #[test]
    fn test_compare_value_same_type() {
        assert_eq!(Term::int(1).compare_value(&Term::int(2)), Some(Ordering::Less));
        let a = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 7, 0, 0, 0).unwrap();
        assert_eq!(
            Term::datetime(b).compare_value(&Term::datetime(a)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_compare_value_mismatched_types() {
        assert_eq!(Term::int(1).compare_value(&Term::string("1")), None);
        assert_eq!(Term::entity("a").compare_value(&Term::string("a")), None);
    }

    #[test]
    fn test_lexical_form() {
        assert_eq!(Term::entity("pact:x").lexical(), "pact:x");
        assert_eq!(Term::int(-4).lexical(), "-4");
        assert_eq!(Term::Bool(true).lexical(), "true");
    }

    #[test]
    fn test_display() {
        assert_eq!(Term::entity("pact:x").to_string(), "<pact:x>");
        assert_eq!(Term::string("hi").to_string(), "\"hi\"");
        assert_eq!(Term::int(42).to_string(), "42");
    }

    #[test]
    fn test_term_serialization() {
        let t = Term::string("File is owned by root user");
        let json = serde_json::to_string(&t).unwrap();
        let back: Term = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
        assert!(json.contains("\"type\":\"string\""));
    }
}
