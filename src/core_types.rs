//! Core scalar types shared across the ingestion pipeline.
//!
//! Mirrors the teacher's habit of keeping small, cheaply-cloneable newtypes
//! at the root of the crate rather than passing bare `String`/`u64` through
//! every signature.

use std::fmt;
use std::sync::Arc;

/// A trading symbol as reported by a provider (e.g. `"AAPL"`, `"BTC-USD"`).
///
/// Backed by `Arc<str>` so collectors, the pipeline, and the sink can clone
/// it freely without re-allocating on every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

impl serde::Serialize for Symbol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Symbol {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Symbol::from(s))
    }
}

/// Identifies a provider/venue adapter (e.g. `"alpaca"`, `"polygon"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(Arc<str>);

impl ProviderId {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl serde::Serialize for ProviderId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ProviderId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ProviderId::new(s))
    }
}

/// ISO 10383 Market Identifier Code for a venue, when known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Mic(pub String);

impl fmt::Display for Mic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotone ordinal assigned within a `(source, symbol)` stream (§3).
pub type SeqNum = u64;

/// WAL record sequence number, monotone within an epoch (§4.2).
pub type WalSeq = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_cheap_clone_eq() {
        let a = Symbol::new("AAPL");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "AAPL");
    }

    #[test]
    fn provider_id_from_str() {
        let p: ProviderId = "alpaca".into();
        assert_eq!(p.to_string(), "alpaca");
    }

    #[test]
    fn symbol_json_roundtrip() {
        let s = Symbol::new("MSFT");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"MSFT\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
