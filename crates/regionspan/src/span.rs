//! Key spans
//!
//! A [`Span`] is a half-open byte range `[start, end)` in the upstream
//! keyspace. Keys compare as raw bytes. An empty end key means "no upper
//! bound"; call [`Span::hack`] before comparing such a span against others.

use crate::error::{Result, SpanError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key that sorts after every key the upstream store hands out.
pub const UPPER_BOUND_KEY: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Half-open key range `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    #[serde(with = "hex_key")]
    pub start: Bytes,
    #[serde(with = "hex_key")]
    pub end: Bytes,
}

impl Span {
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Create a span, rejecting `end <= start`
    pub fn try_new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Result<Self> {
        let span = Self::new(start, end);
        if span.start >= span.end {
            return Err(SpanError::invalid_span(&span.start, &span.end));
        }
        Ok(span)
    }

    /// Parse a span from hex-encoded keys
    pub fn from_hex(start: &str, end: &str) -> Result<Self> {
        Self::try_new(hex::decode(start)?, hex::decode(end)?)
    }

    /// The whole keyspace, `["", UPPER_BOUND_KEY)`
    pub fn full() -> Self {
        Self::new(Bytes::new(), Bytes::from_static(UPPER_BOUND_KEY))
    }

    /// Replace an empty (unbounded) end key with [`UPPER_BOUND_KEY`]
    pub fn hack(mut self) -> Self {
        if self.end.is_empty() {
            self.end = Bytes::from_static(UPPER_BOUND_KEY);
        }
        self
    }

    /// True if the span covers no keys
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        &self.start[..] <= key && key < &self.end[..]
    }

    /// True if `other` is entirely inside this span
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection of two spans, `None` when they are disjoint
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        if !self.overlaps(other) {
            return None;
        }
        let start = self.start.clone().max(other.start.clone());
        let end = self.end.clone().min(other.end.clone());
        Some(Span { start, end })
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", hex::encode(&self.start), hex::encode(&self.end))
    }
}

/// Serialize keys as lowercase hex strings
mod hex_key {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(val: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(val))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
