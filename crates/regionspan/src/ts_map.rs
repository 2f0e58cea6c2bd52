//! Range timestamp map
//!
//! Tracks a checkpoint timestamp for every key of a keyspace without storing
//! one entry per key. The keyspace is cut into contiguous segments; each
//! entry holds the timestamp in effect from its start key up to the start key
//! of the next entry.
//!
//! ```text
//!   "a"        "c"             "f"        "z"
//!    │   ts=7   │     ts=3      │  ts=9    │ (sentinel, u64::MAX)
//!    └──────────┴───────────────┴──────────┘
//! ```
//!
//! The map always covers `[start, end)` of the keyspace it was created with.
//! An extra sentinel entry at the end key carries `u64::MAX` so it never
//! wins a minimum.

use crate::span::Span;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};

/// Timestamp meaning "no information yet"
pub const UNKNOWN_TS: u64 = u64::MAX;

/// Map from key range to timestamp
#[derive(Debug, Clone)]
pub struct RangeTsMap {
    span: Span,
    entries: BTreeMap<Bytes, u64>,
}

impl RangeTsMap {
    /// Create a map covering `span` with a single timestamp
    pub fn new(span: Span, start_ts: u64) -> Self {
        assert!(
            span.start < span.end,
            "range ts map needs a non-empty span, got {}",
            span
        );
        let mut map = Self {
            span: span.clone(),
            entries: BTreeMap::new(),
        };
        map.set(&span.start, &span.end, start_ts);
        map
    }

    /// The keyspace this map covers
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Overwrite the timestamp of `[start, end)`. Keys outside keep theirs.
    pub fn set(&mut self, start: &[u8], end: &[u8], ts: u64) {
        self.check_bounds(start, end);

        if !self.entries.contains_key(end) {
            // Clip the segment running past `end` so the right side keeps its ts.
            let tail_ts = self
                .entries
                .range::<[u8], _>((Unbounded, Included(end)))
                .next_back()
                .map(|(_, ts)| *ts)
                .unwrap_or(UNKNOWN_TS);
            self.entries.insert(Bytes::copy_from_slice(end), tail_ts);
        }

        let covered: Vec<Bytes> = self
            .entries
            .range::<[u8], _>((Included(start), Excluded(end)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in covered {
            self.entries.remove(&key);
        }

        self.entries.insert(Bytes::copy_from_slice(start), ts);
    }

    /// Minimum timestamp among `[start, end)`. `end` must be greater than `start`.
    pub fn get_min(&self, start: &[u8], end: &[u8]) -> u64 {
        self.check_bounds(start, end);

        let head = self
            .entries
            .range::<[u8], _>((Unbounded, Included(start)))
            .next_back()
            .map(|(_, ts)| *ts)
            .unwrap_or(UNKNOWN_TS);

        self.entries
            .range::<[u8], _>((Excluded(start), Excluded(end)))
            .map(|(_, ts)| *ts)
            .fold(head, u64::min)
    }

    /// Number of covering segments (the sentinel is not counted)
    pub fn len(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Covering segments in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (Span, u64)> + '_ {
        let mut upper = self.entries.keys().skip(1);
        self.entries.iter().map_while(move |(start, ts)| {
            upper
                .next()
                .map(|end| (Span::new(start.clone(), end.clone()), *ts))
        })
    }

    fn check_bounds(&self, start: &[u8], end: &[u8]) {
        assert!(
            start < end,
            "empty or inverted range [{}, {})",
            hex::encode(start),
            hex::encode(end)
        );
        assert!(
            &self.span.start[..] <= start && end <= &self.span.end[..],
            "range [{}, {}) is outside of {}",
            hex::encode(start),
            hex::encode(end),
            self.span
        );
    }
}
