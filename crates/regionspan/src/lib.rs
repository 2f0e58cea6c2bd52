//! # regionspan
//!
//! Key-range ownership and checkpoint tracking for region-based change data
//! capture.
//!
//! Every region of the upstream store is subscribed to by its own task. The
//! tasks share one [`RegionRangeLock`] per changefeed keyspace which:
//!
//! - makes sure no key is streamed by two subscriptions at once, even while
//!   regions split and merge under live streams
//! - remembers, per key range, the checkpoint each finished subscription
//!   reached, so the next owner resumes from the right timestamp
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │ region 1   │ │ region 2   │ │ region N   │   one task per region
//! └─────┬──────┘ └─────┬──────┘ └─────┬──────┘
//!       │ lock_range / unlock_range   │
//!       ▼              ▼              ▼
//! ┌─────────────────────────────────────────────┐
//! │              RegionRangeLock                │
//! │  locked ranges (by start key, by region id) │
//! │  RangeTsMap (checkpoint per key segment)    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The lock does no I/O and spawns nothing; it is driven entirely by the
//! region tasks calling into it.

pub mod config;
pub mod error;
pub mod lock;
pub mod observability;
pub mod span;
pub mod ts_map;

pub use config::{RangeLockConfig, RangeLockConfigBuilder};
pub use error::{Result, SpanError};
pub use lock::{LockAttempt, LockRangeResult, LockStats, LockedRange, RegionRangeLock, WaitSignals};
pub use observability::RangeLockMetrics;
pub use span::{Span, UPPER_BOUND_KEY};
pub use ts_map::{RangeTsMap, UNKNOWN_TS};

/// Re-export common types
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::lock::*;
    pub use crate::span::*;
    pub use crate::ts_map::*;
}
