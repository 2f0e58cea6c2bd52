//! # Region Range Lock
//!
//! Grants exclusive ownership of key ranges to region subscriptions and
//! tracks the checkpoint of every key in between.
//!
//! Regions split and merge while their change streams are live, so two
//! subscriptions may claim overlapping ranges at the same time. Claims are
//! ordered by the region epoch version:
//!
//! - no overlapping claim: the range is locked and the caller receives the
//!   minimum checkpoint left behind by previous owners of the range
//! - an overlapping claim with the same or a newer version: the request is
//!   stale, only the uncovered parts of the range are worth retrying
//! - only older overlapping claims: the request waits until they are all
//!   unlocked, then scans again
//!
//! A region can hold at most one range. A second claim for the same region
//! conflicts with the first one even when the two ranges are disjoint.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use regionspan::{LockRangeResult, RegionRangeLock, Span};
//! use tokio_util::sync::CancellationToken;
//!
//! let lock = RegionRangeLock::new(Span::full(), start_ts, "changefeed-1", 1);
//! let cancel = CancellationToken::new();
//!
//! match lock.lock_range(&span, region_id, version, &cancel).await {
//!     LockRangeResult::Success { checkpoint_ts } => {
//!         // subscribe from checkpoint_ts ...
//!         lock.unlock_range(&span, region_id, version, resolved_ts);
//!     }
//!     LockRangeResult::Stale { retry_ranges } => { /* reload regions for retry_ranges */ }
//!     LockRangeResult::Cancelled => {}
//! }
//! ```

use crate::config::RangeLockConfig;
use crate::error::Result;
use crate::observability::RangeLockMetrics;
use crate::span::Span;
use crate::ts_map::RangeTsMap;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Outcome of a single non-blocking lock attempt
#[derive(Debug)]
pub enum LockAttempt {
    /// The range is locked. `checkpoint_ts` is the minimum checkpoint over it.
    Success { checkpoint_ts: u64 },
    /// A claim with the same or a newer version covers part of the range.
    /// `retry_ranges` are the uncovered parts, ascending and disjoint.
    Stale { retry_ranges: Vec<Span> },
    /// Older claims overlap the range. Wait on the signals, then try again.
    Wait(WaitSignals),
}

impl LockAttempt {
    fn resolve(self) -> std::result::Result<LockRangeResult, WaitSignals> {
        match self {
            LockAttempt::Success { checkpoint_ts } => Ok(LockRangeResult::Success { checkpoint_ts }),
            LockAttempt::Stale { retry_ranges } => Ok(LockRangeResult::Stale { retry_ranges }),
            LockAttempt::Wait(signals) => Err(signals),
        }
    }
}

/// Final outcome of [`RegionRangeLock::lock_range`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockRangeResult {
    /// The range is locked. `checkpoint_ts` is the minimum checkpoint over it.
    Success { checkpoint_ts: u64 },
    /// The claim lost to a same or newer version. Only `retry_ranges` are
    /// left to subscribe to.
    Stale { retry_ranges: Vec<Span> },
    /// The cancellation token fired while waiting. Nothing was locked.
    Cancelled,
}

/// One-shot signals, one per claim a blocked attempt is waiting on
#[derive(Debug)]
pub struct WaitSignals {
    signals: Vec<oneshot::Receiver<()>>,
}

impl WaitSignals {
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Wait until every signal fired. Returns `false` if `cancel` fired first.
    ///
    /// Signals are awaited one after another. Firing one of them says nothing
    /// about the others, so the caller must scan again afterwards.
    pub async fn wait(self, cancel: &CancellationToken) -> bool {
        for signal in self.signals {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                // Err means the lock was dropped with the claim still held.
                _ = signal => {}
            }
        }
        true
    }
}

/// Snapshot of one locked range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedRange {
    pub span: Span,
    pub region_id: u64,
    pub version: u64,
    /// Blocked attempts still waiting on this range
    pub waiters: usize,
}

/// Lock occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    pub locked_ranges: usize,
    pub pending_waiters: usize,
}

#[derive(Debug)]
struct LockEntry {
    span: Span,
    region_id: u64,
    version: u64,
    waiters: Vec<oneshot::Sender<()>>,
}

impl LockEntry {
    fn pending_waiters(&self) -> usize {
        self.waiters.iter().filter(|w| !w.is_closed()).count()
    }
}

impl fmt::Display for LockEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "region {} {}, version {}, {} waiters",
            self.region_id,
            self.span,
            self.version,
            self.waiters.len()
        )
    }
}

#[derive(Debug)]
struct LockState {
    checkpoints: RangeTsMap,
    /// Locked ranges by start key
    entries: BTreeMap<Bytes, LockEntry>,
    /// Region id -> start key of its entry
    regions: HashMap<u64, Bytes>,
}

impl LockState {
    /// Start keys of the entries conflicting with a claim, ascending by key.
    /// The entry of `region_id` is appended last when it does not overlap.
    fn conflicts(&self, span: &Span, region_id: u64) -> Vec<Bytes> {
        let mut keys = Vec::new();
        let mut region_found = false;

        let before = self
            .entries
            .range::<[u8], _>((Unbounded, Included(&span.start[..])))
            .next_back();
        if let Some((key, entry)) = before {
            if entry.span.start < span.start && span.start < entry.span.end {
                region_found |= entry.region_id == region_id;
                keys.push(key.clone());
            }
        }

        for (key, entry) in self
            .entries
            .range::<[u8], _>((Included(&span.start[..]), Excluded(&span.end[..])))
        {
            region_found |= entry.region_id == region_id;
            keys.push(key.clone());
        }

        if !region_found {
            if let Some(key) = self.regions.get(&region_id) {
                keys.push(key.clone());
            }
        }

        keys
    }
}

/// Parts of `span` not covered by `conflicts`. Conflicts must be sorted by start key.
fn retry_ranges(span: &Span, conflicts: &[&LockEntry]) -> Vec<Span> {
    let mut retry = Vec::new();
    let mut cursor = span.start.clone();

    for entry in conflicts {
        // Entries found through the region index may lie elsewhere.
        if !entry.span.overlaps(span) {
            continue;
        }
        if cursor < entry.span.start {
            retry.push(Span::new(cursor, entry.span.start.clone()));
        }
        cursor = entry.span.end.clone();
    }
    if cursor < span.end {
        retry.push(Span::new(cursor, span.end.clone()));
    }

    retry
}

/// Exclusive lock over region key ranges, with checkpoint tracking
#[derive(Debug)]
pub struct RegionRangeLock {
    id: u64,
    changefeed: String,
    state: Mutex<LockState>,
}

impl RegionRangeLock {
    /// Create a lock over `span` whose keys all start at checkpoint `start_ts`
    pub fn new(span: Span, start_ts: u64, changefeed: impl Into<String>, lock_id: u64) -> Self {
        Self {
            id: lock_id,
            changefeed: changefeed.into(),
            state: Mutex::new(LockState {
                checkpoints: RangeTsMap::new(span, start_ts),
                entries: BTreeMap::new(),
                regions: HashMap::new(),
            }),
        }
    }

    pub fn from_config(config: &RangeLockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.span.clone(),
            config.start_ts,
            config.changefeed.clone(),
            config.lock_id,
        ))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn changefeed(&self) -> &str {
        &self.changefeed
    }

    /// Try to lock `span` for a region without blocking
    pub fn try_lock_range(&self, span: &Span, region_id: u64, version: u64) -> LockAttempt {
        assert!(
            span.start < span.end,
            "cannot lock empty or inverted span {}",
            span
        );

        let mut state = self.state.lock();
        let keys = state.conflicts(span, region_id);

        if keys.is_empty() {
            let checkpoint_ts = state.checkpoints.get_min(&span.start, &span.end);
            state.entries.insert(
                span.start.clone(),
                LockEntry {
                    span: span.clone(),
                    region_id,
                    version,
                    waiters: Vec::new(),
                },
            );
            state.regions.insert(region_id, span.start.clone());
            let locked = state.entries.len();
            drop(state);

            RangeLockMetrics::increment_acquired();
            RangeLockMetrics::set_locked_ranges(self.id, locked);
            info!(
                lock_id = self.id,
                changefeed = %self.changefeed,
                region_id,
                version,
                checkpoint_ts,
                start_key = %hex::encode(&span.start),
                end_key = %hex::encode(&span.end),
                "range locked"
            );
            return LockAttempt::Success { checkpoint_ts };
        }

        let mut conflicts: Vec<&LockEntry> = Vec::with_capacity(keys.len());
        for key in &keys {
            match state.entries.get(key) {
                Some(entry) => conflicts.push(entry),
                None => self.invariant_violation(
                    "region entry points at no locked range",
                    format!(
                        "region {} {}, version {}, dangling start key {}",
                        region_id,
                        span,
                        version,
                        hex::encode(key)
                    ),
                ),
            }
        }
        let overlapping: Vec<String> = conflicts.iter().map(|e| e.to_string()).collect();

        if conflicts.iter().any(|e| e.version >= version) {
            let retry_ranges = retry_ranges(span, &conflicts);
            drop(state);

            RangeLockMetrics::increment_stale();
            info!(
                lock_id = self.id,
                changefeed = %self.changefeed,
                region_id,
                version,
                start_key = %hex::encode(&span.start),
                end_key = %hex::encode(&span.end),
                ?overlapping,
                retry_ranges = retry_ranges.len(),
                "range lock stale"
            );
            return LockAttempt::Stale { retry_ranges };
        }

        let mut signals = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(entry) = state.entries.get_mut(key) {
                // Cancelled attempts dropped their receivers.
                entry.waiters.retain(|w| !w.is_closed());
                let (tx, rx) = oneshot::channel();
                entry.waiters.push(tx);
                signals.push(rx);
            }
        }
        drop(state);
        debug_assert!(!signals.is_empty(), "wait without signals");

        RangeLockMetrics::increment_blocked();
        debug!(
            lock_id = self.id,
            changefeed = %self.changefeed,
            region_id,
            version,
            start_key = %hex::encode(&span.start),
            end_key = %hex::encode(&span.end),
            blocked_by = ?overlapping,
            "range lock blocked"
        );
        LockAttempt::Wait(WaitSignals { signals })
    }

    /// Lock `span` for a region, waiting for older overlapping claims to be
    /// unlocked. Cancellation is only observed while waiting.
    pub async fn lock_range(
        &self,
        span: &Span,
        region_id: u64,
        version: u64,
        cancel: &CancellationToken,
    ) -> LockRangeResult {
        let mut signals = match self.try_lock_range(span, region_id, version).resolve() {
            Ok(result) => return result,
            Err(signals) => signals,
        };

        let blocked_at = Instant::now();
        loop {
            if !signals.wait(cancel).await {
                RangeLockMetrics::increment_cancelled();
                debug!(
                    lock_id = self.id,
                    changefeed = %self.changefeed,
                    region_id,
                    version,
                    start_key = %hex::encode(&span.start),
                    end_key = %hex::encode(&span.end),
                    "range lock cancelled"
                );
                return LockRangeResult::Cancelled;
            }

            match self.try_lock_range(span, region_id, version).resolve() {
                Ok(result) => {
                    RangeLockMetrics::record_wait_latency(blocked_at.elapsed());
                    return result;
                }
                Err(next) => signals = next,
            }
        }
    }

    /// Unlock a range and record its checkpoint.
    ///
    /// # Panics
    ///
    /// Panics if the range is not locked with exactly this region id,
    /// version and end key.
    pub fn unlock_range(&self, span: &Span, region_id: u64, version: u64, checkpoint_ts: u64) {
        let mut state = self.state.lock();

        // Nothing is removed until every check passed.
        let Some(entry) = state.entries.get(&span.start) else {
            self.invariant_violation(
                "unlocking a range that is not locked",
                format!(
                    "region {} {}, version {}, checkpoint ts {}",
                    region_id, span, version, checkpoint_ts
                ),
            );
        };

        if entry.region_id != region_id {
            self.invariant_violation(
                "unlocking a range locked by another region",
                format!(
                    "expected region {}, found {} for {}",
                    region_id, entry, span
                ),
            );
        }

        if state.regions.get(&region_id) != Some(&span.start) {
            let indexed = state
                .regions
                .get(&region_id)
                .and_then(|key| state.entries.get(key))
                .map(|e| e.to_string())
                .unwrap_or_else(|| "none".to_string());
            self.invariant_violation(
                "range entry and region entry mismatch",
                format!(
                    "unlocking region {}, range entry: {}, region entry: {}",
                    region_id, entry, indexed
                ),
            );
        }

        if entry.version != version || entry.span.end != span.end {
            self.invariant_violation(
                "unlocking a range that does not match the locked one",
                format!(
                    "region {} {}, version {}, checkpoint ts {}, found: {}",
                    region_id, span, version, checkpoint_ts, entry
                ),
            );
        }

        let Some(entry) = state.entries.remove(&span.start) else {
            unreachable!("entry checked above");
        };
        state.regions.remove(&region_id);
        for waiter in entry.waiters {
            // Waiters that were cancelled have dropped their receiver.
            let _ = waiter.send(());
        }
        state.checkpoints.set(&span.start, &span.end, checkpoint_ts);
        let locked = state.entries.len();
        drop(state);

        RangeLockMetrics::increment_released();
        RangeLockMetrics::set_locked_ranges(self.id, locked);
        info!(
            lock_id = self.id,
            changefeed = %self.changefeed,
            region_id,
            version,
            checkpoint_ts,
            start_key = %hex::encode(&span.start),
            end_key = %hex::encode(&span.end),
            "range unlocked"
        );
    }

    /// Minimum checkpoint over `span`, whether locked or not
    pub fn checkpoint_ts(&self, span: &Span) -> u64 {
        self.state.lock().checkpoints.get_min(&span.start, &span.end)
    }

    /// Locked ranges in ascending key order
    pub fn locked_ranges(&self) -> Vec<LockedRange> {
        let state = self.state.lock();
        state
            .entries
            .values()
            .map(|e| LockedRange {
                span: e.span.clone(),
                region_id: e.region_id,
                version: e.version,
                waiters: e.pending_waiters(),
            })
            .collect()
    }

    /// Checkpoint segments covering the whole keyspace, in ascending key order
    pub fn checkpoints(&self) -> Vec<(Span, u64)> {
        self.state.lock().checkpoints.iter().collect()
    }

    pub fn stats(&self) -> LockStats {
        let state = self.state.lock();
        LockStats {
            locked_ranges: state.entries.len(),
            pending_waiters: state.entries.values().map(LockEntry::pending_waiters).sum(),
        }
    }

    fn invariant_violation(&self, msg: &str, detail: String) -> ! {
        error!(
            lock_id = self.id,
            changefeed = %self.changefeed,
            %detail,
            "{}", msg
        );
        panic!("{}: {}", msg, detail);
    }
}
