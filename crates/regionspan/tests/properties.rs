//! Property-based tests for the range timestamp map and the region range lock
//!
//! Random operation sequences are applied to the real structures and to a
//! naive per-key model. Keys are single bytes in `[0, KEYS]`, so every
//! segment boundary is a model key and the model is exact.

use proptest::prelude::*;
use regionspan::{LockAttempt, LockedRange, RangeTsMap, RegionRangeLock, Span};

const KEYS: u8 = 24;
const START_TS: u64 = 7;

fn key_span(start: u8, end: u8) -> Span {
    Span::new(vec![start], vec![end])
}

fn whole() -> Span {
    key_span(0, KEYS)
}

prop_compose! {
    fn arbitrary_range()(a in 0..KEYS, b in 0..KEYS) -> (u8, u8) {
        if a == b { (a, a + 1) } else { (a.min(b), a.max(b)) }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Lock { range: (u8, u8), region_id: u64, version: u64 },
    Unlock { pick: usize, ts: u64 },
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (arbitrary_range(), 1u64..8, 1u64..6).prop_map(|(range, region_id, version)| Op::Lock {
            range,
            region_id,
            version,
        }),
        2 => (any::<usize>(), 0u64..1_000).prop_map(|(pick, ts)| Op::Unlock { pick, ts }),
    ]
}

fn covered_keys(ranges: &[Span]) -> Vec<u8> {
    (0..KEYS)
        .filter(|k| ranges.iter().any(|r| r.contains_key(&[*k])))
        .collect()
}

fn assert_lock_invariants(locked: &[LockedRange]) -> Result<(), TestCaseError> {
    for pair in locked.windows(2) {
        prop_assert!(
            pair[0].span.end <= pair[1].span.start,
            "overlapping locked ranges {} and {}",
            pair[0].span,
            pair[1].span
        );
    }
    let mut regions: Vec<u64> = locked.iter().map(|r| r.region_id).collect();
    regions.sort_unstable();
    regions.dedup();
    prop_assert_eq!(regions.len(), locked.len(), "region holds two ranges");
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The map always partitions the keyspace and min queries match the model
    #[test]
    fn test_range_ts_map_matches_model(
        sets in prop::collection::vec((arbitrary_range(), 0u64..100), 0..40),
        query in arbitrary_range(),
    ) {
        let mut map = RangeTsMap::new(whole(), START_TS);
        let mut model = vec![START_TS; KEYS as usize];

        for ((start, end), ts) in &sets {
            map.set(&[*start], &[*end], *ts);
            for k in *start..*end {
                model[k as usize] = *ts;
            }
        }

        let segments: Vec<(Span, u64)> = map.iter().collect();
        prop_assert_eq!(&segments[0].0.start[..], &[0u8][..]);
        prop_assert_eq!(&segments[segments.len() - 1].0.end[..], &[KEYS][..]);
        for pair in segments.windows(2) {
            prop_assert_eq!(&pair[0].0.end, &pair[1].0.start);
        }
        for (span, ts) in &segments {
            prop_assert!(span.start < span.end);
            for k in span.start[0]..span.end[0] {
                prop_assert_eq!(model[k as usize], *ts);
            }
        }

        let (start, end) = query;
        let expected = model[start as usize..end as usize].iter().copied().min().unwrap();
        prop_assert_eq!(map.get_min(&[start], &[end]), expected);
    }

    /// Random lock/unlock sequences keep the lock consistent with the model
    #[test]
    fn test_range_lock_matches_model(ops in prop::collection::vec(arbitrary_op(), 1..60)) {
        let lock = RegionRangeLock::new(whole(), START_TS, "proptest", 1);
        let mut checkpoints = vec![START_TS; KEYS as usize];

        for op in ops {
            let before = lock.locked_ranges();
            match op {
                Op::Lock { range: (start, end), region_id, version } => {
                    let span = key_span(start, end);
                    let conflicts: Vec<&LockedRange> = before
                        .iter()
                        .filter(|r| r.span.overlaps(&span) || r.region_id == region_id)
                        .collect();

                    match lock.try_lock_range(&span, region_id, version) {
                        LockAttempt::Success { checkpoint_ts } => {
                            prop_assert!(conflicts.is_empty());
                            let expected = checkpoints[start as usize..end as usize]
                                .iter()
                                .copied()
                                .min()
                                .unwrap();
                            prop_assert_eq!(checkpoint_ts, expected);

                            // Same claim again is stale with nothing to retry.
                            match lock.try_lock_range(&span, region_id, version) {
                                LockAttempt::Stale { retry_ranges } => prop_assert!(retry_ranges.is_empty()),
                                other => prop_assert!(false, "expected stale, got {:?}", other),
                            }
                        }
                        LockAttempt::Stale { retry_ranges } => {
                            prop_assert!(conflicts.iter().any(|r| r.version >= version));

                            for pair in retry_ranges.windows(2) {
                                prop_assert!(pair[0].end < pair[1].start);
                            }
                            for r in &retry_ranges {
                                prop_assert!(!r.is_empty());
                                prop_assert!(span.contains(r));
                            }

                            let held: Vec<Span> = conflicts.iter().map(|r| r.span.clone()).collect();
                            let expected: Vec<u8> = (start..end)
                                .filter(|k| !held.iter().any(|h| h.contains_key(&[*k])))
                                .collect();
                            prop_assert_eq!(covered_keys(&retry_ranges), expected);
                        }
                        LockAttempt::Wait(signals) => {
                            prop_assert!(!conflicts.is_empty());
                            prop_assert!(conflicts.iter().all(|r| r.version < version));
                            prop_assert_eq!(signals.len(), conflicts.len());
                        }
                    }
                }
                Op::Unlock { pick, ts } => {
                    if before.is_empty() {
                        continue;
                    }
                    let target = &before[pick % before.len()];
                    lock.unlock_range(&target.span, target.region_id, target.version, ts);
                    for k in target.span.start[0]..target.span.end[0] {
                        checkpoints[k as usize] = ts;
                    }
                }
            }

            let after = lock.locked_ranges();
            assert_lock_invariants(&after)?;
            prop_assert!(after.iter().all(|r| r.waiters == 0), "dropped waiters still pending");
        }
    }
}
