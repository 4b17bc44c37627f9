//! Consumed-nonce ledger for replay detection.
//!
//! A nonce enters the ledger only when a payload carrying it is *verified*.
//! Any later payload with the same nonce is a replay, however valid its
//! signature looks.
//!
//! ## Memory bound vs. correctness
//!
//! The ledger cannot grow forever, so old nonces must eventually be
//! forgotten. That is only safe because replay protection is the conjunction
//! of two checks: a payload must be fresh (`|now - timestamp| <= W`) *and*
//! its nonce must be unseen. A nonce accepted at time `t` rode on a payload
//! stamped no earlier than `t - W`, so a replay of it fails the freshness
//! check from `t + 2W` on. Forgetting the nonce after that point loses
//! nothing. Forgetting it any earlier opens a replay window.
//!
//! Two strategies honour that bound:
//!
//! - [`LedgerStrategy::TimeBucketed`] (default): one bucket per window-sized
//!   epoch, [`LEDGER_BUCKETS`] buckets retained, older buckets dropped whole.
//!   Bounded by traffic rate, no correctness caveat.
//! - [`LedgerStrategy::CapacityReset`]: a single set swapped for an empty
//!   one once it holds `max_entries`. The retired set is kept until the
//!   *next* swap and only dropped if it was retired at least `2W` ago. If
//!   traffic fills the ledger faster than that, the swap is deferred and the
//!   ledger overshoots `max_entries` rather than forgetting live nonces.
//!
//! Both run under a single mutex, so "check, maybe rotate, insert" is one
//! atomic step: two concurrent verifications of the same nonce can never
//! both observe it as absent.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{BridgeConfig, LedgerStrategy, LEDGER_BUCKETS};

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum LedgerState {
    Bucketed {
        /// `(epoch, nonces)`, oldest first.
        buckets: VecDeque<(i64, HashSet<String>)>,
    },
    Capacity {
        max_entries: usize,
        current: HashSet<String>,
        /// The set retired at the last swap and when it was retired.
        retired: Option<(DateTime<Utc>, HashSet<String>)>,
    },
}

impl LedgerState {
    fn contains(&self, nonce: &str) -> bool {
        match self {
            LedgerState::Bucketed { buckets } => buckets.iter().any(|(_, b)| b.contains(nonce)),
            LedgerState::Capacity {
                current, retired, ..
            } => {
                current.contains(nonce)
                    || retired
                        .as_ref()
                        .map(|(_, set)| set.contains(nonce))
                        .unwrap_or(false)
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            LedgerState::Bucketed { buckets } => buckets.iter().map(|(_, b)| b.len()).sum(),
            LedgerState::Capacity {
                current, retired, ..
            } => current.len() + retired.as_ref().map(|(_, s)| s.len()).unwrap_or(0),
        }
    }
}

// ---------------------------------------------------------------------------
// NonceLedger
// ---------------------------------------------------------------------------

/// Thread-safe set of consumed nonces.
#[derive(Debug)]
pub struct NonceLedger {
    window: Duration,
    state: Mutex<LedgerState>,
}

impl NonceLedger {
    /// A time-bucketed ledger for the given freshness window.
    pub fn time_bucketed(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(LedgerState::Bucketed {
                buckets: VecDeque::with_capacity(LEDGER_BUCKETS),
            }),
        }
    }

    /// A capacity-reset ledger. `window` is still needed to decide when a
    /// retired set is old enough to drop.
    pub fn capacity_reset(max_entries: usize, window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(LedgerState::Capacity {
                max_entries: max_entries.max(1),
                current: HashSet::new(),
                retired: None,
            }),
        }
    }

    /// Builds the ledger described by `config`.
    pub fn from_config(config: &BridgeConfig) -> Self {
        let window = config.freshness_window();
        match config.ledger {
            LedgerStrategy::TimeBucketed => Self::time_bucketed(window),
            LedgerStrategy::CapacityReset { max_entries } => {
                Self::capacity_reset(max_entries, window)
            }
        }
    }

    /// Whether `nonce` has already been consumed.
    pub fn contains(&self, nonce: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        self.expire(&mut state, now);
        state.contains(nonce)
    }

    /// Records `nonce` as consumed unless it already is.
    ///
    /// Returns `true` if this call inserted it, `false` if it was present.
    /// This is the atomic primitive the verifier's success path relies on.
    pub fn insert_if_absent(&self, nonce: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        self.expire(&mut state, now);
        if state.contains(nonce) {
            return false;
        }

        match &mut *state {
            LedgerState::Bucketed { buckets } => {
                let epoch = self.epoch(now);
                match buckets.iter_mut().find(|(e, _)| *e == epoch) {
                    Some((_, bucket)) => {
                        bucket.insert(nonce.to_owned());
                    }
                    None => {
                        let mut bucket = HashSet::new();
                        bucket.insert(nonce.to_owned());
                        buckets.push_back((epoch, bucket));
                    }
                }
            }
            LedgerState::Capacity {
                max_entries,
                current,
                retired,
            } => {
                if current.len() >= *max_entries {
                    let retired_long_enough = retired
                        .as_ref()
                        .map(|(at, _)| now - *at >= self.window * 2)
                        .unwrap_or(true);
                    if retired_long_enough {
                        let full = std::mem::take(current);
                        debug!(entries = full.len(), "nonce ledger capacity reached, swapping sets");
                        *retired = Some((now, full));
                    } else {
                        warn!(
                            entries = current.len(),
                            max_entries = *max_entries,
                            "nonce ledger over capacity but retired set is still inside the replay horizon"
                        );
                    }
                }
                current.insert(nonce.to_owned());
            }
        }
        true
    }

    /// Number of nonces currently remembered.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn epoch(&self, now: DateTime<Utc>) -> i64 {
        let width = self.window.num_milliseconds().max(1);
        now.timestamp_millis().div_euclid(width)
    }

    /// Drops buckets that fell out of the replay horizon.
    fn expire(&self, state: &mut LedgerState, now: DateTime<Utc>) {
        if let LedgerState::Bucketed { buckets } = state {
            let oldest_kept = self.epoch(now) - (LEDGER_BUCKETS as i64 - 1);
            while let Some((epoch, _)) = buckets.front() {
                if *epoch >= oldest_kept {
                    break;
                }
                if let Some((epoch, dropped)) = buckets.pop_front() {
                    debug!(epoch, entries = dropped.len(), "nonce ledger bucket expired");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn window() -> Duration {
        Duration::minutes(5)
    }

    #[test]
    fn insert_once_only() {
        let ledger = NonceLedger::time_bucketed(window());
        let now = Utc::now();
        assert!(!ledger.contains("aa", now));
        assert!(ledger.insert_if_absent("aa", now));
        assert!(ledger.contains("aa", now));
        assert!(!ledger.insert_if_absent("aa", now));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn bucketed_keeps_nonces_for_twice_the_window() {
        let ledger = NonceLedger::time_bucketed(window());
        let t0 = Utc::now();
        assert!(ledger.insert_if_absent("aa", t0));

        // Anything a replay could still pass freshness with must be remembered.
        assert!(ledger.contains("aa", t0 + window() * 2));
    }

    #[test]
    fn bucketed_forgets_after_the_horizon() {
        let ledger = NonceLedger::time_bucketed(window());
        let t0 = Utc::now();
        assert!(ledger.insert_if_absent("aa", t0));

        let later = t0 + window() * (LEDGER_BUCKETS as i32 + 1);
        assert!(!ledger.contains("aa", later));
        assert!(ledger.is_empty());
    }

    #[test]
    fn capacity_reset_swaps_when_full() {
        let ledger = NonceLedger::capacity_reset(2, window());
        let t0 = Utc::now();
        assert!(ledger.insert_if_absent("a", t0));
        assert!(ledger.insert_if_absent("b", t0));
        // Third insert retires {a, b}; they are still remembered.
        assert!(ledger.insert_if_absent("c", t0));
        assert!(ledger.contains("a", t0));
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn capacity_reset_drops_retired_set_only_after_horizon() {
        let ledger = NonceLedger::capacity_reset(1, window());
        let t0 = Utc::now();
        assert!(ledger.insert_if_absent("a", t0));
        assert!(ledger.insert_if_absent("b", t0)); // retires {a} at t0

        // Too early: the swap is deferred, "a" survives.
        assert!(ledger.insert_if_absent("c", t0 + Duration::seconds(1)));
        assert!(ledger.contains("a", t0 + Duration::seconds(1)));

        // Past 2W: {a} is dropped, {b, c} retired.
        let late = t0 + window() * 2 + Duration::seconds(1);
        assert!(ledger.insert_if_absent("d", late));
        assert!(!ledger.contains("a", late));
        assert!(ledger.contains("b", late));
    }

    #[test]
    fn from_config_picks_strategy() {
        let config = BridgeConfig {
            ledger: LedgerStrategy::CapacityReset { max_entries: 1 },
            ..Default::default()
        };
        let ledger = NonceLedger::from_config(&config);
        let now = Utc::now();
        assert!(ledger.insert_if_absent("x", now));
        assert!(ledger.insert_if_absent("y", now));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn concurrent_inserts_have_single_winner() {
        let ledger = Arc::new(NonceLedger::time_bucketed(window()));
        let winners = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();

        std::thread::scope(|s| {
            for _ in 0..16 {
                let ledger = Arc::clone(&ledger);
                let winners = Arc::clone(&winners);
                s.spawn(move || {
                    if ledger.insert_if_absent("same-nonce", now) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
