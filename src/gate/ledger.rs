// ============================================================================
// Admission Ledger
// ============================================================================
//
// Per-identity sliding-window request counter. State machine per identity:
//
//   {no entry} -> {tracked, count < ceiling} -> {tracked, count >= ceiling}
//      -> (window elapses) -> {tracked, count < ceiling} -> ...
//      -> {evicted after 2x window idle}
//
// All operations are synchronous in-memory work bounded by O(window size);
// nothing here suspends. A poisoned lock is a bug, not a reason for an
// outage: the ledger recovers the guard and keeps serving (fail open).
//
// ============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after: Duration },
}

/// One tracked identity: timestamps within the trailing window
struct AdmissionWindow {
    window_start: Instant,
    timestamps: VecDeque<Instant>,
}

/// Process-wide sliding-window admission counter
pub struct AdmissionLedger {
    window: Duration,
    ceiling: usize,
    entries: Mutex<HashMap<String, AdmissionWindow>>,
}

impl AdmissionLedger {
    pub fn new(window: Duration, ceiling: usize) -> Self {
        Self {
            window,
            ceiling,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request from `identity` at `now` and decide admission.
    ///
    /// A fresh or fully-elapsed entry is reset to a single timestamp and
    /// allowed. Otherwise the timestamp is appended, stale timestamps are
    /// purged, and the request is allowed iff the count stays at or below
    /// the ceiling. Denial adds no penalty state beyond the recorded
    /// timestamp.
    pub fn admit(&self, identity: &str, now: Instant) -> Admission {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("admission ledger lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        match entries.get_mut(identity) {
            Some(entry) if now.duration_since(entry.window_start) < self.window => {
                entry.timestamps.push_back(now);

                // Drop timestamps that slid out of the window
                while let Some(&oldest) = entry.timestamps.front() {
                    if now.duration_since(oldest) >= self.window {
                        entry.timestamps.pop_front();
                    } else {
                        break;
                    }
                }

                if entry.timestamps.len() <= self.ceiling {
                    Admission::Allowed
                } else {
                    let elapsed = now.duration_since(entry.window_start);
                    let retry_after = self.window.checked_sub(elapsed).unwrap_or_default();
                    Admission::Denied { retry_after }
                }
            }
            _ => {
                entries.insert(
                    identity.to_string(),
                    AdmissionWindow {
                        window_start: now,
                        timestamps: VecDeque::from([now]),
                    },
                );
                Admission::Allowed
            }
        }
    }

    /// Evict identities idle for longer than twice the window duration,
    /// bounding memory to active callers. Called by the periodic sweep.
    pub fn sweep(&self, now: Instant) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("admission ledger lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let horizon = self.window * 2;
        entries.retain(|_, entry| now.duration_since(entry.window_start) < horizon);
    }

    /// Number of tracked identities
    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_admits_up_to_ceiling_then_denies() {
        let ledger = AdmissionLedger::new(WINDOW, 3);
        let now = Instant::now();

        for i in 0..3 {
            assert_eq!(
                ledger.admit("tok:aaaa", now + Duration::from_millis(i)),
                Admission::Allowed
            );
        }
        assert!(matches!(
            ledger.admit("tok:aaaa", now + Duration::from_millis(3)),
            Admission::Denied { .. }
        ));
    }

    #[test]
    fn test_identities_are_accounted_independently() {
        let ledger = AdmissionLedger::new(WINDOW, 1);
        let now = Instant::now();

        assert_eq!(ledger.admit("ip:1.1.1.1", now), Admission::Allowed);
        assert!(matches!(
            ledger.admit("ip:1.1.1.1", now),
            Admission::Denied { .. }
        ));
        assert_eq!(ledger.admit("ip:2.2.2.2", now), Admission::Allowed);
    }

    #[test]
    fn test_resets_after_window_elapses() {
        let ledger = AdmissionLedger::new(WINDOW, 1);
        let now = Instant::now();

        assert_eq!(ledger.admit("tok:bbbb", now), Admission::Allowed);
        assert!(matches!(
            ledger.admit("tok:bbbb", now + Duration::from_secs(1)),
            Admission::Denied { .. }
        ));

        // Window fully elapsed since last reset: entry resets, request admitted
        assert_eq!(
            ledger.admit("tok:bbbb", now + WINDOW),
            Admission::Allowed
        );
    }

    #[test]
    fn test_denial_carries_retry_hint_within_window() {
        let ledger = AdmissionLedger::new(WINDOW, 1);
        let now = Instant::now();

        ledger.admit("tok:cccc", now);
        let denied = ledger.admit("tok:cccc", now + Duration::from_secs(10));
        match denied {
            Admission::Denied { retry_after } => {
                assert!(retry_after <= WINDOW);
                assert!(retry_after >= Duration::from_secs(40));
            }
            Admission::Allowed => panic!("expected denial"),
        }
    }

    #[test]
    fn test_sweep_evicts_idle_entries() {
        let ledger = AdmissionLedger::new(WINDOW, 10);
        let now = Instant::now();

        ledger.admit("tok:dddd", now);
        ledger.admit("ip:3.3.3.3", now + Duration::from_secs(90));
        assert_eq!(ledger.len(), 2);

        // First entry is now idle past 2x window; second is not
        ledger.sweep(now + Duration::from_secs(125));
        assert_eq!(ledger.len(), 1);

        ledger.sweep(now + Duration::from_secs(300));
        assert!(ledger.is_empty());
    }
}
