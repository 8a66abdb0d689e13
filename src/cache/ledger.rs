//! In-flight prefetch ledger.
//!
//! Per name: `absent -> in-flight -> { hit | miss | absent }`.
//!
//! Each `try_begin` hands out a [`PrefetchTicket`] carrying a generation
//! number. Terminal transitions from the background job (`fail`, `release`)
//! only act when the ticket still matches the live entry, so a late failure
//! from an earlier generation cannot clear a newer dispatch of the same name.
//! A foreground hit claims whatever generation is live.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Handle for one dispatched prefetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchTicket {
    pub name: String,
    generation: u64,
}

/// Prefetch counters as reported to callers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrefetchStats {
    pub hits: u64,
    pub misses: u64,
    pub total_attempts: u64,
    pub successes: u64,
    /// `successes / total_attempts`, 0 when nothing was attempted.
    pub success_rate: f64,
    /// `hits / (hits + misses)`, 0 when neither happened.
    pub hit_rate: f64,
    /// Names currently in flight or loaded but not yet read.
    pub pending: usize,
}

#[derive(Debug, Default)]
pub struct PrefetchLedger {
    in_flight: Mutex<HashMap<String, u64>>,
    next_generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    total_attempts: AtomicU64,
    successes: AtomicU64,
}

impl PrefetchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` in flight. Returns `None` if it already is.
    pub fn try_begin(&self, name: &str) -> Option<PrefetchTicket> {
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains_key(name) {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        in_flight.insert(name.to_string(), generation);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        Some(PrefetchTicket {
            name: name.to_string(),
            generation,
        })
    }

    /// Consume a pending entry on a foreground read. Returns true on a hit.
    pub fn claim_hit(&self, name: &str) -> bool {
        let claimed = self.in_flight.lock().remove(name).is_some();
        if claimed {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    /// The job loaded the object. The entry stays pending until read.
    pub fn complete_success(&self, _ticket: &PrefetchTicket) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    /// The job found nothing. Counts a miss only if the entry was still live.
    pub fn fail(&self, ticket: &PrefetchTicket) -> bool {
        let removed = self.remove_if_current(ticket);
        if removed {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Forget a job that never ran (queue full or shutdown). Not a miss.
    pub fn release(&self, ticket: &PrefetchTicket) -> bool {
        self.remove_if_current(ticket)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.in_flight.lock().contains_key(name)
    }

    pub fn stats(&self) -> PrefetchStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_attempts = self.total_attempts.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);

        let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        PrefetchStats {
            hits,
            misses,
            total_attempts,
            successes,
            success_rate: ratio(successes, total_attempts),
            hit_rate: ratio(hits, hits + misses),
            pending: self.in_flight.lock().len(),
        }
    }

    /// Zero all counters. Pending entries are left alone.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.total_attempts.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
    }

    fn remove_if_current(&self, ticket: &PrefetchTicket) -> bool {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get(&ticket.name) {
            Some(&generation) if generation == ticket.generation => {
                in_flight.remove(&ticket.name);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_begin_rejected() {
        let ledger = PrefetchLedger::new();
        assert!(ledger.try_begin("layer1.bin").is_some());
        assert!(ledger.try_begin("layer1.bin").is_none());

        let stats = ledger.stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn test_hit_then_failure_counts_once() {
        let ledger = PrefetchLedger::new();
        let ticket = ledger.try_begin("layer1.bin").unwrap();

        assert!(ledger.claim_hit("layer1.bin"));
        assert!(!ledger.fail(&ticket));
        assert!(!ledger.claim_hit("layer1.bin"));

        let stats = ledger.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.hit_rate, 1.0);
    }

    #[test]
    fn test_stale_ticket_does_not_clear_new_dispatch() {
        let ledger = PrefetchLedger::new();
        let old = ledger.try_begin("layer2.bin").unwrap();
        ledger.claim_hit("layer2.bin");
        let new = ledger.try_begin("layer2.bin").unwrap();

        assert!(!ledger.fail(&old));
        assert!(ledger.is_pending("layer2.bin"));
        assert!(ledger.fail(&new));
        assert_eq!(ledger.stats().misses, 1);
    }

    #[test]
    fn test_success_stays_pending() {
        let ledger = PrefetchLedger::new();
        let ticket = ledger.try_begin("pooler.bin").unwrap();
        ledger.complete_success(&ticket);

        let stats = ledger.stats();
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn test_release_is_not_a_miss() {
        let ledger = PrefetchLedger::new();
        let ticket = ledger.try_begin("a.bin").unwrap();
        assert!(ledger.release(&ticket));

        let stats = ledger.stats();
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }
}
