use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use meshsync_events::FactIdentity;

/// Result of claiming a fact identity before applying it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the identity until it calls `complete` or `release`.
    Claimed,
    AlreadyProcessed,
    /// Another worker holds the claim right now.
    InFlight,
}

/// Record of fact identities whose effects have been applied.
///
/// Retention may be bounded; an identity evicted from the log is treated as
/// new again.
pub trait ProcessedFactLog: Send + Sync {
    fn claim(&self, identity: &FactIdentity) -> Claim;

    fn is_processed(&self, identity: &FactIdentity) -> bool;

    /// Mark an identity as applied. Also clears any claim on it.
    fn complete(&self, identity: &FactIdentity);

    /// Drop a claim without marking the identity as applied.
    fn release(&self, identity: &FactIdentity);
}

impl<L> ProcessedFactLog for Arc<L>
where
    L: ProcessedFactLog + ?Sized,
{
    fn claim(&self, identity: &FactIdentity) -> Claim {
        (**self).claim(identity)
    }

    fn is_processed(&self, identity: &FactIdentity) -> bool {
        (**self).is_processed(identity)
    }

    fn complete(&self, identity: &FactIdentity) {
        (**self).complete(identity)
    }

    fn release(&self, identity: &FactIdentity) {
        (**self).release(identity)
    }
}

#[derive(Debug)]
struct Entries {
    done: LruCache<FactIdentity, ()>,
    in_flight: HashSet<FactIdentity>,
}

/// In-memory log keeping the most recent `capacity` completed identities.
#[derive(Debug)]
pub struct InMemoryProcessedFacts {
    entries: Mutex<Entries>,
}

impl InMemoryProcessedFacts {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(Entries {
                done: LruCache::new(capacity),
                in_flight: HashSet::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.done.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProcessedFactLog for InMemoryProcessedFacts {
    fn claim(&self, identity: &FactIdentity) -> Claim {
        let Ok(mut entries) = self.entries.lock() else {
            // A poisoned log cannot vouch for anything; let the caller retry.
            return Claim::InFlight;
        };
        if entries.done.get(identity).is_some() {
            return Claim::AlreadyProcessed;
        }
        if !entries.in_flight.insert(identity.clone()) {
            return Claim::InFlight;
        }
        Claim::Claimed
    }

    fn is_processed(&self, identity: &FactIdentity) -> bool {
        self.entries
            .lock()
            .map(|mut e| e.done.get(identity).is_some())
            .unwrap_or(false)
    }

    fn complete(&self, identity: &FactIdentity) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.in_flight.remove(identity);
            entries.done.put(identity.clone(), ());
        }
    }

    fn release(&self, identity: &FactIdentity) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.in_flight.remove(identity);
        }
    }
}
