//! Discovery dedup store
//!
//! Remembers the `rand_hash` of every advertisement already handed to the
//! session client so the same broadcast is never contacted twice in a scan
//! phase. How long a hash stays remembered after its round ends is governed
//! by [`DedupScope`]. Nothing here outlives the process.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Retention policy for seen hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupScope {
    /// Forget everything when the round ends
    Phase,
    /// Remember hashes for the round they were seen in and the next one
    Rolling,
    /// Never forget (until the process exits)
    Process,
}

impl Default for DedupScope {
    fn default() -> Self {
        Self::Rolling
    }
}

impl std::fmt::Display for DedupScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phase => write!(f, "phase"),
            Self::Rolling => write!(f, "rolling"),
            Self::Process => write!(f, "process"),
        }
    }
}

impl std::str::FromStr for DedupScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "phase" => Ok(Self::Phase),
            "rolling" => Ok(Self::Rolling),
            "process" => Ok(Self::Process),
            other => Err(format!("unknown dedup scope: {}", other)),
        }
    }
}

/// Set of already-processed peer hashes, split into two generations
#[derive(Debug, Clone, Default)]
pub struct DedupStore {
    scope: DedupScope,
    current: HashSet<u64>,
    previous: HashSet<u64>,
}

impl DedupStore {
    /// Create an empty store
    pub fn new(scope: DedupScope) -> Self {
        Self {
            scope,
            current: HashSet::new(),
            previous: HashSet::new(),
        }
    }

    /// Retention policy
    pub fn scope(&self) -> DedupScope {
        self.scope
    }

    /// True if the hash was recorded in a generation still remembered
    pub fn contains(&self, rand_hash: u64) -> bool {
        self.current.contains(&rand_hash) || self.previous.contains(&rand_hash)
    }

    /// Record a hash for the current round. Returns false if already known.
    pub fn insert(&mut self, rand_hash: u64) -> bool {
        if self.previous.contains(&rand_hash) {
            // Seen again: keep it alive for another generation.
            self.previous.remove(&rand_hash);
            self.current.insert(rand_hash);
            return false;
        }
        self.current.insert(rand_hash)
    }

    /// Number of remembered hashes
    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    /// True if nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.previous.is_empty()
    }

    /// Close the current round according to the retention policy
    pub fn end_round(&mut self) {
        match self.scope {
            DedupScope::Phase => {
                self.current.clear();
                self.previous.clear();
            }
            DedupScope::Rolling => {
                self.previous = std::mem::take(&mut self.current);
            }
            DedupScope::Process => {}
        }
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.current.clear();
        self.previous.clear();
    }
}
