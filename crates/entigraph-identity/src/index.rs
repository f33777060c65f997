//! Identity map
//!
//! Provides [`IdentityMap`], the key → node table of one unit of work.
//! Several keys (natural, surrogate, anchored variants) may point at the same
//! node; a reverse index remembers which keys each node was registered under
//! so they can be evicted together.

use entigraph_model::{EntityKey, KeyKind};
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Keys registered for one node
type KeySet = SmallVec<[EntityKey; 2]>;

/// Key → node table
///
/// Not synchronized: one unit of work owns one map and mutates it from a
/// single thread at a time.
#[derive(Debug, Clone)]
pub struct IdentityMap<N> {
    /// Key → node
    entries: HashMap<EntityKey, N>,

    /// Reverse index: node → keys, in registration order
    by_node: IndexMap<N, KeySet>,

    stats: IdentityStats,
}

/// Lookup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityStats {
    /// Lookups that found a node
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Keys removed
    pub evictions: u64,
}

impl IdentityStats {
    /// Fraction of lookups that hit, 0.0 when nothing was looked up
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl<N> Default for IdentityMap<N>
where
    N: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            by_node: IndexMap::new(),
            stats: IdentityStats::default(),
        }
    }
}

impl<N> IdentityMap<N>
where
    N: Copy + Eq + Hash + Debug + Display,
{
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key, counting the hit or miss
    pub fn lookup(&mut self, key: &EntityKey) -> Option<N> {
        let found = self.entries.get(key).copied();
        if found.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        found
    }

    /// Look up a key without touching the counters
    #[inline]
    #[must_use]
    pub fn peek(&self, key: &EntityKey) -> Option<N> {
        self.entries.get(key).copied()
    }

    /// Check if key is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Register `node` under `key`
    ///
    /// Registering the same pair twice is a no-op.
    ///
    /// # Errors
    /// Returns [`IdentityError::Conflict`] if the key already maps to a
    /// different node. Nothing is changed in that case.
    pub fn insert(&mut self, key: EntityKey, node: N) -> Result<(), IdentityError> {
        match self.entries.get(&key) {
            Some(existing) if *existing == node => Ok(()),
            Some(existing) => Err(IdentityError::Conflict {
                key,
                existing: existing.to_string(),
                incoming: node.to_string(),
            }),
            None => {
                tracing::trace!(%key, %node, "identity registered");
                self.by_node.entry(node).or_default().push(key.clone());
                self.entries.insert(key, node);
                Ok(())
            }
        }
    }

    /// Register `node` under `key`, replacing any previous mapping
    ///
    /// Returns the node the key pointed to before, if different.
    pub fn replace(&mut self, key: EntityKey, node: N) -> Option<N> {
        let previous = self.evict(&key);
        // `evict` counted the removal; re-pointing is not an eviction
        if previous.is_some() {
            self.stats.evictions -= 1;
        }
        self.by_node.entry(node).or_default().push(key.clone());
        self.entries.insert(key, node);
        previous.filter(|p| *p != node)
    }

    /// Remove one key
    pub fn evict(&mut self, key: &EntityKey) -> Option<N> {
        let node = self.entries.remove(key)?;
        if let Some(keys) = self.by_node.get_mut(&node) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.by_node.shift_remove(&node);
            }
        }
        self.stats.evictions += 1;
        tracing::trace!(%key, %node, "identity evicted");
        Some(node)
    }

    /// Remove every key registered for `node`
    pub fn evict_node(&mut self, node: N) -> Vec<EntityKey> {
        let keys = self.by_node.shift_remove(&node).unwrap_or_default();
        for key in &keys {
            self.entries.remove(key);
        }
        self.stats.evictions += keys.len() as u64;
        keys.into_vec()
    }

    /// Keys registered for `node`, in registration order
    #[must_use]
    pub fn keys_of(&self, node: N) -> &[EntityKey] {
        self.by_node
            .get(&node)
            .map(|keys| keys.as_slice())
            .unwrap_or(&[])
    }

    /// Surrogate key registered for `node` under `anchor`, if any
    #[must_use]
    pub fn surrogate_of(&self, node: N, anchor: Option<&str>) -> Option<&EntityKey> {
        self.keys_of(node)
            .iter()
            .find(|k| k.kind() == KeyKind::Surrogate && k.anchor() == anchor)
    }

    /// Nodes with at least one key, in first-registration order
    pub fn nodes(&self) -> impl Iterator<Item = N> + '_ {
        self.by_node.keys().copied()
    }

    /// All mappings (unordered)
    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, N)> {
        self.entries.iter().map(|(k, n)| (k, *n))
    }

    /// Number of keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No keys registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every mapping, keeping the counters
    pub fn clear(&mut self) {
        self.stats.evictions += self.entries.len() as u64;
        self.entries.clear();
        self.by_node.clear();
    }

    /// Lookup counters
    #[inline]
    #[must_use]
    pub fn stats(&self) -> IdentityStats {
        self.stats
    }
}

/// Identity map errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Key already claimed by another live node
    #[error("identity conflict on {key}: held by {existing}, claimed by {incoming}")]
    Conflict {
        /// Contested key
        key: EntityKey,
        /// Current holder
        existing: String,
        /// Rejected claimant
        incoming: String,
    },
}
