// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The keep-alive pool: a non-owning index from
//! [`RemoteAddress`] to the check slab key of an idle, post-success
//! connection.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use pulsecheck_wire::RemoteAddress;

#[derive(Default)]
pub struct KeepAlivePool {
    index: HashMap<RemoteAddress, usize>,
}

impl KeepAlivePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the pooled entry for `addr`, if any. A hit always
    /// removes the pool membership — the caller is responsible for
    /// transitioning the entry to `Recovery`.
    pub fn take(&mut self, addr: &RemoteAddress) -> Option<usize> {
        self.index.remove(addr)
    }

    /// Attempts to pool `key` under `addr`. Returns `false` (and leaves the
    /// existing mapping untouched) if `addr` is already pooled — the pool
    /// is injective on `RemoteAddress`, and on a collision the *new*
    /// connection is the one discarded, not the old.
    pub fn try_insert(&mut self, addr: RemoteAddress, key: usize) -> bool {
        match self.index.entry(addr) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(key);
                true
            }
        }
    }

    /// Removes the pool mapping for `addr` iff it currently points at
    /// `key` — used by the sweeper and by peer-close eviction, which both
    /// already know which slab key they're retiring and must not disturb
    /// a newer mapping that happens to share the same address.
    pub fn remove_if(&mut self, addr: &RemoteAddress, key: usize) -> bool {
        if self.index.get(addr) == Some(&key) {
            self.index.remove(addr);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
