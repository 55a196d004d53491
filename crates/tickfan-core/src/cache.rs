//! Last-value cache keyed by instrument symbol.
//!
//! Single writer (the ingestion pipeline), many snapshot readers. Entries
//! are never removed while the process runs; the universe of A-share
//! symbols (~6k) bounds the memory cost.

use dashmap::DashMap;

use crate::tick::SharedTick;

/// Per-symbol record. `last_tick` is always the most recently accepted tick
/// by arrival order; upstream reordering within a symbol is treated as
/// authoritative by arrival.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub last_tick: SharedTick,
    pub first_seen_ms: i64,
    pub update_count: u64,
}

#[derive(Default)]
pub struct SymbolCache {
    entries: DashMap<String, SymbolEntry>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an accepted tick. Returns true on first sighting of the symbol.
    pub fn apply(&self, tick: SharedTick) -> bool {
        match self.entries.entry(tick.symbol.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.last_tick = tick;
                entry.update_count += 1;
                false
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(SymbolEntry {
                    first_seen_ms: tick.ingest_time_ms,
                    last_tick: tick,
                    update_count: 1,
                });
                true
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<SharedTick> {
        self.entries.get(symbol).map(|e| e.last_tick.clone())
    }

    pub fn entry(&self, symbol: &str) -> Option<SymbolEntry> {
        self.entries.get(symbol).map(|e| e.clone())
    }

    pub fn snapshot_all(&self) -> Vec<SharedTick> {
        self.entries.iter().map(|e| e.last_tick.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
