//! Channel row persistence boundary.

use std::sync::Arc;

use dashmap::DashMap;

use cairn_core::channel::ChannelSlot;

/// Where confirmed channel state is persisted.
///
/// A real deployment implements this over its database;
/// [`MemoryChannelStore`] backs tests and the demo daemon. The
/// directory calls `replace_all` after a completed scan and
/// `upsert`/`delete` after confirmed single-slot writes, always from
/// one caller at a time.
pub trait ChannelStore: Send + Sync {
    /// Replace every stored row with the given set.
    fn replace_all(&self, slots: &[ChannelSlot]);

    /// Insert or update one row.
    fn upsert(&self, slot: &ChannelSlot);

    /// Delete the row for an index. Missing rows are not an error.
    fn delete(&self, idx: u8);
}

/// In-memory store.
#[derive(Clone, Default)]
pub struct MemoryChannelStore {
    rows: Arc<DashMap<u8, ChannelSlot>>,
}

impl MemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored rows in index order.
    pub fn rows(&self) -> Vec<ChannelSlot> {
        let mut rows: Vec<ChannelSlot> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by_key(|slot| slot.index);
        rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl ChannelStore for MemoryChannelStore {
    fn replace_all(&self, slots: &[ChannelSlot]) {
        self.rows.clear();
        for slot in slots {
            self.rows.insert(slot.index, slot.clone());
        }
    }

    fn upsert(&self, slot: &ChannelSlot) {
        self.rows.insert(slot.index, slot.clone());
    }

    fn delete(&self, idx: u8) {
        self.rows.remove(&idx);
    }
}
