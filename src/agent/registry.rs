use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::trace;

use crate::context::Dimension;

use super::storage::entities::StorageId;

/// Maps a dimension to the storage id of its most recently *persisted* segment.
///
/// Written by the sink writer right after a successful persist, read by trackers when they open
/// a segment. Reads are snapshots and may be stale; they never observe an id that has not been
/// persisted yet. One instance per session, shared by cloning.
#[derive(Clone, Default)]
pub struct ActiveContextRegistry {
    inner: Arc<RwLock<HashMap<Dimension, StorageId>>>,
}

impl ActiveContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dimension: Dimension, id: StorageId) {
        trace!("Registered {dimension} {id}");
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dimension, id);
    }

    pub fn lookup(&self, dimension: Dimension) -> Option<StorageId> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&dimension)
            .copied()
    }

    pub fn last_window_id(&self) -> Option<StorageId> {
        self.lookup(Dimension::Window)
    }

    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_clear() {
        let registry = ActiveContextRegistry::new();
        let reader = registry.clone();
        assert_eq!(reader.last_window_id(), None);

        registry.register(Dimension::Window, StorageId(3));
        registry.register(Dimension::Window, StorageId(5));
        assert_eq!(reader.last_window_id(), Some(StorageId(5)));
        assert_eq!(reader.lookup(Dimension::Game), None);

        registry.clear();
        assert_eq!(reader.last_window_id(), None);
    }
}
