//! Per-file handle-mapping table.
//!
//! Maps each buffer a file has a handle for (imported, or exported by the
//! file itself) to that handle, so importing the same buffer twice yields
//! the same handle. A reverse index from handle to buffer lets deleting a
//! handle drop its entry without consulting the object behind it.
//!
//! Entries are keyed by buffer identity and never own a buffer reference:
//! the object behind the handle holds whatever references it needs.

use crate::dmabuf::{DmaBuf, DmaBufId};
use crate::error::{Error, Result};
use crate::observability;
use std::collections::HashMap;

/// Handle-mapping table of one file.
#[derive(Debug)]
pub struct PrimeFilePrivate {
    dma_bufs: HashMap<DmaBufId, u32>,
    handles: HashMap<u32, DmaBufId>,
    max_entries: usize,
}

impl PrimeFilePrivate {
    /// Create an empty table holding at most `max_entries` mappings.
    pub fn new(max_entries: usize) -> Self {
        Self {
            dma_bufs: HashMap::new(),
            handles: HashMap::new(),
            max_entries,
        }
    }

    /// Record that `handle` refers to `dma_buf`.
    ///
    /// An entry `handle` already had for another buffer is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the entry cannot be allocated.
    pub fn insert(&mut self, dma_buf: &DmaBuf, handle: u32) -> Result<()> {
        let id = dma_buf.id();
        debug_assert!(!self.dma_bufs.contains_key(&id), "{id} already mapped");

        let replaces = self.handles.contains_key(&handle);
        if !replaces && self.dma_bufs.len() >= self.max_entries {
            return Err(Error::OutOfMemory);
        }
        self.dma_bufs.try_reserve(1)?;
        self.handles.try_reserve(1)?;

        if let Some(stale) = self.handles.insert(handle, id) {
            self.dma_bufs.remove(&stale);
            tracing::trace!(dma_buf = %stale, handle, "prime mapping replaced");
        } else {
            observability::record_table_entries_added(1);
        }
        self.dma_bufs.insert(id, handle);
        tracing::trace!(dma_buf = %id, handle, "prime mapping inserted");
        Ok(())
    }

    /// Find the handle mapped to `dma_buf`.
    pub fn lookup(&self, dma_buf: &DmaBuf) -> Result<u32> {
        self.lookup_id(dma_buf.id())
    }

    /// Find the handle mapped to the buffer with identity `id`.
    pub fn lookup_id(&self, id: DmaBufId) -> Result<u32> {
        self.dma_bufs
            .get(&id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("no handle for {id}")))
    }

    /// Find the buffer mapped to `handle`.
    pub fn lookup_handle(&self, handle: u32) -> Option<DmaBufId> {
        self.handles.get(&handle).copied()
    }

    /// Drop the mapping for `dma_buf`, if any.
    pub fn remove(&mut self, dma_buf: &DmaBuf) {
        self.remove_id(dma_buf.id());
    }

    /// Drop the mapping for the buffer with identity `id`, if any.
    pub fn remove_id(&mut self, id: DmaBufId) {
        if let Some(handle) = self.dma_bufs.remove(&id) {
            self.handles.remove(&handle);
            observability::record_table_entries_removed(1);
            tracing::trace!(dma_buf = %id, handle, "prime mapping removed");
        }
    }

    /// Drop the mapping of `handle`, if any.
    pub fn remove_handle(&mut self, handle: u32) {
        if let Some(id) = self.handles.remove(&handle) {
            self.dma_bufs.remove(&id);
            observability::record_table_entries_removed(1);
            tracing::trace!(dma_buf = %id, handle, "prime mapping removed");
        }
    }

    /// Remove every entry. Called once when the file is torn down.
    pub fn destroy(&mut self) {
        observability::record_table_entries_removed(self.dma_bufs.len());
        self.dma_bufs.clear();
        self.dma_bufs.shrink_to_fit();
        self.handles.clear();
        self.handles.shrink_to_fit();
    }

    /// Number of mappings.
    pub fn len(&self) -> usize {
        self.dma_bufs.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.dma_bufs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmabuf::tests::test_buf;

    #[test]
    fn test_insert_lookup_remove() {
        let mut table = PrimeFilePrivate::new(16);
        let a = test_buf(1);
        let b = test_buf(1);

        table.insert(&a, 1).unwrap();
        table.insert(&b, 2).unwrap();
        assert_eq!(table.lookup(&a).unwrap(), 1);
        assert_eq!(table.lookup(&b).unwrap(), 2);
        assert_eq!(table.len(), 2);

        table.remove(&a);
        assert!(matches!(table.lookup(&a), Err(Error::NotFound(_))));
        assert_eq!(table.lookup(&b).unwrap(), 2);

        // Removing an absent buffer is a no-op.
        table.remove(&a);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_entries_hold_no_reference() {
        let mut table = PrimeFilePrivate::new(16);
        let buf = test_buf(1);
        table.insert(&buf, 7).unwrap();
        assert_eq!(buf.ref_count(), 1);
    }

    #[test]
    fn test_lookup_by_identity() {
        let mut table = PrimeFilePrivate::new(16);
        let a = test_buf(1);
        let same_size = test_buf(1);
        table.insert(&a, 1).unwrap();

        assert!(table.lookup(&a.clone()).is_ok());
        assert!(table.lookup(&same_size).is_err());
    }

    #[test]
    fn test_insert_limit() {
        let mut table = PrimeFilePrivate::new(1);
        let a = test_buf(1);
        let b = test_buf(1);
        table.insert(&a, 1).unwrap();

        assert!(matches!(table.insert(&b, 2), Err(Error::OutOfMemory)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_by_handle() {
        let mut table = PrimeFilePrivate::new(16);
        let a = test_buf(1);
        let b = test_buf(1);
        table.insert(&a, 1).unwrap();
        table.insert(&b, 2).unwrap();

        assert_eq!(table.lookup_handle(1), Some(a.id()));
        table.remove_handle(1);
        assert!(table.lookup(&a).is_err());
        assert_eq!(table.lookup_handle(1), None);
        assert_eq!(table.lookup(&b).unwrap(), 2);

        // Unknown handles are a no-op.
        table.remove_handle(9);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_replaces_handle_entry() {
        let mut table = PrimeFilePrivate::new(1);
        let old = test_buf(1);
        let new = test_buf(1);
        table.insert(&old, 4).unwrap();

        // Replacing does not count against the limit.
        table.insert(&new, 4).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.lookup(&old).is_err());
        assert_eq!(table.lookup(&new).unwrap(), 4);
        assert_eq!(table.lookup_handle(4), Some(new.id()));
    }

    #[test]
    fn test_remove_by_buffer_clears_handle() {
        let mut table = PrimeFilePrivate::new(16);
        let a = test_buf(1);
        table.insert(&a, 3).unwrap();

        table.remove(&a);
        assert_eq!(table.lookup_handle(3), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_destroy_drains() {
        let mut table = PrimeFilePrivate::new(16);
        let bufs: Vec<_> = (0..5).map(|_| test_buf(1)).collect();
        for (i, buf) in bufs.iter().enumerate() {
            table.insert(buf, i as u32 + 1).unwrap();
        }

        table.destroy();
        assert!(table.is_empty());
        assert!(bufs.iter().all(|buf| table.lookup(buf).is_err()));
        assert_eq!(table.lookup_handle(1), None);
    }
}
