//! Client files.
//!
//! A [`File`] is one client's session on a device. It owns the client's
//! local handle namespace and its PRIME handle-mapping table, and refers to
//! the descriptor table of the process the client lives in.
//!
//! Operations that mutate a file take `&mut File`; that exclusive borrow is
//! the per-file lock the PRIME paths rely on.

use crate::config::{DeviceConfig, defaults};
use crate::dmabuf::DescriptorTable;
use crate::error::{Error, Result};
use crate::gem::GemObject;
use crate::prime::PrimeFilePrivate;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a [`File`], for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u64);

impl FileId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// One client's session on a device.
pub struct File {
    id: FileId,
    device: String,
    max_handles: usize,
    handles: BTreeMap<u32, GemObject>,
    prime: PrimeFilePrivate,
    descriptors: Arc<DescriptorTable>,
    released: bool,
}

impl File {
    pub(crate) fn new(id: FileId, config: &DeviceConfig, descriptors: Arc<DescriptorTable>) -> Self {
        Self {
            id,
            device: config.name.clone(),
            max_handles: config.max_handles,
            handles: BTreeMap::new(),
            prime: PrimeFilePrivate::new(config.max_prime_entries),
            descriptors,
            released: false,
        }
    }

    /// Identity of this file.
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Descriptor table of the process this file belongs to.
    pub fn descriptors(&self) -> &Arc<DescriptorTable> {
        &self.descriptors
    }

    /// The handle-mapping table.
    pub fn prime(&self) -> &PrimeFilePrivate {
        &self.prime
    }

    pub(crate) fn prime_mut(&mut self) -> &mut PrimeFilePrivate {
        &mut self.prime
    }

    /// Create a new handle for `obj`. The handle holds a reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] when the file's handle limit is reached.
    pub fn handle_create(&mut self, obj: &GemObject) -> Result<u32> {
        if self.handles.len() >= self.max_handles {
            return Err(Error::OutOfMemory);
        }

        let mut handle = defaults::FIRST_HANDLE;
        for &used in self.handles.keys() {
            if used != handle {
                break;
            }
            handle += 1;
        }

        self.handles.insert(handle, obj.clone());
        obj.handle_acquired();
        tracing::trace!(file = %self.id, handle, object = %obj.id(), "handle created");
        Ok(handle)
    }

    /// Look up the object behind `handle`, acquiring a reference.
    pub fn lookup(&self, handle: u32) -> Result<GemObject> {
        self.handles
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("handle {handle} in {}", self.id)))
    }

    /// Delete `handle`, dropping its reference.
    ///
    /// Also drops the handle's mapping entry, if it has one, so a later
    /// import of that buffer creates a fresh handle.
    pub fn handle_delete(&mut self, handle: u32) -> Result<()> {
        let obj = self
            .handles
            .remove(&handle)
            .ok_or_else(|| Error::NotFound(format!("handle {handle} in {}", self.id)))?;
        self.forget(handle, &obj);
        Ok(())
    }

    fn forget(&mut self, handle: u32, obj: &GemObject) {
        self.prime.remove_handle(handle);
        obj.handle_released();
        tracing::trace!(file = %self.id, handle, object = %obj.id(), "handle deleted");
    }

    /// Number of live handles.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Close the file, releasing every handle and the handle-mapping table.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let handles = std::mem::take(&mut self.handles);
        let count = handles.len();
        for (handle, obj) in handles {
            self.forget(handle, &obj);
        }
        self.prime.destroy();
        tracing::debug!(device = %self.device, file = %self.id, handles = count, "file released");
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("handles", &self.handles.len())
            .field("prime_entries", &self.prime.len())
            .finish()
    }
}
