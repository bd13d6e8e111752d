//! Driver buffer objects.
//!
//! A [`GemObject`] is a driver's buffer. It either backs buffers it exports
//! or wraps a buffer it imported, never both:
//!
//! - **Export association**: the one [`DmaBuf`] this object has exported,
//!   remembered weakly so the buffer's own reference on this object cannot
//!   form a cycle. Reused for every export while the buffer is alive.
//! - **Import association**: the attachment to the buffer this object was
//!   imported from. Imported objects are never re-exported.

pub mod shmem;

use crate::dmabuf::{DataDirection, DmaBuf, DmaBufAttachment, WeakDmaBuf};
use crate::error::{Error, Result};
use crate::prime::SgTable;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_GEM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`GemObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GemObjectId(u64);

impl fmt::Display for GemObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gem:{}", self.0)
    }
}

/// An imported object's link to its source buffer.
pub(crate) struct ImportAttach {
    attachment: DmaBufAttachment,
    sg: Option<SgTable>,
}

impl ImportAttach {
    /// Unmap, detach and drop the buffer reference.
    pub(crate) fn destroy(self) {
        let ImportAttach { attachment, sg } = self;
        if let Some(sg) = sg {
            attachment.unmap(sg, DataDirection::Bidirectional);
        }
        drop(attachment);
    }
}

struct GemObjectInner {
    id: GemObjectId,
    size: usize,
    data: Box<dyn Any + Send + Sync>,
    export_dma_buf: Mutex<Option<WeakDmaBuf>>,
    import_attach: Mutex<Option<ImportAttach>>,
    handle_count: AtomicUsize,
}

impl Drop for GemObjectInner {
    fn drop(&mut self) {
        let import = self
            .import_attach
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(import) = import {
            import.destroy();
        }
        tracing::trace!(object = %self.id, "gem object freed");
    }
}

/// A reference-counted driver buffer object.
#[derive(Clone)]
pub struct GemObject {
    inner: Arc<GemObjectInner>,
}

impl GemObject {
    fn from_parts(size: usize, data: Box<dyn Any + Send + Sync>, import: Option<ImportAttach>) -> Self {
        Self {
            inner: Arc::new(GemObjectInner {
                id: GemObjectId(NEXT_GEM_ID.fetch_add(1, Ordering::Relaxed)),
                size,
                data,
                export_dma_buf: Mutex::new(None),
                import_attach: Mutex::new(import),
                handle_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a native object with driver private data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero-sized object.
    pub fn new<T: Any + Send + Sync>(size: usize, data: T) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("object size must be > 0".into()));
        }
        Ok(Self::from_parts(size, Box::new(data), None))
    }

    /// Create an object that wraps an imported buffer.
    ///
    /// The object takes over the attachment and, if given, the mapping,
    /// and releases both when it is destroyed.
    pub fn new_import<T: Any + Send + Sync>(
        attachment: DmaBufAttachment,
        sg: Option<SgTable>,
        data: T,
    ) -> Self {
        let size = attachment.dma_buf().size();
        Self::from_parts(size, Box::new(data), Some(ImportAttach { attachment, sg }))
    }

    /// Identity of this object.
    pub fn id(&self) -> GemObjectId {
        self.inner.id
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Driver private data, if it is a `T`.
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.inner.data.downcast_ref::<T>()
    }

    /// Whether `other` is the same object.
    pub fn same_as(&self, other: &GemObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live references to this object.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Number of file handles naming this object.
    pub fn handle_count(&self) -> usize {
        self.inner.handle_count.load(Ordering::Acquire)
    }

    pub(crate) fn handle_acquired(&self) {
        self.inner.handle_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn handle_released(&self) {
        self.inner.handle_count.fetch_sub(1, Ordering::AcqRel);
    }

    fn import_lock(&self) -> MutexGuard<'_, Option<ImportAttach>> {
        self.inner
            .import_attach
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn export_lock(&self) -> MutexGuard<'_, Option<WeakDmaBuf>> {
        self.inner
            .export_dma_buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether this object was created by import.
    pub fn is_import(&self) -> bool {
        self.import_lock().is_some()
    }

    /// The buffer this object was imported from.
    pub fn import_dma_buf(&self) -> Option<DmaBuf> {
        self.import_lock()
            .as_ref()
            .map(|import| import.attachment.dma_buf().clone())
    }

    /// Whether the import carries a device mapping.
    pub fn is_import_mapped(&self) -> bool {
        self.import_lock()
            .as_ref()
            .is_some_and(|import| import.sg.is_some())
    }

    pub(crate) fn take_import_attach(&self) -> Option<ImportAttach> {
        self.import_lock().take()
    }

    /// The buffer this object exported, if it is still alive.
    pub fn export_dma_buf(&self) -> Option<DmaBuf> {
        self.export_lock().as_ref().and_then(WeakDmaBuf::upgrade)
    }

    /// Return the live exported buffer, or create one with `export`.
    ///
    /// The object's export lock is held across `export`, so concurrent
    /// callers create at most one buffer. A failed `export` leaves nothing
    /// memoized. The flag in the result tells whether the buffer was reused.
    pub(crate) fn export_or_insert_with<F>(&self, export: F) -> Result<(DmaBuf, bool)>
    where
        F: FnOnce() -> Result<DmaBuf>,
    {
        let mut memo = self.export_lock();
        if let Some(dma_buf) = memo.as_ref().and_then(WeakDmaBuf::upgrade) {
            return Ok((dma_buf, true));
        }

        let dma_buf = export()?;
        *memo = Some(dma_buf.downgrade());
        Ok((dma_buf, false))
    }
}

impl fmt::Debug for GemObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GemObject")
            .field("id", &self.inner.id)
            .field("size", &self.inner.size)
            .field("handles", &self.handle_count())
            .field("import", &self.is_import())
            .finish()
    }
}
