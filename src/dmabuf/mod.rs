//! Shareable buffer objects.
//!
//! A [`DmaBuf`] is the cross-driver, reference-counted buffer that PRIME
//! hands around. Cloning a `DmaBuf` acquires a reference and dropping one
//! releases it; when the last reference goes away the exporter's
//! [`DmaBufOps::release`] runs and the exporter's private data is dropped.
//!
//! # Reference chain
//!
//! ```text
//! importing GemObject -> DmaBufAttachment -> DmaBuf -> DmaBufOps -> exporting GemObject
//! ```
//!
//! References only ever flow in this direction. The exporting object
//! remembers its buffer through a [`WeakDmaBuf`], which never keeps the
//! buffer alive, so no cycle can form.
//!
//! Buffers are published to userspace through a [`DescriptorTable`], which
//! plays the role of a process's file descriptor table.

mod attachment;
mod fd_table;

pub use attachment::{DataDirection, DmaBufAttachment};
pub use fd_table::{DescriptorTable, RawDescriptor};

use crate::error::{Error, Result};
use crate::prime::SgTable;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Source of buffer ids. Ids are never reused within a process.
static NEXT_DMA_BUF_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`DmaBuf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DmaBufId(u64);

impl DmaBufId {
    /// Raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DmaBufId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dmabuf:{}", self.0)
    }
}

/// Exporter callbacks for a [`DmaBuf`].
///
/// The ops value owns the exporter's private data. An exporter that wraps a
/// driver object keeps a clone of that object here, which is how the buffer
/// holds its reference on the exporting object.
pub trait DmaBufOps: Any + Send + Sync {
    /// Called when an importer attaches. Returning an error refuses the attachment.
    fn attach(&self, _attachment: &DmaBufAttachment) -> Result<()> {
        Ok(())
    }

    /// Called when an attachment goes away.
    fn detach(&self, _attachment: &DmaBufAttachment) {}

    /// Map the buffer for the attached device.
    fn map_attachment(
        &self,
        attachment: &DmaBufAttachment,
        direction: DataDirection,
    ) -> Result<SgTable>;

    /// Undo [`map_attachment`](Self::map_attachment).
    fn unmap_attachment(
        &self,
        _attachment: &DmaBufAttachment,
        _sg: SgTable,
        _direction: DataDirection,
    ) {
    }

    /// Called exactly once, when the last reference to the buffer is dropped.
    fn release(&self) {}
}

/// Arguments for [`DmaBuf::export`].
pub struct DmaBufExportInfo {
    /// Exporter name, for diagnostics.
    pub exporter: &'static str,
    /// Buffer size in bytes.
    pub size: usize,
    /// Exporter callbacks and private data.
    pub ops: Box<dyn DmaBufOps>,
}

struct DmaBufInner {
    id: DmaBufId,
    exporter: &'static str,
    size: usize,
    ops: Box<dyn DmaBufOps>,
    attachments: AtomicUsize,
}

impl Drop for DmaBufInner {
    fn drop(&mut self) {
        tracing::trace!(dma_buf = %self.id, exporter = self.exporter, "dma-buf released");
        self.ops.release();
    }
}

/// A reference to a shareable buffer object.
///
/// Equality of buffers is identity: two `DmaBuf` values are the same buffer
/// iff [`same_as`](Self::same_as) holds, regardless of contents.
#[derive(Clone)]
pub struct DmaBuf {
    inner: Arc<DmaBufInner>,
}

impl DmaBuf {
    /// Create a new buffer. The caller receives the only reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero-sized buffer.
    pub fn export(info: DmaBufExportInfo) -> Result<Self> {
        if info.size == 0 {
            return Err(Error::InvalidArgument(format!(
                "{}: cannot export an empty buffer",
                info.exporter
            )));
        }

        let id = DmaBufId(NEXT_DMA_BUF_ID.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(dma_buf = %id, exporter = info.exporter, size = info.size, "dma-buf exported");

        Ok(Self {
            inner: Arc::new(DmaBufInner {
                id,
                exporter: info.exporter,
                size: info.size,
                ops: info.ops,
                attachments: AtomicUsize::new(0),
            }),
        })
    }

    /// Identity of this buffer.
    #[inline]
    pub fn id(&self) -> DmaBufId {
        self.inner.id
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Exporter name.
    #[inline]
    pub fn exporter(&self) -> &'static str {
        self.inner.exporter
    }

    /// Number of live references (descriptors, attachments, handles in flight).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Number of live attachments.
    pub fn attachment_count(&self) -> usize {
        self.inner.attachments.load(Ordering::Acquire)
    }

    /// Whether `other` refers to the same buffer.
    #[inline]
    pub fn same_as(&self, other: &DmaBuf) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Create a non-owning handle to this buffer.
    pub fn downgrade(&self) -> WeakDmaBuf {
        WeakDmaBuf {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Downcast the exporter's ops to a concrete type.
    ///
    /// Exporters use this to recognise their own buffers.
    pub fn exporter_ops<T: DmaBufOps>(&self) -> Option<&T> {
        let ops: &dyn Any = self.inner.ops.as_ref();
        ops.downcast_ref::<T>()
    }

    /// Attach a device to this buffer.
    ///
    /// The attachment holds a reference to the buffer until it is dropped.
    pub fn attach(&self, device: &str) -> Result<DmaBufAttachment> {
        let mut attachment = DmaBufAttachment::new(self.clone(), device);
        self.inner.ops.attach(&attachment)?;
        self.inner.attachments.fetch_add(1, Ordering::AcqRel);
        attachment.activate();
        Ok(attachment)
    }

    pub(crate) fn ops(&self) -> &dyn DmaBufOps {
        self.inner.ops.as_ref()
    }

    pub(crate) fn attachment_dropped(&self) {
        self.inner.attachments.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for DmaBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuf")
            .field("id", &self.inner.id)
            .field("exporter", &self.inner.exporter)
            .field("size", &self.inner.size)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// A non-owning reference to a [`DmaBuf`].
#[derive(Clone)]
pub struct WeakDmaBuf {
    id: DmaBufId,
    inner: Weak<DmaBufInner>,
}

impl WeakDmaBuf {
    /// Identity of the referenced buffer, valid even after it was released.
    pub fn id(&self) -> DmaBufId {
        self.id
    }

    /// Acquire a reference if the buffer is still alive.
    pub fn upgrade(&self) -> Option<DmaBuf> {
        self.inner.upgrade().map(|inner| DmaBuf { inner })
    }

    /// Whether the buffer has been released.
    pub fn is_released(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl fmt::Debug for WeakDmaBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDmaBuf")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::prime::Page;
    use std::sync::atomic::AtomicBool;

    /// Exporter that maps to a fixed page list and records release.
    pub(crate) struct TestOps {
        pub pages: usize,
        pub released: Arc<AtomicBool>,
        pub refuse_attach: bool,
    }

    impl TestOps {
        pub(crate) fn new(pages: usize) -> Self {
            Self {
                pages,
                released: Arc::new(AtomicBool::new(false)),
                refuse_attach: false,
            }
        }
    }

    impl DmaBufOps for TestOps {
        fn attach(&self, _attachment: &DmaBufAttachment) -> Result<()> {
            if self.refuse_attach {
                return Err(Error::InvalidOperation("attach refused".into()));
            }
            Ok(())
        }

        fn map_attachment(
            &self,
            _attachment: &DmaBufAttachment,
            _direction: DataDirection,
        ) -> Result<SgTable> {
            let page_size = rustix::param::page_size();
            let pages: Vec<Page> = (0..self.pages)
                .map(|i| Page::from_addr(0x10_0000 + i * page_size))
                .collect();
            SgTable::from_pages(&pages)
        }

        fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn test_buf(pages: usize) -> DmaBuf {
        DmaBuf::export(DmaBufExportInfo {
            exporter: "test",
            size: pages * rustix::param::page_size(),
            ops: Box::new(TestOps::new(pages)),
        })
        .unwrap()
    }

    #[test]
    fn test_export_rejects_empty() {
        let result = DmaBuf::export(DmaBufExportInfo {
            exporter: "test",
            size: 0,
            ops: Box::new(TestOps::new(0)),
        });
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_identity_not_content() {
        let a = test_buf(1);
        let b = test_buf(1);
        let a2 = a.clone();

        assert!(a.same_as(&a2));
        assert!(!a.same_as(&b));
        assert_eq!(a.id(), a2.id());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.ref_count(), 2);
    }

    #[test]
    fn test_release_runs_once_on_last_drop() {
        let ops = TestOps::new(1);
        let released = Arc::clone(&ops.released);
        let buf = DmaBuf::export(DmaBufExportInfo {
            exporter: "test",
            size: 4096,
            ops: Box::new(ops),
        })
        .unwrap();
        let clone = buf.clone();

        drop(buf);
        assert!(!released.load(Ordering::SeqCst));
        drop(clone);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_weak_does_not_keep_alive() {
        let buf = test_buf(1);
        let id = buf.id();
        let weak = buf.downgrade();

        assert_eq!(buf.ref_count(), 1);
        assert!(weak.upgrade().is_some_and(|b| b.same_as(&buf)));

        drop(buf);
        assert!(weak.is_released());
        assert!(weak.upgrade().is_none());
        assert_eq!(weak.id(), id);
    }

    #[test]
    fn test_exporter_ops_downcast() {
        let buf = test_buf(2);
        assert_eq!(buf.exporter_ops::<TestOps>().map(|ops| ops.pages), Some(2));
    }

    #[test]
    fn test_attach_holds_reference() {
        let buf = test_buf(1);
        let attachment = buf.attach("card1").unwrap();

        assert_eq!(buf.ref_count(), 2);
        assert_eq!(buf.attachment_count(), 1);
        assert!(attachment.dma_buf().same_as(&buf));

        drop(attachment);
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(buf.attachment_count(), 0);
    }

    #[test]
    fn test_refused_attach_leaks_nothing() {
        let mut ops = TestOps::new(1);
        ops.refuse_attach = true;
        let buf = DmaBuf::export(DmaBufExportInfo {
            exporter: "test",
            size: 4096,
            ops: Box::new(ops),
        })
        .unwrap();

        assert!(buf.attach("card1").is_err());
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(buf.attachment_count(), 0);
    }
}
