//! Shared-memory GEM driver.
//!
//! Objects are backed by anonymous shared memory (`memfd_create` + `mmap`).
//! Exported buffers map to the object's pages; imported buffers are
//! attached and mapped for this device. A buffer exported by the same
//! device imports as its exporting object. When the imported buffer came
//! from another shmem device, its contents stay reachable through
//! [`ShmemDriver::with_segment`].
//!
//! # Example
//!
//! ```rust,ignore
//! use drm_prime::prelude::*;
//!
//! let dev = Device::new(ShmemDriver, DeviceConfig::new("card0"));
//! let mut file = dev.open(Arc::new(DescriptorTable::new()));
//! let handle = dev.driver().create_object(&mut file, 64 * 1024)?;
//! ```

use crate::device::{Device, DeviceId, Driver};
use crate::dmabuf::{DataDirection, DmaBuf, DmaBufAttachment, DmaBufExportInfo, DmaBufOps};
use crate::error::{Error, Result};
use crate::file::File;
use crate::gem::GemObject;
use crate::prime::{Page, PrimeFlags, SgTable};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::mm::{MapFlags, ProtFlags};
use std::ffi::CString;
use std::ptr::NonNull;

/// Anonymous shared memory mapped into this process.
pub struct ShmemSegment {
    /// The memfd file descriptor.
    fd: OwnedFd,
    /// Pointer to the mmap'd region.
    ptr: NonNull<u8>,
    /// Size of the segment.
    len: usize,
}

impl ShmemSegment {
    /// Create a segment of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is 0 or `memfd_create`, `ftruncate` or
    /// `mmap` fails.
    pub fn new(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("size must be greater than 0".into()));
        }

        let cname = CString::new(name).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let fd = rustix::fs::memfd_create(&cname, rustix::fs::MemfdFlags::CLOEXEC)?;
        rustix::fs::ftruncate(&fd, size as u64)?;

        // SAFETY: fresh shared mapping of a file we own, sized above.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )?
        };

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or(Error::OutOfMemory)?;

        Ok(Self { fd, ptr, len: size })
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the segment is empty (never true for a constructed segment).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The pages backing the mapping.
    pub fn pages(&self) -> Vec<Page> {
        let page_size = rustix::param::page_size();
        let base = self.ptr.as_ptr() as usize;
        (0..self.len)
            .step_by(page_size)
            .map(|offset| Page::from_addr(base + offset))
            .collect()
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::InvalidArgument(format!(
                "range {offset}+{len} outside {} byte segment",
                self.len
            ))),
        }
    }

    /// Copy `data` into the segment at `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        // SAFETY: range checked above; the mapping lives as long as self.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Copy bytes at `offset` into `buf`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        // SAFETY: range checked above; the mapping lives as long as self.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}

impl Drop for ShmemSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping created in new().
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
        // fd is closed when OwnedFd is dropped
    }
}

// SAFETY: the mapping is shared memory with no thread-local state; the fd
// is reference-counted by the kernel.
unsafe impl Send for ShmemSegment {}
unsafe impl Sync for ShmemSegment {}

impl AsFd for ShmemSegment {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl std::fmt::Debug for ShmemSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmemSegment").field("len", &self.len).finish()
    }
}

/// Private data of a native shmem object.
#[derive(Debug)]
pub struct ShmemObject {
    segment: ShmemSegment,
}

impl ShmemObject {
    /// The backing segment.
    pub fn segment(&self) -> &ShmemSegment {
        &self.segment
    }
}

/// Private data of an imported shmem object.
#[derive(Debug, Clone, Copy)]
pub struct ShmemImport {
    /// Name of the exporter the buffer came from.
    pub exporter: &'static str,
}

/// Exporter ops of a shmem buffer. Owns a reference to the exported object.
pub struct ShmemExport {
    device: DeviceId,
    obj: GemObject,
}

impl ShmemExport {
    /// The exported object.
    pub fn object(&self) -> &GemObject {
        &self.obj
    }

    /// The exporting device.
    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl DmaBufOps for ShmemExport {
    fn map_attachment(
        &self,
        attachment: &DmaBufAttachment,
        direction: DataDirection,
    ) -> Result<SgTable> {
        let shmem = self
            .obj
            .data::<ShmemObject>()
            .ok_or_else(|| Error::InvalidOperation(format!("{} is not a shmem object", self.obj.id())))?;
        tracing::trace!(object = %self.obj.id(), device = attachment.device(), ?direction, "mapping shmem buffer");
        SgTable::from_pages(&shmem.segment.pages())
    }

    fn release(&self) {
        tracing::trace!(object = %self.obj.id(), "shmem export released");
    }
}

/// GEM driver with memfd-backed objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShmemDriver;

impl ShmemDriver {
    /// Allocate an object of at least `size` bytes and return a handle to it.
    ///
    /// The size is rounded up to whole pages.
    pub fn create_object(&self, file: &mut File, size: usize) -> Result<u32> {
        let page_size = rustix::param::page_size();
        let size = size
            .checked_next_multiple_of(page_size)
            .ok_or_else(|| Error::InvalidArgument(format!("size {size} too large")))?;

        let segment = ShmemSegment::new("drm-shmem", size)?;
        let obj = GemObject::new(size, ShmemObject { segment })?;
        file.handle_create(&obj)
    }

    /// Run `f` on the memory behind `obj`, native or imported from a shmem exporter.
    pub fn with_segment<R>(&self, obj: &GemObject, f: impl FnOnce(&ShmemSegment) -> R) -> Option<R> {
        if let Some(shmem) = obj.data::<ShmemObject>() {
            return Some(f(&shmem.segment));
        }
        let dma_buf = obj.import_dma_buf()?;
        let export = dma_buf.exporter_ops::<ShmemExport>()?;
        let shmem = export.obj.data::<ShmemObject>()?;
        Some(f(&shmem.segment))
    }
}

impl Driver for ShmemDriver {
    const NAME: &'static str = "shmem";

    fn gem_prime_export(
        &self,
        dev: &Device<Self>,
        obj: &GemObject,
        _flags: PrimeFlags,
    ) -> Result<DmaBuf> {
        if obj.data::<ShmemObject>().is_none() {
            return Err(Error::InvalidOperation(format!("{} has no shmem backing", obj.id())));
        }
        DmaBuf::export(DmaBufExportInfo {
            exporter: Self::NAME,
            size: obj.size(),
            ops: Box::new(ShmemExport {
                device: dev.id(),
                obj: obj.clone(),
            }),
        })
    }

    fn gem_prime_import(&self, dev: &Device<Self>, dma_buf: &DmaBuf) -> Result<GemObject> {
        if let Some(export) = dma_buf.exporter_ops::<ShmemExport>() {
            if export.device == dev.id() {
                return Ok(export.obj.clone());
            }
        }

        let attachment = dma_buf.attach(dev.name())?;
        let sg = attachment.map(DataDirection::Bidirectional)?;
        Ok(GemObject::new_import(
            attachment,
            Some(sg),
            ShmemImport {
                exporter: dma_buf.exporter(),
            },
        ))
    }
}
