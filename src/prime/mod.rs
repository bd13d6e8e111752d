//! PRIME: sharing driver objects through transferable descriptors.
//!
//! Two paths connect a file's local handles with the global buffer
//! namespace:
//!
//! - [`gem_prime_handle_to_fd`] exports a native object. The object's
//!   buffer is created once and reused for every later export while alive.
//! - [`gem_prime_fd_to_handle`] imports a buffer. A file gets at most one
//!   handle per buffer: re-importing returns the handle it already has.
//!
//! # References
//!
//! The exported buffer holds a reference on the exporting object. An
//! imported object holds a reference on the buffer, through its attachment.
//! Imported objects are never re-exported, so references always flow
//! `importing object -> buffer -> exporting object` and never loop.
//!
//! A buffer imported into the device that exported it comes back as the
//! exporting object itself. That object is never attached to its own
//! buffer; the import path only adds a handle and a mapping entry.
//!
//! Both paths expect exclusive access to the file (`&mut File`) and release
//! everything they acquired before returning an error.

mod sg;
mod table;

pub use sg::{Page, Scatterlist, SgTable, pages_to_sg};
pub use table::PrimeFilePrivate;

use crate::device::{Device, Driver};
use crate::dmabuf::{DmaBuf, RawDescriptor};
use crate::error::{Error, Result};
use crate::file::File;
use crate::gem::GemObject;
use crate::observability;
use std::ops::BitOr;

/// Flags accepted when exporting a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrimeFlags(u32);

impl PrimeFlags {
    /// Mark the new descriptor close-on-exec. Same value as `O_CLOEXEC`.
    pub const CLOEXEC: Self = Self(rustix::fs::OFlags::CLOEXEC.bits());

    const ALL: u32 = Self::CLOEXEC.0;

    /// No flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Convert raw bits, rejecting any unknown bit.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// Whether every flag in `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PrimeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Export the object behind `handle` as a new descriptor.
///
/// Every successful call yields a new descriptor holding one buffer
/// reference; the caller closes it. The buffer is also recorded in the
/// file's mapping table, so importing it back into this file returns
/// `handle`.
///
/// # Errors
///
/// - [`Error::NotFound`] if `handle` is unknown to `file`
/// - [`Error::InvalidOperation`] if the object was imported
/// - [`Error::OutOfMemory`] if the mapping entry cannot be allocated
/// - whatever the driver's export callback or the descriptor table return
pub fn gem_prime_handle_to_fd<D: Driver>(
    dev: &Device<D>,
    file: &mut File,
    handle: u32,
    flags: PrimeFlags,
) -> Result<RawDescriptor> {
    let obj = file.lookup(handle)?;

    if obj.is_import() {
        return Err(Error::InvalidOperation(format!(
            "handle {handle} refers to an imported buffer and cannot be re-exported"
        )));
    }

    let (dma_buf, reused) =
        obj.export_or_insert_with(|| dev.driver().gem_prime_export(dev, &obj, flags))?;
    let dma_buf_id = dma_buf.id();

    let mapped = file.prime().lookup(&dma_buf).is_ok();
    if !mapped {
        file.prime_mut().insert(&dma_buf, handle)?;
    }

    let fd = match file.descriptors().publish(dma_buf, flags) {
        Ok(fd) => fd,
        Err(e) => {
            if !mapped {
                file.prime_mut().remove_id(dma_buf_id);
            }
            return Err(e);
        }
    };

    observability::record_export(reused);
    tracing::debug!(
        device = %dev.name(),
        file = %file.id(),
        handle,
        fd,
        dma_buf = %dma_buf_id,
        reused,
        "handle exported"
    );
    Ok(fd)
}

/// Import the buffer behind `fd`, returning this file's handle for it.
///
/// Importing a buffer the file already has a handle for returns that handle.
/// A buffer exported by this device comes back as its exporting object,
/// which stays exportable.
///
/// # Errors
///
/// - [`Error::InvalidDescriptor`] if `fd` does not resolve to a buffer
/// - [`Error::InvalidOperation`] if the driver returns an object that
///   neither wraps nor exported the buffer
/// - [`Error::OutOfMemory`] if the handle or the mapping entry cannot be allocated
/// - whatever the driver's import callback returns
pub fn gem_prime_fd_to_handle<D: Driver>(
    dev: &Device<D>,
    file: &mut File,
    fd: RawDescriptor,
) -> Result<u32> {
    // Provisional reference, dropped on every return path.
    let dma_buf = file.descriptors().resolve(fd)?;

    if let Ok(handle) = file.prime().lookup(&dma_buf) {
        observability::record_import(true);
        tracing::debug!(file = %file.id(), fd, handle, dma_buf = %dma_buf.id(), reused = true, "descriptor imported");
        return Ok(handle);
    }

    let obj = dev.driver().gem_prime_import(dev, &dma_buf)?;
    let self_import = check_import(&obj, &dma_buf)?;

    let handle = match file.handle_create(&obj) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(file = %file.id(), fd, error = %e, "import failed, destroying object");
            if !self_import {
                prime_gem_destroy(&obj);
            }
            return Err(e);
        }
    };
    // The handle now owns the object.
    drop(obj);

    if let Err(e) = file.prime_mut().insert(&dma_buf, handle) {
        tracing::warn!(file = %file.id(), fd, handle, error = %e, "import failed, deleting handle");
        // Dropping the last object reference detaches and releases the buffer.
        if let Err(delete_err) = file.handle_delete(handle) {
            tracing::warn!(file = %file.id(), handle, error = %delete_err, "failed to delete new handle");
        }
        return Err(e);
    }

    observability::record_import(false);
    tracing::debug!(
        device = %dev.name(),
        file = %file.id(),
        fd,
        handle,
        dma_buf = %dma_buf.id(),
        reused = false,
        self_import,
        "descriptor imported"
    );
    Ok(handle)
}

/// Check the object a driver returned for `dma_buf`.
///
/// Returns whether it is the buffer's own exporting object. Anything that
/// neither exported nor wraps `dma_buf` is rejected; dropping it releases
/// whatever it holds.
fn check_import(obj: &GemObject, dma_buf: &DmaBuf) -> Result<bool> {
    if obj.export_dma_buf().is_some_and(|exported| exported.same_as(dma_buf)) {
        return Ok(true);
    }
    match obj.import_dma_buf() {
        Some(imported) if imported.same_as(dma_buf) => Ok(false),
        Some(imported) => Err(Error::InvalidOperation(format!(
            "{} wraps {} instead of {}",
            obj.id(),
            imported.id(),
            dma_buf.id()
        ))),
        None => Err(Error::InvalidOperation(format!(
            "{} neither exported nor imported {}",
            obj.id(),
            dma_buf.id()
        ))),
    }
}

/// Tear down the import association of `obj`.
///
/// Unmaps the import's mapping (if any), detaches from the buffer and
/// drops the buffer reference. Does nothing for objects without an import
/// association, so it is safe to call more than once and while unwinding.
pub fn prime_gem_destroy(obj: &GemObject) {
    if let Some(import) = obj.take_import_attach() {
        tracing::trace!(object = %obj.id(), "destroying prime import");
        import.destroy();
    }
}
