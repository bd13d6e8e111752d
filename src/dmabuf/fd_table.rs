//! Per-process descriptor table for published buffers.
//!
//! Descriptors are what userspace holds and passes between processes. Each
//! open descriptor owns one buffer reference; closing it releases that
//! reference. Descriptor numbers are allocated lowest-free first, like the
//! kernel's file descriptor table.

use super::DmaBuf;
use crate::config::DescriptorTableConfig;
use crate::error::{Error, Result};
use crate::prime::PrimeFlags;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A transferable descriptor number.
pub type RawDescriptor = i32;

struct OpenDescriptor {
    dma_buf: DmaBuf,
    cloexec: bool,
}

/// Descriptor table of one process.
///
/// Share it between the files a process opens with an `Arc`. There is no
/// global table: every process (and every test) owns its own.
pub struct DescriptorTable {
    config: DescriptorTableConfig,
    open: Mutex<BTreeMap<RawDescriptor, OpenDescriptor>>,
}

impl DescriptorTable {
    /// Create an empty table with default limits.
    pub fn new() -> Self {
        Self::with_config(DescriptorTableConfig::default())
    }

    /// Create an empty table with the given limits.
    pub fn with_config(config: DescriptorTableConfig) -> Self {
        Self {
            config,
            open: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RawDescriptor, OpenDescriptor>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lowest_free(&self, open: &BTreeMap<RawDescriptor, OpenDescriptor>) -> Result<RawDescriptor> {
        if open.len() >= self.config.max_descriptors {
            return Err(Error::DescriptorsExhausted);
        }
        let mut candidate = self.config.first_descriptor;
        for &fd in open.keys() {
            if fd != candidate {
                break;
            }
            candidate += 1;
        }
        Ok(candidate)
    }

    /// Wrap `dma_buf` in a new descriptor.
    ///
    /// The descriptor takes over the passed reference. On error the reference
    /// is dropped, which may release the buffer.
    pub fn publish(&self, dma_buf: DmaBuf, flags: PrimeFlags) -> Result<RawDescriptor> {
        let mut open = self.lock();
        let fd = self.lowest_free(&open)?;
        let id = dma_buf.id();
        open.insert(
            fd,
            OpenDescriptor {
                dma_buf,
                cloexec: flags.contains(PrimeFlags::CLOEXEC),
            },
        );
        tracing::trace!(fd, dma_buf = %id, "descriptor published");
        Ok(fd)
    }

    /// Resolve a descriptor to its buffer, acquiring a new reference.
    pub fn resolve(&self, fd: RawDescriptor) -> Result<DmaBuf> {
        self.lock()
            .get(&fd)
            .map(|open| open.dma_buf.clone())
            .ok_or(Error::InvalidDescriptor(fd))
    }

    /// Close a descriptor, releasing its reference.
    pub fn close(&self, fd: RawDescriptor) -> Result<()> {
        // Removed outside the lock so a final release never runs under it.
        let removed = self.lock().remove(&fd);
        match removed {
            Some(open) => {
                tracing::trace!(fd, dma_buf = %open.dma_buf.id(), "descriptor closed");
                Ok(())
            }
            None => Err(Error::InvalidDescriptor(fd)),
        }
    }

    /// Duplicate `fd` into another process's table, the way SCM_RIGHTS does.
    pub fn transfer(
        &self,
        fd: RawDescriptor,
        dest: &DescriptorTable,
        flags: PrimeFlags,
    ) -> Result<RawDescriptor> {
        let dma_buf = self.resolve(fd)?;
        dest.publish(dma_buf, flags)
    }

    /// Whether `fd` is marked close-on-exec.
    pub fn is_cloexec(&self, fd: RawDescriptor) -> Result<bool> {
        self.lock()
            .get(&fd)
            .map(|open| open.cloexec)
            .ok_or(Error::InvalidDescriptor(fd))
    }

    /// Close every close-on-exec descriptor. Returns how many were closed.
    pub fn exec(&self) -> usize {
        let closed: Vec<OpenDescriptor> = {
            let mut open = self.lock();
            let fds: Vec<RawDescriptor> = open
                .iter()
                .filter(|(_, o)| o.cloexec)
                .map(|(&fd, _)| fd)
                .collect();
            fds.iter().filter_map(|fd| open.remove(fd)).collect()
        };
        closed.len()
    }

    /// Number of open descriptors.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no descriptor is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("open", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmabuf::tests::test_buf;

    #[test]
    fn test_publish_lowest_free() {
        let table = DescriptorTable::new();
        let a = table.publish(test_buf(1), PrimeFlags::empty()).unwrap();
        let b = table.publish(test_buf(1), PrimeFlags::empty()).unwrap();
        let c = table.publish(test_buf(1), PrimeFlags::empty()).unwrap();
        assert_eq!((a, b, c), (3, 4, 5));

        table.close(b).unwrap();
        let d = table.publish(test_buf(1), PrimeFlags::empty()).unwrap();
        assert_eq!(d, 4);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_resolve_acquires_reference() {
        let table = DescriptorTable::new();
        let buf = test_buf(1);
        let fd = table.publish(buf.clone(), PrimeFlags::empty()).unwrap();
        assert_eq!(buf.ref_count(), 2);

        let resolved = table.resolve(fd).unwrap();
        assert!(resolved.same_as(&buf));
        assert_eq!(buf.ref_count(), 3);

        drop(resolved);
        table.close(fd).unwrap();
        assert_eq!(buf.ref_count(), 1);
    }

    #[test]
    fn test_unknown_descriptor() {
        let table = DescriptorTable::new();
        assert!(matches!(table.resolve(3), Err(Error::InvalidDescriptor(3))));
        assert!(matches!(table.close(9), Err(Error::InvalidDescriptor(9))));
        assert!(matches!(table.is_cloexec(9), Err(Error::InvalidDescriptor(9))));
    }

    #[test]
    fn test_exhaustion() {
        let config = DescriptorTableConfig::default().with_max_descriptors(2);
        let table = DescriptorTable::with_config(config);
        let buf = test_buf(1);
        table.publish(buf.clone(), PrimeFlags::empty()).unwrap();
        table.publish(buf.clone(), PrimeFlags::empty()).unwrap();

        let result = table.publish(buf.clone(), PrimeFlags::empty());
        assert!(matches!(result, Err(Error::DescriptorsExhausted)));
        // The rejected reference was dropped, not leaked.
        assert_eq!(buf.ref_count(), 3);
    }

    #[test]
    fn test_transfer_between_tables() {
        let a = DescriptorTable::new();
        let b = DescriptorTable::new();
        let buf = test_buf(1);
        let fd = a.publish(buf.clone(), PrimeFlags::empty()).unwrap();

        let fd_b = a.transfer(fd, &b, PrimeFlags::empty()).unwrap();
        assert!(b.resolve(fd_b).unwrap().same_as(&buf));

        a.close(fd).unwrap();
        assert!(b.resolve(fd_b).is_ok());
    }

    #[test]
    fn test_exec_closes_cloexec_only() {
        let table = DescriptorTable::new();
        let keep = table.publish(test_buf(1), PrimeFlags::empty()).unwrap();
        let gone = table.publish(test_buf(1), PrimeFlags::CLOEXEC).unwrap();

        assert!(!table.is_cloexec(keep).unwrap());
        assert!(table.is_cloexec(gone).unwrap());

        assert_eq!(table.exec(), 1);
        assert!(table.resolve(keep).is_ok());
        assert!(table.resolve(gone).is_err());
    }
}
