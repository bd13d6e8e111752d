//! Drivers and devices.
//!
//! A [`Driver`] supplies the two PRIME callbacks the core cannot provide
//! itself: turning one of its objects into a shareable buffer, and wrapping
//! a foreign shareable buffer in one of its objects. A [`Device`] binds a
//! driver to its configuration and opens client [`File`]s.

use crate::config::DeviceConfig;
use crate::dmabuf::{DescriptorTable, DmaBuf, RawDescriptor};
use crate::error::Result;
use crate::file::{File, FileId};
use crate::gem::GemObject;
use crate::prime::{self, PrimeFlags};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Capabilities a driver advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DriverFeatures(u32);

impl DriverFeatures {
    /// Driver manages GEM buffer objects.
    pub const GEM: Self = Self(0x1000);
    /// Driver supports PRIME buffer sharing.
    pub const PRIME: Self = Self(0x4000);

    /// No features.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every feature in `other` is present.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DriverFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Handle-to-descriptor hook.
pub type HandleToFdFn<D> = fn(&Device<D>, &mut File, u32, PrimeFlags) -> Result<RawDescriptor>;

/// Descriptor-to-handle hook.
pub type FdToHandleFn<D> = fn(&Device<D>, &mut File, RawDescriptor) -> Result<u32>;

/// The PRIME ioctl hooks of a driver.
///
/// Most drivers use [`PrimeOps::gem`], the generic implementations in
/// [`prime`]. A missing hook makes the matching ioctl fail with
/// [`Error::NotSupported`](crate::Error::NotSupported).
pub struct PrimeOps<D: Driver> {
    /// Hook behind `PRIME_HANDLE_TO_FD`.
    pub handle_to_fd: Option<HandleToFdFn<D>>,
    /// Hook behind `PRIME_FD_TO_HANDLE`.
    pub fd_to_handle: Option<FdToHandleFn<D>>,
}

impl<D: Driver> PrimeOps<D> {
    /// The generic GEM helpers.
    pub fn gem() -> Self {
        Self {
            handle_to_fd: Some(prime::gem_prime_handle_to_fd::<D>),
            fd_to_handle: Some(prime::gem_prime_fd_to_handle::<D>),
        }
    }

    /// No hooks.
    pub fn none() -> Self {
        Self {
            handle_to_fd: None,
            fd_to_handle: None,
        }
    }
}

/// Driver callbacks used by the PRIME core.
pub trait Driver: Send + Sync + Sized + 'static {
    /// Driver name.
    const NAME: &'static str;

    /// Advertised capabilities.
    fn features(&self) -> DriverFeatures {
        DriverFeatures::GEM | DriverFeatures::PRIME
    }

    /// Wrap `obj` in a new shareable buffer.
    ///
    /// The returned buffer must keep `obj` alive (typically by owning a
    /// clone of it in its [`DmaBufOps`](crate::dmabuf::DmaBufOps)).
    ///
    /// Runs with `obj`'s export lock held, so it must not call
    /// [`GemObject::export_dma_buf`] on `obj`; that deadlocks.
    fn gem_prime_export(
        &self,
        dev: &Device<Self>,
        obj: &GemObject,
        flags: PrimeFlags,
    ) -> Result<DmaBuf>;

    /// Return an object for `dma_buf`.
    ///
    /// Either a new object wrapping `dma_buf`, created with
    /// [`GemObject::new_import`] so it holds its own buffer reference, or,
    /// when `dma_buf` is this device's own export, the exporting object
    /// itself. Any other object is rejected with
    /// [`Error::InvalidOperation`](crate::Error::InvalidOperation).
    fn gem_prime_import(&self, dev: &Device<Self>, dma_buf: &DmaBuf) -> Result<GemObject>;

    /// PRIME ioctl hooks.
    fn prime_ops(&self) -> PrimeOps<Self> {
        PrimeOps::gem()
    }
}

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev:{}", self.0)
    }
}

/// A driver instance and its configuration.
pub struct Device<D: Driver> {
    id: DeviceId,
    driver: D,
    config: DeviceConfig,
    next_file_id: AtomicU64,
}

impl<D: Driver> Device<D> {
    /// Create a device.
    pub fn new(driver: D, config: DeviceConfig) -> Self {
        let id = DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(device = %config.name, id = %id, driver = D::NAME, "device created");
        Self {
            id,
            driver,
            config,
            next_file_id: AtomicU64::new(1),
        }
    }

    /// Identity of this device.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Driver capabilities.
    pub fn features(&self) -> DriverFeatures {
        self.driver.features()
    }

    /// Open a client file for a process owning `descriptors`.
    pub fn open(&self, descriptors: Arc<DescriptorTable>) -> File {
        let id = FileId::new(self.next_file_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(device = %self.config.name, file = %id, "file opened");
        File::new(id, &self.config, descriptors)
    }
}

impl<D: Driver> fmt::Debug for Device<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("driver", &D::NAME)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features() {
        let all = DriverFeatures::GEM | DriverFeatures::PRIME;
        assert!(all.contains(DriverFeatures::PRIME));
        assert!(all.contains(DriverFeatures::GEM));
        assert!(!DriverFeatures::GEM.contains(DriverFeatures::PRIME));
        assert!(DriverFeatures::empty().contains(DriverFeatures::empty()));
        assert_eq!(all.bits(), 0x5000);
    }
}
