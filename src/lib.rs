//! # drm-prime
//!
//! PRIME buffer sharing for GEM-style buffer objects.
//!
//! A client refers to its buffers through local integer handles that mean
//! nothing outside its [`File`](file::File). PRIME connects those handles to
//! shareable, reference-counted buffers ([`DmaBuf`](dmabuf::DmaBuf)) that can
//! travel between processes and drivers as descriptors:
//!
//! - **Export** (`PRIME_HANDLE_TO_FD`): local handle -> descriptor. An object
//!   is wrapped in at most one live buffer; exporting again reuses it.
//! - **Import** (`PRIME_FD_TO_HANDLE`): descriptor -> local handle. A file
//!   gets at most one handle per buffer; importing again returns it.
//!
//! Imported objects cannot be re-exported, which keeps the reference chain
//! `importing object -> buffer -> exporting object` acyclic.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use drm_prime::prelude::*;
//! use std::sync::Arc;
//!
//! let dev = Device::new(ShmemDriver, DeviceConfig::new("card0"));
//! let process = Arc::new(DescriptorTable::new());
//! let mut exporter = dev.open(Arc::clone(&process));
//! let mut importer = dev.open(process);
//!
//! let handle = dev.driver().create_object(&mut exporter, 4096)?;
//! let mut args = PrimeHandle { handle, flags: DRM_CLOEXEC, fd: -1 };
//! prime_handle_to_fd_ioctl(&dev, &mut args, &mut exporter)?;
//! prime_fd_to_handle_ioctl(&dev, &mut args, &mut importer)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod device;
pub mod dmabuf;
pub mod error;
pub mod file;
pub mod gem;
pub mod ioctl;
pub mod observability;
pub mod prime;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{DescriptorTableConfig, DeviceConfig};
    pub use crate::device::{Device, Driver, DriverFeatures, PrimeOps};
    pub use crate::dmabuf::{DescriptorTable, DmaBuf, DmaBufOps, RawDescriptor};
    pub use crate::error::{Error, Result};
    pub use crate::file::File;
    pub use crate::gem::GemObject;
    pub use crate::gem::shmem::ShmemDriver;
    pub use crate::ioctl::{
        DRM_CLOEXEC, PrimeHandle, prime_fd_to_handle_ioctl, prime_handle_to_fd_ioctl,
    };
    pub use crate::prime::{PrimeFlags, gem_prime_fd_to_handle, gem_prime_handle_to_fd};
}

pub use error::{Error, Result};
