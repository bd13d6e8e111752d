//! PRIME ioctl entry points.
//!
//! `PRIME_HANDLE_TO_FD` and `PRIME_FD_TO_HANDLE` both operate on a
//! [`PrimeHandle`] argument, laid out like `struct drm_prime_handle`.
//! They check the driver's capabilities and flags, then dispatch to the
//! driver's [`PrimeOps`](crate::device::PrimeOps) hook.

use crate::device::{Device, Driver, DriverFeatures};
use crate::error::{Error, Result};
use crate::file::File;
use crate::observability;
use crate::prime::PrimeFlags;

/// Close-on-exec flag for `PRIME_HANDLE_TO_FD`.
pub const DRM_CLOEXEC: u32 = PrimeFlags::CLOEXEC.bits();

/// Argument of both PRIME ioctls.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimeHandle {
    /// Local handle: input of `HANDLE_TO_FD`, output of `FD_TO_HANDLE`.
    pub handle: u32,
    /// Export flags; only [`DRM_CLOEXEC`] is accepted.
    pub flags: u32,
    /// Descriptor: output of `HANDLE_TO_FD`, input of `FD_TO_HANDLE`.
    pub fd: i32,
}

fn check_prime<D: Driver>(dev: &Device<D>) -> Result<()> {
    if !dev.features().contains(DriverFeatures::PRIME) {
        return Err(Error::InvalidOperation(format!(
            "{} does not support PRIME",
            dev.name()
        )));
    }
    Ok(())
}

fn handle_to_fd<D: Driver>(dev: &Device<D>, args: &mut PrimeHandle, file: &mut File) -> Result<()> {
    check_prime(dev)?;
    let hook = dev
        .driver()
        .prime_ops()
        .handle_to_fd
        .ok_or(Error::NotSupported("prime_handle_to_fd"))?;
    let flags = PrimeFlags::from_bits(args.flags)
        .ok_or_else(|| Error::InvalidArgument(format!("unsupported flags {:#x}", args.flags)))?;

    args.fd = hook(dev, file, args.handle, flags)?;
    Ok(())
}

fn fd_to_handle<D: Driver>(dev: &Device<D>, args: &mut PrimeHandle, file: &mut File) -> Result<()> {
    check_prime(dev)?;
    let hook = dev
        .driver()
        .prime_ops()
        .fd_to_handle
        .ok_or(Error::NotSupported("prime_fd_to_handle"))?;

    args.handle = hook(dev, file, args.fd)?;
    Ok(())
}

/// `PRIME_HANDLE_TO_FD`: export `args.handle`, storing the descriptor in `args.fd`.
pub fn prime_handle_to_fd_ioctl<D: Driver>(
    dev: &Device<D>,
    args: &mut PrimeHandle,
    file: &mut File,
) -> Result<()> {
    let _span = dev
        .config()
        .trace_ioctls
        .then(|| observability::instrument_ioctl("PRIME_HANDLE_TO_FD", dev.name(), file.id()));

    let result = handle_to_fd(dev, args, file);
    if let Err(e) = &result {
        observability::trace_ioctl_error("PRIME_HANDLE_TO_FD", e);
        observability::record_failure("handle_to_fd", e.errno());
    }
    result
}

/// `PRIME_FD_TO_HANDLE`: import `args.fd`, storing the handle in `args.handle`.
pub fn prime_fd_to_handle_ioctl<D: Driver>(
    dev: &Device<D>,
    args: &mut PrimeHandle,
    file: &mut File,
) -> Result<()> {
    let _span = dev
        .config()
        .trace_ioctls
        .then(|| observability::instrument_ioctl("PRIME_FD_TO_HANDLE", dev.name(), file.id()));

    let result = fd_to_handle(dev, args, file);
    if let Err(e) = &result {
        observability::trace_ioctl_error("PRIME_FD_TO_HANDLE", e);
        observability::record_failure("fd_to_handle", e.errno());
    }
    result
}

/// Convert an ioctl result to its return code: `0` or a negative errno.
pub fn ioctl_result(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno(),
    }
}
