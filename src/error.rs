//! Error types for PRIME buffer sharing.

use crate::dmabuf::RawDescriptor;
use rustix::io::Errno;
use thiserror::Error;

/// Result type alias using the crate's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for PRIME operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown local handle, or nothing mapped for a buffer.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed on this object (e.g. re-exporting an import),
    /// or capability missing from the driver.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Allocation of a table entry, handle or wrapper object failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Descriptor does not resolve to a buffer object.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(RawDescriptor),

    /// Caller supplied a malformed argument (unknown flag bits, empty page list).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Driver does not implement the requested PRIME hook.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Descriptor table has no free slot.
    #[error("descriptor table exhausted")]
    DescriptorsExhausted,

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] Errno),
}

impl Error {
    /// Negative errno equivalent, as returned by the ioctl entry points.
    pub fn errno(&self) -> i32 {
        let errno = match self {
            Error::NotFound(_) => Errno::NOENT,
            Error::InvalidOperation(_) | Error::InvalidArgument(_) => Errno::INVAL,
            Error::OutOfMemory => Errno::NOMEM,
            Error::InvalidDescriptor(_) => Errno::BADF,
            Error::NotSupported(_) => Errno::NOSYS,
            Error::DescriptorsExhausted => Errno::MFILE,
            Error::System(e) => *e,
        };
        -errno.raw_os_error()
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NotFound("handle 3".into()).errno(), -2);
        assert_eq!(Error::InvalidOperation("re-export".into()).errno(), -22);
        assert_eq!(Error::InvalidArgument("flags".into()).errno(), -22);
        assert_eq!(Error::OutOfMemory.errno(), -12);
        assert_eq!(Error::InvalidDescriptor(7).errno(), -9);
        assert_eq!(Error::NotSupported("prime_fd_to_handle").errno(), -38);
        assert_eq!(Error::DescriptorsExhausted.errno(), -24);
    }

    #[test]
    fn test_errno_passthrough() {
        assert_eq!(Error::System(Errno::ACCESS).errno(), -13);
        let err: Error = Errno::NOSPC.into();
        assert_eq!(err.errno(), -28);
    }

    #[test]
    fn test_display() {
        let err = Error::InvalidDescriptor(42);
        assert_eq!(err.to_string(), "invalid descriptor: 42");
    }
}
