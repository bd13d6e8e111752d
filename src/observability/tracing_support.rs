//! Tracing integration for ioctl spans and error events.

use crate::error::Error;
use crate::file::FileId;
use tracing::{Level, Span, span};

/// Create a span for one ioctl call.
///
/// # Example
///
/// ```rust,ignore
/// let span = span_ioctl("PRIME_FD_TO_HANDLE", "card0", file.id());
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_ioctl(name: &str, device: &str, file: FileId) -> Span {
    span!(Level::DEBUG, "ioctl", name = %name, device = %device, file = %file)
}

/// Enter an ioctl span, returning the guard.
pub fn instrument_ioctl(name: &str, device: &str, file: FileId) -> tracing::span::EnteredSpan {
    span_ioctl(name, device, file).entered()
}

/// Log a failed ioctl.
#[inline]
pub fn trace_ioctl_error(name: &str, error: &Error) {
    tracing::debug!(
        ioctl = %name,
        errno = error.errno(),
        error = %error,
        "ioctl failed"
    );
}
