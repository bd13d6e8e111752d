//! Device and descriptor-table configuration.
//!
//! All limits have defaults in [`defaults`]. Limits stand in for allocation
//! failure: running past one fails the same way a failed allocation does,
//! which keeps the error paths reachable from tests.

/// Default limits and numbering constants.
pub mod defaults {
    /// First local handle handed out by a file. Handle 0 is never valid.
    pub const FIRST_HANDLE: u32 = 1;

    /// Maximum live handles per file.
    pub const MAX_HANDLES: usize = 65_536;

    /// Maximum handle-mapping entries per file.
    pub const MAX_PRIME_ENTRIES: usize = 4_096;

    /// First descriptor a descriptor table hands out (0-2 are stdio).
    pub const FIRST_DESCRIPTOR: i32 = 3;

    /// Maximum open descriptors per table (common RLIMIT_NOFILE soft limit).
    pub const MAX_DESCRIPTORS: usize = 1024;

    /// Device name used when none is configured.
    pub const DEVICE_NAME: &str = "drm";
}

/// Per-device configuration, applied to every file opened on the device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device name, used in logs and as the attachment owner on import.
    pub name: String,
    /// Maximum live handles per file.
    pub max_handles: usize,
    /// Maximum handle-mapping entries per file.
    pub max_prime_entries: usize,
    /// Whether ioctl entry points run inside a tracing span.
    pub trace_ioctls: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: defaults::DEVICE_NAME.to_string(),
            max_handles: defaults::MAX_HANDLES,
            max_prime_entries: defaults::MAX_PRIME_ENTRIES,
            trace_ioctls: true,
        }
    }
}

impl DeviceConfig {
    /// Create a config with the given device name and default limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the per-file handle limit.
    pub fn with_max_handles(mut self, max_handles: usize) -> Self {
        self.max_handles = max_handles;
        self
    }

    /// Set the per-file handle-mapping limit.
    pub fn with_max_prime_entries(mut self, max_prime_entries: usize) -> Self {
        self.max_prime_entries = max_prime_entries;
        self
    }

    /// Enable or disable ioctl spans.
    pub fn with_trace_ioctls(mut self, trace_ioctls: bool) -> Self {
        self.trace_ioctls = trace_ioctls;
        self
    }
}

/// Configuration for a [`DescriptorTable`](crate::dmabuf::DescriptorTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTableConfig {
    /// Lowest descriptor number handed out.
    pub first_descriptor: i32,
    /// Maximum number of open descriptors.
    pub max_descriptors: usize,
}

impl Default for DescriptorTableConfig {
    fn default() -> Self {
        Self {
            first_descriptor: defaults::FIRST_DESCRIPTOR,
            max_descriptors: defaults::MAX_DESCRIPTORS,
        }
    }
}

impl DescriptorTableConfig {
    /// Set the maximum number of open descriptors.
    pub fn with_max_descriptors(mut self, max_descriptors: usize) -> Self {
        self.max_descriptors = max_descriptors;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_config_default() {
        let config = DeviceConfig::default();
        assert_eq!(config.name, "drm");
        assert_eq!(config.max_handles, defaults::MAX_HANDLES);
        assert_eq!(config.max_prime_entries, defaults::MAX_PRIME_ENTRIES);
        assert!(config.trace_ioctls);
    }

    #[test]
    fn test_device_config_builder() {
        let config = DeviceConfig::new("card0")
            .with_max_handles(4)
            .with_max_prime_entries(2)
            .with_trace_ioctls(false);
        assert_eq!(config.name, "card0");
        assert_eq!(config.max_handles, 4);
        assert_eq!(config.max_prime_entries, 2);
        assert!(!config.trace_ioctls);
    }

    #[test]
    fn test_descriptor_table_config_default() {
        let config = DescriptorTableConfig::default().with_max_descriptors(8);
        assert_eq!(config.first_descriptor, 3);
        assert_eq!(config.max_descriptors, 8);
    }
}
