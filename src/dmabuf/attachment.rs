//! Device attachments to a shareable buffer.

use super::DmaBuf;
use crate::error::Result;
use crate::prime::SgTable;

/// Direction of device access for a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataDirection {
    /// Device reads and writes.
    #[default]
    Bidirectional,
    /// Device reads only.
    ToDevice,
    /// Device writes only.
    FromDevice,
}

/// An importer's attachment to a [`DmaBuf`].
///
/// Holds one buffer reference. Dropping the attachment detaches it from
/// the exporter and releases that reference.
pub struct DmaBufAttachment {
    dma_buf: DmaBuf,
    device: String,
    /// Set once the exporter accepted the attachment; only then is detach owed.
    active: bool,
}

impl DmaBufAttachment {
    pub(super) fn new(dma_buf: DmaBuf, device: &str) -> Self {
        Self {
            dma_buf,
            device: device.to_string(),
            active: false,
        }
    }

    pub(super) fn activate(&mut self) {
        self.active = true;
    }

    /// The attached buffer.
    pub fn dma_buf(&self) -> &DmaBuf {
        &self.dma_buf
    }

    /// Name of the attached device.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Map the buffer for this device through the exporter.
    pub fn map(&self, direction: DataDirection) -> Result<SgTable> {
        self.dma_buf.ops().map_attachment(self, direction)
    }

    /// Return a mapping obtained from [`map`](Self::map).
    pub fn unmap(&self, sg: SgTable, direction: DataDirection) {
        self.dma_buf.ops().unmap_attachment(self, sg, direction);
    }
}

impl Drop for DmaBufAttachment {
    fn drop(&mut self) {
        if self.active {
            self.dma_buf.ops().detach(self);
            self.dma_buf.attachment_dropped();
            tracing::trace!(dma_buf = %self.dma_buf.id(), device = %self.device, "detached");
        }
    }
}

impl std::fmt::Debug for DmaBufAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBufAttachment")
            .field("dma_buf", &self.dma_buf.id())
            .field("device", &self.device)
            .finish()
    }
}
