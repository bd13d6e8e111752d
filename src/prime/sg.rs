//! Scatter/gather tables built from page lists.

use crate::error::{Error, Result};

/// A page-aligned chunk of memory, identified by its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Page {
    addr: usize,
}

impl Page {
    /// Wrap a page address.
    pub fn from_addr(addr: usize) -> Self {
        Self { addr }
    }

    /// Address of the first byte of the page.
    pub fn addr(&self) -> usize {
        self.addr
    }
}

/// One scatter/gather entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scatterlist {
    /// Backing page.
    pub page: Page,
    /// Offset into the page.
    pub offset: usize,
    /// Bytes covered by this entry.
    pub length: usize,
}

/// A scatter/gather table describing a buffer's backing pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgTable {
    entries: Vec<Scatterlist>,
}

impl SgTable {
    /// Build a table with one full-page entry per page.
    ///
    /// The driver is responsible for mapping the pages into the importer's
    /// address space.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `pages` is empty
    /// - [`Error::OutOfMemory`] if the entry array cannot be allocated
    pub fn from_pages(pages: &[Page]) -> Result<Self> {
        if pages.is_empty() {
            return Err(Error::InvalidArgument("empty page list".into()));
        }

        let page_size = rustix::param::page_size();
        let mut entries = Vec::new();
        entries.try_reserve_exact(pages.len())?;
        entries.extend(pages.iter().map(|&page| Scatterlist {
            page,
            offset: 0,
            length: page_size,
        }));

        Ok(Self { entries })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes covered by all entries.
    pub fn total_len(&self) -> usize {
        self.entries.iter().map(|sg| sg.length).sum()
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> std::slice::Iter<'_, Scatterlist> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a SgTable {
    type Item = &'a Scatterlist;
    type IntoIter = std::slice::Iter<'a, Scatterlist>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Build a scatter/gather table from pages. See [`SgTable::from_pages`].
pub fn pages_to_sg(pages: &[Page]) -> Result<SgTable> {
    SgTable::from_pages(pages)
}
