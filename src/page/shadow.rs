//! Copy-on-write overlay buffering one writer transaction's dirty pages.
//! Reads first consult the overlay, then fall through to the underlying
//! read-only source; readers outside the transaction never see it.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::page::source::{PageBuf, PageSource, PageStore};

pub struct ShadowPageSource<'a, S: PageSource> {
    base: &'a S,
    dirty: HashMap<u32, Vec<u8>>,
    page_count: u32,
}

impl<'a, S: PageSource> ShadowPageSource<'a, S> {
    pub fn new(base: &'a S) -> Self {
        let page_count = base.page_count();
        ShadowPageSource {
            base,
            dirty: HashMap::new(),
            page_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    /// Dirty pages in page-number order, ready to hand to the WAL writer or
    /// rollback-journal writer at commit.
    pub fn dirty_pages(&self) -> Vec<(u32, &[u8])> {
        let mut pages: Vec<(u32, &[u8])> = self.dirty.iter().map(|(k, v)| (*k, v.as_slice())).collect();
        pages.sort_by_key(|(pn, _)| *pn);
        pages
    }

    /// Discard every buffered write. Used by rollback.
    pub fn clear(&mut self) {
        self.dirty.clear();
        self.page_count = self.base.page_count();
    }

    /// Read straight from the underlying pre-transaction source, bypassing
    /// the dirty overlay. Used by the rollback-journal commit path, which
    /// needs each dirty page's *original* bytes to journal before they are
    /// overwritten in the main file.
    pub fn base_read(&self, page_number: u32) -> Result<PageBuf<'_>> {
        self.base.read_page(page_number)
    }

    /// The page count as it stood before this transaction's allocations.
    pub fn base_page_count(&self) -> u32 {
        self.base.page_count()
    }
}

impl<S: PageSource> PageSource for ShadowPageSource<'_, S> {
    fn read_page(&self, page_number: u32) -> Result<PageBuf<'_>> {
        if let Some(bytes) = self.dirty.get(&page_number) {
            return Ok(PageBuf::Borrowed(bytes));
        }
        self.base.read_page(page_number)
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self) -> u32 {
        self.base.page_size()
    }
}

impl<S: PageSource> PageStore for ShadowPageSource<'_, S> {
    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size() as usize {
            return Err(Error::InvalidArgument("write_page buffer wrong size".into()));
        }
        if page_number == 0 || page_number > self.page_count {
            return Err(Error::InvalidArgument(format!(
                "page number {page_number} out of range"
            )));
        }
        self.dirty.insert(page_number, bytes.to_vec());
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u32> {
        self.page_count += 1;
        let page_size = self.page_size() as usize;
        self.dirty.insert(self.page_count, vec![0u8; page_size]);
        Ok(self.page_count)
    }

    fn free_page(&mut self, _page_number: u32) -> Result<()> {
        // Freed pages stay allocated in the backing file; the freelist
        // manager tracks their reuse in the shadow's database header.
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        // Durability happens at commit, through the WAL writer or rollback
        // journal, not by flushing the shadow itself.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::source::MemoryPageSource;

    #[test]
    fn reads_fall_through_to_base_until_written() {
        let mut base = MemoryPageSource::empty(512, 2);
        base.write_page(1, &vec![1u8; 512]).unwrap();
        let shadow = ShadowPageSource::new(&base);
        assert_eq!(&*shadow.read_page(1).unwrap(), &vec![1u8; 512][..]);
    }

    #[test]
    fn write_is_visible_to_shadow_but_not_base() {
        let base = MemoryPageSource::empty(512, 2);
        let mut shadow = ShadowPageSource::new(&base);
        shadow.write_page(1, &vec![9u8; 512]).unwrap();
        assert_eq!(&*shadow.read_page(1).unwrap(), &vec![9u8; 512][..]);
        assert_eq!(&*base.read_page(1).unwrap(), &vec![0u8; 512][..]);
    }

    #[test]
    fn clear_discards_all_dirty_pages() {
        let base = MemoryPageSource::empty(512, 1);
        let mut shadow = ShadowPageSource::new(&base);
        shadow.write_page(1, &vec![9u8; 512]).unwrap();
        assert!(!shadow.is_empty());
        shadow.clear();
        assert!(shadow.is_empty());
        assert_eq!(&*shadow.read_page(1).unwrap(), &vec![0u8; 512][..]);
    }

    #[test]
    fn allocate_extends_page_count_within_shadow() {
        let base = MemoryPageSource::empty(512, 1);
        let mut shadow = ShadowPageSource::new(&base);
        let pn = shadow.allocate_page().unwrap();
        assert_eq!(pn, 2);
        assert_eq!(shadow.page_count(), 2);
        assert_eq!(base.page_count(), 1);
    }
}
