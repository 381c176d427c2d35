//! Overlays a WAL frame index on top of a main-DB page source, so readers
//! see the most recent committed frame for each page without touching the
//! main file.

use crate::error::Result;
use crate::page::source::{PageBuf, PageSource};
use crate::wal::reader::FrameIndex;

pub struct WalMergedSource<'idx, S: PageSource> {
    main: S,
    /// Snapshot of the frame index taken once at cursor/transaction open, so
    /// the wrapper presents one consistent view for its whole lifetime even
    /// if a concurrent writer appends more frames.
    frames: &'idx FrameIndex,
}

impl<'idx, S: PageSource> WalMergedSource<'idx, S> {
    pub fn new(main: S, frames: &'idx FrameIndex) -> Self {
        WalMergedSource { main, frames }
    }
}

impl<S: PageSource> PageSource for WalMergedSource<'_, S> {
    fn read_page(&self, page_number: u32) -> Result<PageBuf<'_>> {
        if let Some(bytes) = self.frames.page_bytes(page_number) {
            return Ok(PageBuf::Borrowed(bytes));
        }
        self.main.read_page(page_number)
    }

    fn page_count(&self) -> u32 {
        self.frames.db_size_in_pages().unwrap_or_else(|| self.main.page_count())
    }

    fn page_size(&self) -> u32 {
        self.main.page_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::source::MemoryPageSource;
    use crate::wal::reader::FrameIndex;

    #[test]
    fn prefers_wal_frame_over_main_page() {
        let mem = MemoryPageSource::empty(512, 2);
        let mut frames = FrameIndex::empty();
        let overlay = vec![0xAAu8; 512];
        frames.insert_for_test(1, overlay.clone(), 2);
        let merged = WalMergedSource::new(mem, &frames);
        let page = merged.read_page(1).unwrap();
        assert_eq!(&*page, &overlay[..]);
    }

    #[test]
    fn falls_back_to_main_when_no_frame() {
        let mem = MemoryPageSource::empty(512, 2);
        let frames = FrameIndex::empty();
        let merged = WalMergedSource::new(mem, &frames);
        let page = merged.read_page(2).unwrap();
        assert_eq!(page.len(), 512);
    }
}
