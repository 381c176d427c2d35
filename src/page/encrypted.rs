//! Wraps any `PageSource`/`PageStore` whose pages are stored in their
//! *transformed* (on-disk, possibly larger) size and presents the logical,
//! pre-transform page size upward. This is what makes `EncryptingTransform`
//! usable as a page source rather than a one-page-at-a-time primitive: the
//! inner source is opened with `transformed_page_size` as its page size,
//! and every read/write here runs the transform in the right direction.

use crate::error::Result;
use crate::page::source::{PageBuf, PageSource, PageStore};
use crate::page::transform::PageTransform;

pub struct EncryptedPageSource<S, T> {
    inner: S,
    transform: T,
    logical_page_size: u32,
}

impl<S, T: PageTransform> EncryptedPageSource<S, T> {
    pub fn new(inner: S, transform: T, logical_page_size: u32) -> Self {
        EncryptedPageSource {
            inner,
            transform,
            logical_page_size,
        }
    }
}

impl<S: PageSource, T: PageTransform> PageSource for EncryptedPageSource<S, T> {
    fn read_page(&self, page_number: u32) -> Result<PageBuf<'_>> {
        let raw = self.inner.read_page(page_number)?;
        let mut dst = vec![0u8; self.logical_page_size as usize];
        self.transform.transform_read(&raw, &mut dst, page_number)?;
        Ok(PageBuf::Owned(dst))
    }

    fn page_count(&self) -> u32 {
        self.inner.page_count()
    }

    fn page_size(&self) -> u32 {
        self.logical_page_size
    }
}

impl<S: PageStore, T: PageTransform> PageStore for EncryptedPageSource<S, T> {
    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        let transformed_len = self.transform.transformed_page_size(self.logical_page_size) as usize;
        let mut dst = vec![0u8; transformed_len];
        self.transform.transform_write(bytes, &mut dst, page_number)?;
        self.inner.write_page(page_number, &dst)
    }

    fn allocate_page(&mut self) -> Result<u32> {
        self.inner.allocate_page()
    }

    fn free_page(&mut self, page_number: u32) -> Result<()> {
        self.inner.free_page(page_number)
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }
}
