//! Page source / store abstraction: memory-backed, file-backed, and
//! memory-mapped implementations, each exposing the same read contract; the
//! store variants add write/allocate/free/sync.

use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Deref;

use crate::error::{Error, Result};
use crate::format::db_header::HEADER_SIZE;

/// A page's bytes, either a zero-copy view into a backing mapping/buffer or
/// an owned copy rented for the caller's read scope (file-backed reads).
pub enum PageBuf<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl Deref for PageBuf<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            PageBuf::Borrowed(b) => b,
            PageBuf::Owned(v) => v,
        }
    }
}

/// Read-only page access, shared freely across cursors.
pub trait PageSource {
    fn read_page(&self, page_number: u32) -> Result<PageBuf<'_>>;
    fn page_count(&self) -> u32;
    fn page_size(&self) -> u32;
}

/// Read-write extension, used only by the transaction manager's shadow and
/// by direct single-writer callers.
pub trait PageStore: PageSource {
    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()>;
    fn allocate_page(&mut self) -> Result<u32>;
    fn free_page(&mut self, page_number: u32) -> Result<()>;
    fn sync(&mut self) -> Result<()>;
}

fn check_page_number(page_number: u32, page_count: u32) -> Result<()> {
    if page_number == 0 || page_number > page_count {
        return Err(Error::InvalidArgument(format!(
            "page number {page_number} out of range (1..={page_count})"
        )));
    }
    Ok(())
}

/// Whole file held as one contiguous in-memory buffer. No I/O after
/// construction; used for tests and small/ephemeral databases.
pub struct MemoryPageSource {
    buf: Vec<u8>,
    page_size: u32,
}

impl MemoryPageSource {
    pub fn new(buf: Vec<u8>, page_size: u32) -> Result<Self> {
        if page_size == 0 || buf.len() % page_size as usize != 0 {
            return Err(Error::InvalidArgument(
                "buffer length is not a multiple of page size".into(),
            ));
        }
        Ok(MemoryPageSource { buf, page_size })
    }

    pub fn empty(page_size: u32, initial_pages: u32) -> Self {
        MemoryPageSource {
            buf: vec![0u8; page_size as usize * initial_pages.max(1) as usize],
            page_size,
        }
    }

    fn offset(&self, page_number: u32) -> usize {
        (page_number - 1) as usize * self.page_size as usize
    }
}

impl PageSource for MemoryPageSource {
    fn read_page(&self, page_number: u32) -> Result<PageBuf<'_>> {
        check_page_number(page_number, self.page_count())?;
        let off = self.offset(page_number);
        Ok(PageBuf::Borrowed(&self.buf[off..off + self.page_size as usize]))
    }

    fn page_count(&self) -> u32 {
        self.buf.len() as u32 / self.page_size
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}

impl PageStore for MemoryPageSource {
    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size as usize {
            return Err(Error::InvalidArgument("write_page buffer wrong size".into()));
        }
        check_page_number(page_number, self.page_count())?;
        let off = self.offset(page_number);
        self.buf[off..off + self.page_size as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u32> {
        self.buf.extend(std::iter::repeat(0u8).take(self.page_size as usize));
        Ok(self.page_count())
    }

    fn free_page(&mut self, _page_number: u32) -> Result<()> {
        // Freelist bookkeeping happens one layer up (`FreelistManager`); the
        // raw source has no concept of "free", only "allocated".
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Positioned reads/writes against a real file. Each read rents an owned
/// buffer; there is no cross-call page cache here (`page::cache` wraps this
/// for that).
pub struct FilePageSource {
    file: File,
    page_size: u32,
    page_count: u32,
    /// Byte offset of page 1 within the file. Zero for a plain database;
    /// `format::envelope::ENVELOPE_SIZE` for an encrypted one, whose pages
    /// follow a fixed-size envelope header instead of starting at offset 0.
    base_offset: u64,
}

impl FilePageSource {
    pub fn open(file: File, page_size: u32) -> Result<Self> {
        Self::open_at_offset(file, page_size, 0)
    }

    /// Open a file whose pages start `base_offset` bytes in, for an
    /// encrypted database's envelope prefix.
    pub fn open_at_offset(mut file: File, page_size: u32, base_offset: u64) -> Result<Self> {
        let len = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        if len < base_offset {
            return Err(Error::InvalidDatabase("file shorter than its header prefix".into()));
        }
        let body_len = len - base_offset;
        if page_size == 0 || body_len % page_size as u64 != 0 {
            return Err(Error::InvalidDatabase(
                "file length is not a multiple of page size".into(),
            ));
        }
        Ok(FilePageSource {
            file,
            page_size,
            page_count: (body_len / page_size as u64) as u32,
            base_offset,
        })
    }

    fn byte_offset(&self, page_number: u32) -> u64 {
        self.base_offset + (page_number - 1) as u64 * self.page_size as u64
    }
}

impl PageSource for FilePageSource {
    fn read_page(&self, page_number: u32) -> Result<PageBuf<'_>> {
        check_page_number(page_number, self.page_count)?;
        let mut buf = vec![0u8; self.page_size as usize];
        // `File` read is `&self`-safe via positioned reads on most platforms,
        // but the std `Read`/`Seek` traits require `&mut`; a real deployment
        // would use `read_at` (Unix) or `seek_read` (Windows) to avoid the
        // shared-mutable-state workaround. We clone the file descriptor
        // instead of requiring `&mut self` on the trait.
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(self.byte_offset(page_number)))?;
        f.read_exact(&mut buf)?;
        Ok(PageBuf::Owned(buf))
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}

impl PageStore for FilePageSource {
    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size as usize {
            return Err(Error::InvalidArgument("write_page buffer wrong size".into()));
        }
        check_page_number(page_number, self.page_count)?;
        self.file.seek(SeekFrom::Start(self.byte_offset(page_number)))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u32> {
        self.page_count += 1;
        let zeros = vec![0u8; self.page_size as usize];
        self.file
            .seek(SeekFrom::Start(self.byte_offset(self.page_count)))?;
        self.file.write_all(&zeros)?;
        Ok(self.page_count)
    }

    fn free_page(&mut self, _page_number: u32) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// A read-only memory-mapped file. Slices borrow directly from the mapping;
/// writes are not supported (callers fall back to `FilePageSource`).
pub struct MmapPageSource {
    mmap: Mmap,
    page_size: u32,
    page_count: u32,
}

/// Above this length a 32-bit-span host cannot safely address the whole
/// mapping; the caller should fall back to `FilePageSource`.
pub const MAX_MMAP_LEN: u64 = 2 * 1024 * 1024 * 1024;

impl MmapPageSource {
    pub fn open(file: &File, page_size: u32) -> Result<Self> {
        let len = file.metadata()?.len();
        if len > MAX_MMAP_LEN {
            return Err(Error::InvalidArgument(
                "file exceeds the 2 GiB mmap limit on this host".into(),
            ));
        }
        if page_size == 0 || len % page_size as u64 != 0 {
            return Err(Error::InvalidDatabase(
                "file length is not a multiple of page size".into(),
            ));
        }
        // Safety: the memory map's lifetime is owned by this struct; the
        // backing file must not be truncated or modified by another writer
        // while this mapping is live, the same precondition SQLite itself
        // requires of any mmap-based reader.
        let mmap = unsafe { Mmap::map(file)? };
        Ok(MmapPageSource {
            mmap,
            page_size,
            page_count: (len / page_size as u64) as u32,
        })
    }

    fn offset(&self, page_number: u32) -> usize {
        (page_number - 1) as usize * self.page_size as usize
    }
}

impl PageSource for MmapPageSource {
    fn read_page(&self, page_number: u32) -> Result<PageBuf<'_>> {
        check_page_number(page_number, self.page_count)?;
        let off = self.offset(page_number);
        Ok(PageBuf::Borrowed(&self.mmap[off..off + self.page_size as usize]))
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}

/// Writes a fresh single-page database (header only, empty schema root) into
/// a newly created memory source. Used by tests and by `OpenOptions` when
/// creating a database from scratch.
pub fn new_empty_database(page_size: u32) -> MemoryPageSource {
    let mut src = MemoryPageSource::empty(page_size, 1);
    let header = crate::format::DbHeader::new_empty(page_size);
    let mut page = vec![0u8; page_size as usize];
    header.write(&mut page[..HEADER_SIZE]).expect("fresh header always fits");
    let btree_header = crate::format::BtreeHeader {
        page_type: crate::format::PageType::TableLeaf,
        first_freeblock: 0,
        cell_count: 0,
        cell_content_start: page_size,
        fragmented_free_bytes: 0,
        right_child: None,
    };
    btree_header
        .write(&mut page, HEADER_SIZE)
        .expect("fresh b-tree header always fits");
    src.write_page(1, &page).expect("writing the fresh page 1 cannot fail");
    src
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_round_trips_a_write() {
        let mut src = MemoryPageSource::empty(512, 2);
        let mut page = vec![9u8; 512];
        page[0] = 1;
        src.write_page(2, &page).unwrap();
        let read_back = src.read_page(2).unwrap();
        assert_eq!(&*read_back, &page[..]);
    }

    #[test]
    fn memory_source_allocate_extends_page_count() {
        let mut src = MemoryPageSource::empty(512, 1);
        assert_eq!(src.page_count(), 1);
        let new_page = src.allocate_page().unwrap();
        assert_eq!(new_page, 2);
        assert_eq!(src.page_count(), 2);
    }

    #[test]
    fn out_of_range_page_number_is_invalid_argument() {
        let src = MemoryPageSource::empty(512, 1);
        assert!(src.read_page(0).is_err());
        assert!(src.read_page(2).is_err());
    }

    #[test]
    fn fresh_database_has_valid_header() {
        let src = new_empty_database(4096);
        let page = src.read_page(1).unwrap();
        let header = crate::format::DbHeader::parse(&page).unwrap();
        assert_eq!(header.page_size, 4096);
        assert_eq!(header.page_count, 1);
    }
}
