//! Freelist manager: allocates and releases pages through the database
//! header's trunk/leaf chain, extending the file when the freelist is
//! empty. All changes are shadow writes; they become durable only at
//! commit.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::format::db_header::{DbHeader, HEADER_SIZE};
use crate::page::PageStore;

/// A trunk page's layout: 4-byte next-trunk pointer, 4-byte leaf count,
/// then up to `(usable_size - 8) / 4` leaf page numbers.
struct Trunk {
    next_trunk: u32,
    leaves: Vec<u32>,
}

impl Trunk {
    fn capacity(usable_size: u32) -> usize {
        (usable_size as usize - 8) / 4
    }

    fn parse(page: &[u8]) -> Result<Self> {
        if page.len() < 8 {
            return Err(Error::corrupt_page(0, "freelist trunk page shorter than its own header"));
        }
        let next_trunk = BigEndian::read_u32(&page[0..4]);
        let count = BigEndian::read_u32(&page[4..8]) as usize;
        let mut leaves = Vec::with_capacity(count);
        for i in 0..count {
            let off = 8 + i * 4;
            if off + 4 > page.len() {
                return Err(Error::corrupt_page(0, "freelist trunk leaf count exceeds page bounds"));
            }
            leaves.push(BigEndian::read_u32(&page[off..off + 4]));
        }
        Ok(Trunk { next_trunk, leaves })
    }

    fn write(&self, page: &mut [u8]) {
        BigEndian::write_u32(&mut page[0..4], self.next_trunk);
        BigEndian::write_u32(&mut page[4..8], self.leaves.len() as u32);
        for (i, &leaf) in self.leaves.iter().enumerate() {
            let off = 8 + i * 4;
            BigEndian::write_u32(&mut page[off..off + 4], leaf);
        }
    }
}

/// Allocates or releases pages against a shadow page store, keeping the
/// database header's freelist head and count in sync within the same
/// transaction.
pub struct FreelistManager<'s, S: PageStore> {
    shadow: &'s mut S,
}

impl<'s, S: PageStore> FreelistManager<'s, S> {
    pub fn new(shadow: &'s mut S) -> Self {
        FreelistManager { shadow }
    }

    fn read_header(&self) -> Result<DbHeader> {
        let page1 = self.shadow.read_page(1)?;
        DbHeader::parse(&page1)
    }

    fn write_header(&mut self, header: &DbHeader) -> Result<()> {
        let page1 = self.shadow.read_page(1)?.to_vec();
        let mut page1 = page1;
        header.write(&mut page1[..HEADER_SIZE])?;
        self.shadow.write_page(1, &page1)
    }

    /// Pop a page from the freelist if one is available, else extend the
    /// shadow's logical page count.
    pub fn allocate(&mut self) -> Result<u32> {
        let mut header = self.read_header()?;
        if header.first_freelist_trunk == 0 {
            return self.shadow.allocate_page();
        }

        let trunk_page_number = header.first_freelist_trunk;
        let trunk_bytes = self.shadow.read_page(trunk_page_number)?.to_vec();
        let mut trunk = Trunk::parse(&trunk_bytes)?;

        if let Some(leaf) = trunk.leaves.pop() {
            let mut trunk_page = trunk_bytes;
            trunk.write(&mut trunk_page);
            self.shadow.write_page(trunk_page_number, &trunk_page)?;
            header.freelist_page_count -= 1;
            self.write_header(&header)?;
            Ok(leaf)
        } else {
            // Trunk emptied: its next-trunk pointer becomes the new head,
            // and the trunk page itself is handed back to the caller.
            header.first_freelist_trunk = trunk.next_trunk;
            header.freelist_page_count -= 1;
            self.write_header(&header)?;
            Ok(trunk_page_number)
        }
    }

    /// Push `page_number` onto the freelist. If the current trunk is full,
    /// the freed page becomes a new trunk at the head of the chain.
    pub fn free(&mut self, page_number: u32) -> Result<()> {
        let mut header = self.read_header()?;
        let usable_size = header.usable_page_size();

        if header.first_freelist_trunk != 0 {
            let trunk_page_number = header.first_freelist_trunk;
            let trunk_bytes = self.shadow.read_page(trunk_page_number)?.to_vec();
            let mut trunk = Trunk::parse(&trunk_bytes)?;
            if trunk.leaves.len() < Trunk::capacity(usable_size) {
                trunk.leaves.push(page_number);
                let mut trunk_page = trunk_bytes;
                trunk.write(&mut trunk_page);
                self.shadow.write_page(trunk_page_number, &trunk_page)?;
                header.freelist_page_count += 1;
                self.write_header(&header)?;
                return Ok(());
            }
        }

        // Current trunk is full or absent: the freed page becomes the new
        // head trunk, pointing at the previous head.
        let new_trunk = Trunk {
            next_trunk: header.first_freelist_trunk,
            leaves: Vec::new(),
        };
        let mut page = vec![0u8; usable_size as usize];
        new_trunk.write(&mut page);
        self.shadow.write_page(page_number, &page)?;
        header.first_freelist_trunk = page_number;
        header.freelist_page_count += 1;
        self.write_header(&header)?;
        Ok(())
    }
}
