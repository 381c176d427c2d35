//! Read cursor over a table b-tree: walks interior and leaf pages in key
//! order, producing `(rowid, payload)` pairs, with point seek and overflow
//! reassembly.

use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};

use crate::cell::{self, parse_table_interior_cell, TableLeafCell};
use crate::error::{Error, Result};
use crate::format::btree_header::{header_offset, BtreeHeader};
use crate::format::db_header::DbHeader;
use crate::page::source::PageBuf;
use crate::page::PageSource;

/// One level of the descent path: the interior page at this level, and the
/// index of the child currently being visited (`cell_count` denotes the
/// right-most child).
struct InteriorFrame {
    page_number: u32,
    child_index: usize,
    cell_count: usize,
}

/// Cursor over a table b-tree rooted at `root_page`. Not `Send`/`Sync`
/// shared across threads; the underlying page source may be.
pub struct Cursor<'s, S: PageSource> {
    source: &'s S,
    usable_size: u32,
    root_page: u32,
    stack: Vec<InteriorFrame>,
    leaf_page: Option<PageBuf<'s>>,
    leaf_cell_offsets: Vec<u16>,
    leaf_index: usize,
    overflow_buf: Option<Vec<u8>>,
    done: bool,
}

impl<'s, S: PageSource> Cursor<'s, S> {
    /// Open a cursor at `root_page`, positioned at the first cell of the
    /// leftmost leaf (or exhausted immediately if the tree is empty).
    pub fn open_at(source: &'s S, root_page: u32) -> Result<Self> {
        let usable_size = read_usable_size(source)?;
        let mut cursor = Cursor {
            source,
            usable_size,
            root_page,
            stack: Vec::new(),
            leaf_page: None,
            leaf_cell_offsets: Vec::new(),
            leaf_index: 0,
            overflow_buf: None,
            done: false,
        };
        cursor.descend_to_leftmost(root_page)?;
        Ok(cursor)
    }

    /// True while the cursor is positioned on a real cell.
    pub fn is_valid(&self) -> bool {
        !self.done && self.leaf_index < self.leaf_cell_offsets.len()
    }

    pub fn move_first(&mut self) -> Result<()> {
        self.stack.clear();
        self.done = false;
        self.descend_to_leftmost(self.root_page)
    }

    pub fn move_last(&mut self) -> Result<()> {
        self.stack.clear();
        self.done = false;
        self.descend_to_rightmost(self.root_page)
    }

    /// Advance to the next cell in key order. Returns `false` once the tree
    /// is exhausted; further calls stay exhausted.
    pub fn move_next(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        if self.leaf_index + 1 < self.leaf_cell_offsets.len() {
            self.leaf_index += 1;
            self.overflow_buf = None;
            return Ok(true);
        }
        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.done = true;
                return Ok(false);
            };
            frame.child_index += 1;
            if frame.child_index < frame.cell_count {
                let page_number = frame.page_number;
                let idx = frame.child_index;
                let child = self.interior_left_child(page_number, idx)?;
                self.descend_to_leftmost(child)?;
                return Ok(true);
            }
            if frame.child_index == frame.cell_count {
                let page_number = frame.page_number;
                let child = self.interior_right_child(page_number)?;
                self.descend_to_leftmost(child)?;
                return Ok(true);
            }
            self.stack.pop();
        }
    }

    /// Binary-search down to `rowid`. Returns whether an exact match was
    /// found; on a miss the cursor sits just before the first greater cell.
    pub fn seek(&mut self, rowid: i64) -> Result<bool> {
        self.stack.clear();
        self.done = false;
        let mut page_number = self.root_page;
        loop {
            let page = self.source.read_page(page_number)?;
            let offset = header_offset(page_number);
            let header = BtreeHeader::parse(&page, offset, page_number)?;
            let cell_count = header.cell_count as usize;
            let pointers_offset = offset + header.on_disk_len();

            if header.page_type.is_interior() {
                let pos = binary_search(cell_count, |i| {
                    let off = cell_pointer(&page, pointers_offset, i)?;
                    Ok(parse_table_interior_cell(&page[off..])?.rowid)
                }, rowid)?;
                if pos < cell_count {
                    let off = cell_pointer(&page, pointers_offset, pos)?;
                    let child = parse_table_interior_cell(&page[off..])?.left_child;
                    drop(page);
                    self.stack.push(InteriorFrame {
                        page_number,
                        child_index: pos,
                        cell_count,
                    });
                    page_number = child;
                } else {
                    let child = header
                        .right_child
                        .ok_or_else(|| Error::corrupt_page(page_number, "interior page missing right child"))?;
                    drop(page);
                    self.stack.push(InteriorFrame {
                        page_number,
                        child_index: cell_count,
                        cell_count,
                    });
                    page_number = child;
                }
            } else {
                let offsets = read_cell_pointers(&page, pointers_offset, cell_count)?;
                let pos = binary_search(
                    cell_count,
                    |i| Ok(cell::parse_table_leaf_cell(&page[offsets[i] as usize..], self.usable_size)?.rowid),
                    rowid,
                )?;
                let found = pos < cell_count
                    && cell::parse_table_leaf_cell(&page[offsets[pos] as usize..], self.usable_size)?.rowid == rowid;
                drop(page);
                self.set_leaf(page_number)?;
                self.leaf_index = pos;
                return Ok(found);
            }
        }
    }

    pub fn rowid(&self) -> Result<i64> {
        Ok(self.leaf_cell_at(self.leaf_index)?.rowid)
    }

    /// Current cell's payload, reassembling from overflow pages on demand.
    /// The returned slice is valid until the cursor next advances.
    pub fn payload(&mut self) -> Result<&[u8]> {
        let (has_overflow, payload_size, overflow_page) = {
            let cell = self.leaf_cell_at(self.leaf_index)?;
            (cell.overflow_page.is_some(), cell.payload_size, cell.overflow_page)
        };
        if !has_overflow {
            return Ok(self.leaf_cell_at(self.leaf_index)?.inline_payload);
        }
        if self.overflow_buf.is_none() {
            let mut buf = Vec::with_capacity(payload_size as usize);
            buf.extend_from_slice(self.leaf_cell_at(self.leaf_index)?.inline_payload);
            let mut next = overflow_page.expect("has_overflow checked above");
            let mut visited = HashSet::new();
            while buf.len() < payload_size as usize {
                if next == 0 || !visited.insert(next) {
                    return Err(Error::corrupt_page(next, "overflow chain truncated or cyclic"));
                }
                let page = self.source.read_page(next)?;
                if page.len() < 4 {
                    return Err(Error::corrupt_page(next, "overflow page shorter than its own header"));
                }
                let next_ptr = BigEndian::read_u32(&page[..4]);
                let remaining = payload_size as usize - buf.len();
                let capacity = page.len() - 4;
                let take = remaining.min(capacity);
                buf.extend_from_slice(&page[4..4 + take]);
                next = next_ptr;
            }
            self.overflow_buf = Some(buf);
        }
        Ok(self.overflow_buf.as_ref().expect("just populated above"))
    }

    fn leaf_cell_at(&self, index: usize) -> Result<TableLeafCell<'_>> {
        let page = self
            .leaf_page
            .as_ref()
            .ok_or_else(|| Error::UseAfterRelease("cursor is not positioned on a page".into()))?;
        let off = *self
            .leaf_cell_offsets
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("leaf cell index {index} out of range")))?
            as usize;
        cell::parse_table_leaf_cell(&page[off..], self.usable_size)
    }

    fn interior_left_child(&self, page_number: u32, cell_index: usize) -> Result<u32> {
        let page = self.source.read_page(page_number)?;
        let offset = header_offset(page_number);
        let header = BtreeHeader::parse(&page, offset, page_number)?;
        let off = cell_pointer(&page, offset + header.on_disk_len(), cell_index)?;
        Ok(parse_table_interior_cell(&page[off..])?.left_child)
    }

    fn interior_right_child(&self, page_number: u32) -> Result<u32> {
        let page = self.source.read_page(page_number)?;
        let offset = header_offset(page_number);
        let header = BtreeHeader::parse(&page, offset, page_number)?;
        header
            .right_child
            .ok_or_else(|| Error::corrupt_page(page_number, "interior page missing right child"))
    }

    fn set_leaf(&mut self, page_number: u32) -> Result<()> {
        let page = self.source.read_page(page_number)?;
        let offset = header_offset(page_number);
        let header = BtreeHeader::parse(&page, offset, page_number)?;
        if !header.page_type.is_leaf() || !header.page_type.is_table() {
            return Err(Error::corrupt_page(page_number, "expected a table leaf page"));
        }
        let cell_count = header.cell_count as usize;
        let offsets = read_cell_pointers(&page, offset + header.on_disk_len(), cell_count)?;
        self.leaf_cell_offsets = offsets;
        self.leaf_page = Some(page);
        self.overflow_buf = None;
        Ok(())
    }

    fn descend_to_leftmost(&mut self, mut page_number: u32) -> Result<()> {
        loop {
            let page = self.source.read_page(page_number)?;
            let offset = header_offset(page_number);
            let header = BtreeHeader::parse(&page, offset, page_number)?;
            if header.page_type.is_interior() {
                let cell_count = header.cell_count as usize;
                let child = if cell_count > 0 {
                    let off = cell_pointer(&page, offset + header.on_disk_len(), 0)?;
                    parse_table_interior_cell(&page[off..])?.left_child
                } else {
                    header
                        .right_child
                        .ok_or_else(|| Error::corrupt_page(page_number, "interior page empty with no right child"))?
                };
                drop(page);
                self.stack.push(InteriorFrame {
                    page_number,
                    child_index: 0,
                    cell_count,
                });
                page_number = child;
            } else {
                drop(page);
                self.set_leaf(page_number)?;
                self.leaf_index = 0;
                self.done = self.leaf_cell_offsets.is_empty() && self.stack.is_empty();
                return Ok(());
            }
        }
    }

    fn descend_to_rightmost(&mut self, mut page_number: u32) -> Result<()> {
        loop {
            let page = self.source.read_page(page_number)?;
            let offset = header_offset(page_number);
            let header = BtreeHeader::parse(&page, offset, page_number)?;
            if header.page_type.is_interior() {
                let cell_count = header.cell_count as usize;
                let child = header
                    .right_child
                    .ok_or_else(|| Error::corrupt_page(page_number, "interior page missing right child"))?;
                drop(page);
                self.stack.push(InteriorFrame {
                    page_number,
                    child_index: cell_count,
                    cell_count,
                });
                page_number = child;
            } else {
                drop(page);
                self.set_leaf(page_number)?;
                self.leaf_index = self.leaf_cell_offsets.len().saturating_sub(1);
                self.done = self.leaf_cell_offsets.is_empty() && self.stack.is_empty();
                return Ok(());
            }
        }
    }
}

fn read_usable_size<S: PageSource>(source: &S) -> Result<u32> {
    let page1 = source.read_page(1)?;
    let header = DbHeader::parse(&page1)?;
    Ok(header.usable_page_size())
}

fn cell_pointer(page: &[u8], pointers_offset: usize, index: usize) -> Result<usize> {
    let off = pointers_offset + index * 2;
    if off + 2 > page.len() {
        return Err(Error::corrupt_page(0, "cell pointer array runs past page bounds"));
    }
    Ok(BigEndian::read_u16(&page[off..off + 2]) as usize)
}

fn read_cell_pointers(page: &[u8], pointers_offset: usize, count: usize) -> Result<Vec<u16>> {
    (0..count).map(|i| cell_pointer(page, pointers_offset, i).map(|o| o as u16)).collect()
}

/// Smallest index `i` in `0..count` with `key(i) >= target`, or `count` if
/// none. Assumes `key` is non-decreasing over the range.
fn binary_search<F: Fn(usize) -> Result<i64>>(count: usize, key: F, target: i64) -> Result<usize> {
    let mut lo = 0usize;
    let mut hi = count;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if target <= key(mid)? {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}
