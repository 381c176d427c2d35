//! B-tree cell framing: payload size, rowid, inline payload, and the
//! overflow-page pointer that appears once a payload spills past the
//! page's inline bound.
//!
//! Cell formats, from https://www.sqlite.org/fileformat2.html#b_tree_pages:
//!
//! Table leaf (0x0d): payload-size varint, rowid varint, inline payload,
//! optional 4-byte overflow page number.
//! Table interior (0x05): 4-byte left-child page number, rowid varint.
//! Index leaf (0x0a) / interior (0x02): analogous, keyed on a record
//! payload instead of (or alongside) a rowid.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::varint;

/// A parsed table-leaf cell: a borrowed view of the cell's bytes.
pub struct TableLeafCell<'a> {
    pub rowid: i64,
    pub payload_size: u64,
    pub inline_payload: &'a [u8],
    pub overflow_page: Option<u32>,
}

/// A parsed table-interior cell.
pub struct TableInteriorCell {
    pub left_child: u32,
    pub rowid: i64,
}

/// An index cell's key payload (leaf or interior; interior cells additionally
/// carry the left-child pointer).
pub struct IndexCell<'a> {
    pub left_child: Option<u32>,
    pub payload_size: u64,
    pub inline_payload: &'a [u8],
    pub overflow_page: Option<u32>,
}

/// The usable-size-derived inline/overflow split point for table b-tree
/// leaf cells, per SQLite's standard local-payload formula.
pub fn table_leaf_max_local(usable_size: u32) -> usize {
    usable_size as usize - 35
}

pub fn table_leaf_min_local(usable_size: u32) -> usize {
    (usable_size as usize - 12) * 32 / 255 - 23
}

pub fn index_max_local(usable_size: u32) -> usize {
    (usable_size as usize - 12) * 64 / 255 - 23
}

pub fn index_min_local(usable_size: u32) -> usize {
    table_leaf_min_local(usable_size)
}

/// How many of `payload_size` bytes are stored inline, given `max_local`
/// and `min_local` bounds for the page kind. Mirrors SQLite's two-phase
/// local-size algorithm: payloads under `max_local` are fully inline;
/// larger payloads spill everything past `min_local` to overflow pages,
/// except that the last overflow page must hold at least one byte, so the
/// split point is nudged to `min_local + (payload_size - min_local) % (usable_size - 4)`
/// when that remainder still fits under `max_local`.
pub fn local_payload_size(usable_size: u32, payload_size: u64, max_local: usize, min_local: usize) -> usize {
    if payload_size as usize <= max_local {
        return payload_size as usize;
    }
    let overflow_page_capacity = usable_size as usize - 4;
    let surplus = (payload_size as usize - min_local) % overflow_page_capacity;
    if min_local + surplus <= max_local {
        min_local + surplus
    } else {
        min_local
    }
}

/// Build a table-leaf cell. `inline_payload` must be exactly
/// `local_payload_size(...)` bytes of `record_payload`'s prefix;
/// `overflow_page` is `Some` iff the payload spilled.
pub fn build_table_leaf_cell(rowid: i64, record_payload: &[u8], inline_len: usize, overflow_page: Option<u32>) -> Vec<u8> {
    let payload_size = record_payload.len() as i64;
    let mut out = Vec::with_capacity(9 + 9 + inline_len + 4);
    let mut buf = [0u8; 9];
    let n = varint::encode(payload_size, &mut buf).expect("payload size always fits a varint");
    out.extend_from_slice(&buf[..n]);
    let n = varint::encode(rowid, &mut buf).expect("rowid always fits a varint");
    out.extend_from_slice(&buf[..n]);
    out.extend_from_slice(&record_payload[..inline_len]);
    if let Some(page) = overflow_page {
        let mut be = [0u8; 4];
        BigEndian::write_u32(&mut be, page);
        out.extend_from_slice(&be);
    }
    out
}

/// Parse a table-leaf cell from the front of `cell_bytes`, which must cover
/// at least the cell's own bytes (trailing bytes belonging to neighboring
/// cells are ignored).
pub fn parse_table_leaf_cell<'a>(cell_bytes: &'a [u8], usable_size: u32) -> Result<TableLeafCell<'a>> {
    let (payload_size, n1) = varint::decode(cell_bytes)?;
    if payload_size < 0 {
        return Err(Error::corrupt_page(0, "negative cell payload size"));
    }
    let (rowid, n2) = varint::decode(&cell_bytes[n1..])?;
    let header_len = n1 + n2;

    let max_local = table_leaf_max_local(usable_size);
    let min_local = table_leaf_min_local(usable_size);
    let inline_len = local_payload_size(usable_size, payload_size as u64, max_local, min_local);
    let has_overflow = inline_len < payload_size as usize;

    let inline_end = header_len + inline_len;
    let total_len = inline_end + if has_overflow { 4 } else { 0 };
    if total_len > cell_bytes.len() {
        return Err(Error::corrupt_page(0, "cell runs past the bytes available"));
    }

    let overflow_page = if has_overflow {
        Some(BigEndian::read_u32(&cell_bytes[inline_end..inline_end + 4]))
    } else {
        None
    };

    Ok(TableLeafCell {
        rowid,
        payload_size: payload_size as u64,
        inline_payload: &cell_bytes[header_len..inline_end],
        overflow_page,
    })
}

/// Build a table-interior cell: 4-byte left child, rowid varint.
pub fn build_table_interior_cell(left_child: u32, rowid: i64) -> Vec<u8> {
    let mut out = vec![0u8; 4];
    BigEndian::write_u32(&mut out, left_child);
    let mut buf = [0u8; 9];
    let n = varint::encode(rowid, &mut buf).expect("rowid always fits a varint");
    out.extend_from_slice(&buf[..n]);
    out
}

pub fn parse_table_interior_cell(cell_bytes: &[u8]) -> Result<TableInteriorCell> {
    if cell_bytes.len() < 5 {
        return Err(Error::corrupt_page(0, "interior cell shorter than 5 bytes"));
    }
    let left_child = BigEndian::read_u32(&cell_bytes[..4]);
    let (rowid, _) = varint::decode(&cell_bytes[4..])?;
    Ok(TableInteriorCell { left_child, rowid })
}

/// Parse an index cell. `has_left_child` selects interior vs. leaf framing.
pub fn parse_index_cell<'a>(cell_bytes: &'a [u8], usable_size: u32, has_left_child: bool) -> Result<IndexCell<'a>> {
    let mut offset = 0;
    let left_child = if has_left_child {
        if cell_bytes.len() < 4 {
            return Err(Error::corrupt_page(0, "index interior cell shorter than 4 bytes"));
        }
        offset += 4;
        Some(BigEndian::read_u32(&cell_bytes[..4]))
    } else {
        None
    };

    let (payload_size, n1) = varint::decode(&cell_bytes[offset..])?;
    if payload_size < 0 {
        return Err(Error::corrupt_page(0, "negative cell payload size"));
    }
    offset += n1;

    let max_local = index_max_local(usable_size);
    let min_local = index_min_local(usable_size);
    let inline_len = local_payload_size(usable_size, payload_size as u64, max_local, min_local);
    let has_overflow = inline_len < payload_size as usize;

    let inline_end = offset + inline_len;
    let total_len = inline_end + if has_overflow { 4 } else { 0 };
    if total_len > cell_bytes.len() {
        return Err(Error::corrupt_page(0, "cell runs past the bytes available"));
    }

    let overflow_page = if has_overflow {
        Some(BigEndian::read_u32(&cell_bytes[inline_end..inline_end + 4]))
    } else {
        None
    };

    Ok(IndexCell {
        left_child,
        payload_size: payload_size as u64,
        inline_payload: &cell_bytes[offset..inline_end],
        overflow_page,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const USABLE: u32 = 4096;

    #[test]
    fn small_payload_has_no_overflow() {
        let payload = b"hello world";
        let max_local = table_leaf_max_local(USABLE);
        let min_local = table_leaf_min_local(USABLE);
        let inline_len = local_payload_size(USABLE, payload.len() as u64, max_local, min_local);
        assert_eq!(inline_len, payload.len());
        let cell = build_table_leaf_cell(1, payload, inline_len, None);
        let parsed = parse_table_leaf_cell(&cell, USABLE).unwrap();
        assert_eq!(parsed.rowid, 1);
        assert_eq!(parsed.inline_payload, payload);
        assert!(parsed.overflow_page.is_none());
    }

    #[test]
    fn oversized_payload_spills_to_overflow() {
        let payload = vec![7u8; 8192];
        let max_local = table_leaf_max_local(USABLE);
        let min_local = table_leaf_min_local(USABLE);
        let inline_len = local_payload_size(USABLE, payload.len() as u64, max_local, min_local);
        assert!(inline_len < payload.len());
        assert!(inline_len <= max_local);
        let cell = build_table_leaf_cell(42, &payload, inline_len, Some(99));
        let parsed = parse_table_leaf_cell(&cell, USABLE).unwrap();
        assert_eq!(parsed.rowid, 42);
        assert_eq!(parsed.overflow_page, Some(99));
        assert_eq!(parsed.inline_payload.len(), inline_len);
    }

    #[test]
    fn interior_cell_round_trips() {
        let cell = build_table_interior_cell(7, 1000);
        let parsed = parse_table_interior_cell(&cell).unwrap();
        assert_eq!(parsed.left_child, 7);
        assert_eq!(parsed.rowid, 1000);
    }

    #[test]
    fn truncated_cell_is_corrupt() {
        let cell = build_table_leaf_cell(1, b"hello", 5, None);
        assert!(parse_table_leaf_cell(&cell[..cell.len() - 1], USABLE).is_err());
    }
}
