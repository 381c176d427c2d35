//! Scans a WAL byte buffer, validating salts and the rolling checksum
//! chain, and builds an index from page number to the bytes of the most
//! recent frame covered by a valid commit.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::format::wal_frame::{RollingChecksum, FRAME_HEADER_SIZE};
use crate::format::wal_header::WAL_HEADER_SIZE;
use crate::format::{FrameHeader, WalHeader};

/// Page number -> most recent valid committed frame's page bytes.
pub struct FrameIndex {
    pages: HashMap<u32, Vec<u8>>,
    db_size_in_pages: Option<u32>,
}

impl FrameIndex {
    pub fn empty() -> Self {
        FrameIndex {
            pages: HashMap::new(),
            db_size_in_pages: None,
        }
    }

    pub fn page_bytes(&self, page_number: u32) -> Option<&[u8]> {
        self.pages.get(&page_number).map(|v| v.as_slice())
    }

    pub fn db_size_in_pages(&self) -> Option<u32> {
        self.db_size_in_pages
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.keys().copied().collect()
    }

    #[cfg(test)]
    pub fn insert_for_test(&mut self, page_number: u32, bytes: Vec<u8>, db_size: u32) {
        self.pages.insert(page_number, bytes);
        self.db_size_in_pages = Some(db_size);
    }

    /// Build an index from a whole WAL file's bytes. Frames with a wrong
    /// salt or checksum end the valid prefix; everything after is ignored.
    /// Only frames covered by a commit frame are kept — uncommitted tail
    /// frames stay invisible to readers.
    pub fn build(wal: &[u8], page_size: u32) -> Result<Self> {
        if wal.is_empty() {
            return Ok(FrameIndex::empty());
        }
        if wal.len() < WAL_HEADER_SIZE {
            return Err(Error::InvalidDatabase("WAL shorter than its header".into()));
        }
        let header = WalHeader::parse(wal)?;
        let frame_size = FRAME_HEADER_SIZE + page_size as usize;

        let mut checksum = RollingChecksum::new(header.checksum1, header.checksum2);
        let mut offset = WAL_HEADER_SIZE;
        let mut pending: HashMap<u32, Vec<u8>> = HashMap::new();
        let mut committed: HashMap<u32, Vec<u8>> = HashMap::new();
        let mut db_size_in_pages = None;

        while offset + frame_size <= wal.len() {
            let frame_bytes = &wal[offset..offset + frame_size];
            let frame_header = FrameHeader::parse(frame_bytes)?;

            if frame_header.salt1 != header.salt1 || frame_header.salt2 != header.salt2 {
                break;
            }

            let page_bytes = &frame_bytes[FRAME_HEADER_SIZE..];
            let mut frame_checksum = checksum;
            frame_checksum.update(&frame_bytes[..8]);
            frame_checksum.update(page_bytes);

            if frame_checksum.s0 != frame_header.checksum1 || frame_checksum.s1 != frame_header.checksum2 {
                break;
            }
            checksum = frame_checksum;

            pending.insert(frame_header.page_number, page_bytes.to_vec());

            if frame_header.is_commit() {
                for (pn, bytes) in pending.drain() {
                    committed.insert(pn, bytes);
                }
                db_size_in_pages = Some(frame_header.db_size_after_commit);
            }

            offset += frame_size;
        }

        Ok(FrameIndex {
            pages: committed,
            db_size_in_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::writer::WalWriter;

    #[test]
    fn empty_wal_yields_empty_index() {
        let idx = FrameIndex::build(&[], 512).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn rejects_wrong_magic_header() {
        let bytes = vec![0u8; WAL_HEADER_SIZE + 8];
        assert!(FrameIndex::build(&bytes, 512).is_err());
    }

    #[test]
    fn uncommitted_tail_frame_is_invisible() {
        let mut writer = WalWriter::new(1, 2);
        let mut buf = Vec::new();
        writer.write_header(&mut buf, 512).unwrap();
        writer.append_frame(&mut buf, 1, &vec![7u8; 512]).unwrap();
        // No commit frame appended: index must not expose page 1.
        let idx = FrameIndex::build(&buf, 512).unwrap();
        assert!(idx.page_bytes(1).is_none());
    }

    #[test]
    fn committed_frame_is_visible() {
        let mut writer = WalWriter::new(1, 2);
        let mut buf = Vec::new();
        writer.write_header(&mut buf, 512).unwrap();
        writer
            .append_commit_frame(&mut buf, 1, &vec![7u8; 512], 1)
            .unwrap();
        let idx = FrameIndex::build(&buf, 512).unwrap();
        assert_eq!(idx.page_bytes(1), Some(&vec![7u8; 512][..]));
        assert_eq!(idx.db_size_in_pages(), Some(1));
    }
}
