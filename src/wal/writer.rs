//! Appends frames to a WAL buffer (or file), maintaining the rolling
//! checksum chain the reader validates.

use crate::error::Result;
use crate::format::wal_frame::{RollingChecksum, FRAME_HEADER_SIZE};
use crate::format::wal_header::WAL_HEADER_SIZE;
use crate::format::{FrameHeader, WalHeader};

pub struct WalWriter {
    salt1: u32,
    salt2: u32,
    checksum: RollingChecksum,
    header_written: bool,
}

impl WalWriter {
    pub fn new(salt1: u32, salt2: u32) -> Self {
        WalWriter {
            salt1,
            salt2,
            checksum: RollingChecksum::new(0, 0),
            header_written: false,
        }
    }

    /// Write the 32-byte WAL header for a fresh WAL. Must be called exactly
    /// once, before the first frame.
    pub fn write_header(&mut self, out: &mut Vec<u8>, page_size: u32) -> Result<()> {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        // Checksum fields are computed over the header's own first 24 bytes
        // (magic, format, page size, checkpoint sequence, both salts), so
        // write those fields first with the checksum left at zero, hash
        // that prefix, then go back and fill in the real checksum.
        let header = WalHeader {
            page_size,
            checkpoint_sequence: 1,
            salt1: self.salt1,
            salt2: self.salt2,
            checksum1: 0,
            checksum2: 0,
        };
        header.write(&mut buf)?;

        let mut checksum = RollingChecksum::new(0, 0);
        checksum.update(&buf[..24]);

        let header = WalHeader {
            checksum1: checksum.s0,
            checksum2: checksum.s1,
            ..header
        };
        header.write(&mut buf)?;

        self.checksum = checksum;
        out.extend_from_slice(&buf);
        self.header_written = true;
        Ok(())
    }

    fn append(&mut self, out: &mut Vec<u8>, page_number: u32, page: &[u8], db_size_after_commit: u32) -> Result<()> {
        debug_assert!(self.header_written, "WAL header must be written before any frame");
        let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
        // checksum over the frame header's first 8 bytes (page_number, db_size)
        // plus the full page image, per the WAL frame format.
        let partial = FrameHeader {
            page_number,
            db_size_after_commit,
            salt1: self.salt1,
            salt2: self.salt2,
            checksum1: 0,
            checksum2: 0,
        };
        partial.write(&mut header_bytes)?;

        self.checksum.update(&header_bytes[..8]);
        self.checksum.update(page);

        let complete = FrameHeader {
            page_number,
            db_size_after_commit,
            salt1: self.salt1,
            salt2: self.salt2,
            checksum1: self.checksum.s0,
            checksum2: self.checksum.s1,
        };
        complete.write(&mut header_bytes)?;

        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(page);
        Ok(())
    }

    /// Append a non-commit frame: the transaction is not yet durable.
    pub fn append_frame(&mut self, out: &mut Vec<u8>, page_number: u32, page: &[u8]) -> Result<()> {
        self.append(out, page_number, page, 0)
    }

    /// Append the frame that closes a transaction; `db_size_in_pages` is the
    /// database's page count after this commit.
    pub fn append_commit_frame(
        &mut self,
        out: &mut Vec<u8>,
        page_number: u32,
        page: &[u8],
        db_size_in_pages: u32,
    ) -> Result<()> {
        debug_assert!(db_size_in_pages != 0, "commit frame must carry a non-zero db size");
        self.append(out, page_number, page, db_size_in_pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::reader::FrameIndex;

    #[test]
    fn writer_output_validates_under_the_reader() {
        let mut writer = WalWriter::new(11, 22);
        let mut buf = Vec::new();
        writer.write_header(&mut buf, 512).unwrap();
        writer.append_frame(&mut buf, 3, &vec![1u8; 512]).unwrap();
        writer
            .append_commit_frame(&mut buf, 3, &vec![2u8; 512], 5)
            .unwrap();

        let idx = FrameIndex::build(&buf, 512).unwrap();
        assert_eq!(idx.page_bytes(3), Some(&vec![2u8; 512][..]));
        assert_eq!(idx.db_size_in_pages(), Some(5));
    }

    #[test]
    fn multi_page_commit_exposes_all_pages() {
        let mut writer = WalWriter::new(1, 2);
        let mut buf = Vec::new();
        writer.write_header(&mut buf, 512).unwrap();
        writer.append_frame(&mut buf, 1, &vec![9u8; 512]).unwrap();
        writer
            .append_commit_frame(&mut buf, 2, &vec![8u8; 512], 2)
            .unwrap();

        let idx = FrameIndex::build(&buf, 512).unwrap();
        assert_eq!(idx.page_bytes(1), Some(&vec![9u8; 512][..]));
        assert_eq!(idx.page_bytes(2), Some(&vec![8u8; 512][..]));
    }
}
