//! The 24-byte WAL frame header, plus the rolling checksum used to validate
//! a frame against the WAL header and every prior frame.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};

pub const FRAME_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub page_number: u32,
    /// Database size in pages after commit; 0 for a non-commit frame.
    pub db_size_after_commit: u32,
    pub salt1: u32,
    pub salt2: u32,
    pub checksum1: u32,
    pub checksum2: u32,
}

impl FrameHeader {
    pub fn is_commit(&self) -> bool {
        self.db_size_after_commit != 0
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(Error::InvalidDatabase("WAL frame header truncated".into()));
        }
        let mut c = Cursor::new(buf);
        Ok(FrameHeader {
            page_number: c.read_u32::<BigEndian>()?,
            db_size_after_commit: c.read_u32::<BigEndian>()?,
            salt1: c.read_u32::<BigEndian>()?,
            salt2: c.read_u32::<BigEndian>()?,
            checksum1: c.read_u32::<BigEndian>()?,
            checksum2: c.read_u32::<BigEndian>()?,
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(Error::InvalidArgument("buffer too small for WAL frame header".into()));
        }
        let mut c = Cursor::new(&mut buf[..FRAME_HEADER_SIZE]);
        c.write_u32::<BigEndian>(self.page_number)?;
        c.write_u32::<BigEndian>(self.db_size_after_commit)?;
        c.write_u32::<BigEndian>(self.salt1)?;
        c.write_u32::<BigEndian>(self.salt2)?;
        c.write_u32::<BigEndian>(self.checksum1)?;
        c.write_u32::<BigEndian>(self.checksum2)?;
        Ok(())
    }
}

/// SQLite's rolling Fibonacci-like checksum over big-endian 32-bit words.
/// `(s0, s1)` is the running state; `update` folds in one more buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollingChecksum {
    pub s0: u32,
    pub s1: u32,
}

impl RollingChecksum {
    pub fn new(s0: u32, s1: u32) -> Self {
        RollingChecksum { s0, s1 }
    }

    /// `data` must have a length that is a multiple of 4.
    pub fn update(&mut self, data: &[u8]) {
        debug_assert!(data.len() % 4 == 0);
        let mut chunks = data.chunks_exact(4);
        for chunk in &mut chunks {
            let x0 = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.s0 = self.s0.wrapping_add(x0).wrapping_add(self.s1);
            self.s1 = self
                .s1
                .wrapping_add(self.s0)
                .wrapping_add(checksum_round_constant(&chunks));
        }
    }
}

/// SQLite's real algorithm doesn't need a round constant; kept as a hook
/// point in case future frame formats add one. Always zero today.
fn checksum_round_constant(_chunks: &std::slice::ChunksExact<u8>) -> u32 {
    0
}
