//! The 32-byte WAL file header.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};

pub const WAL_HEADER_SIZE: usize = 32;

/// Big-endian checksum variant. SQLite also allows a little-endian variant
/// selected by a different magic constant; Sharc always writes big-endian
/// and accepts only that magic on read.
const WAL_MAGIC_BE: u32 = 0x377f_0683;
const WAL_FILE_FORMAT: u32 = 3007000;

#[derive(Debug, Clone, Copy)]
pub struct WalHeader {
    pub page_size: u32,
    pub checkpoint_sequence: u32,
    pub salt1: u32,
    pub salt2: u32,
    pub checksum1: u32,
    pub checksum2: u32,
}

impl WalHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < WAL_HEADER_SIZE {
            return Err(Error::InvalidDatabase("WAL header shorter than 32 bytes".into()));
        }
        let mut c = Cursor::new(buf);
        let magic = c.read_u32::<BigEndian>()?;
        if magic != WAL_MAGIC_BE {
            return Err(Error::InvalidDatabase("bad WAL magic".into()));
        }
        let _format = c.read_u32::<BigEndian>()?;
        let page_size = c.read_u32::<BigEndian>()?;
        let checkpoint_sequence = c.read_u32::<BigEndian>()?;
        let salt1 = c.read_u32::<BigEndian>()?;
        let salt2 = c.read_u32::<BigEndian>()?;
        let checksum1 = c.read_u32::<BigEndian>()?;
        let checksum2 = c.read_u32::<BigEndian>()?;
        Ok(WalHeader {
            page_size,
            checkpoint_sequence,
            salt1,
            salt2,
            checksum1,
            checksum2,
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < WAL_HEADER_SIZE {
            return Err(Error::InvalidArgument("buffer shorter than 32 bytes".into()));
        }
        let mut c = Cursor::new(&mut buf[..WAL_HEADER_SIZE]);
        c.write_u32::<BigEndian>(WAL_MAGIC_BE)?;
        c.write_u32::<BigEndian>(WAL_FILE_FORMAT)?;
        c.write_u32::<BigEndian>(self.page_size)?;
        c.write_u32::<BigEndian>(self.checkpoint_sequence)?;
        c.write_u32::<BigEndian>(self.salt1)?;
        c.write_u32::<BigEndian>(self.salt2)?;
        c.write_u32::<BigEndian>(self.checksum1)?;
        c.write_u32::<BigEndian>(self.checksum2)?;
        Ok(())
    }

    /// The 8 bytes the rolling checksum starts over (magic+format+pagesize+seq).
    pub fn checksummed_prefix(buf: &[u8]) -> &[u8] {
        &buf[..24]
    }
}
