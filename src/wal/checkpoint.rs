//! Transfers committed WAL frames into the main database file and resets
//! the WAL. Must run under the exclusive lock; idempotent if interrupted
//! because frames are always overlaid deterministically by page number.

use log::info;

use crate::error::Result;
use crate::page::source::PageStore;
use crate::wal::reader::FrameIndex;

/// Auto-checkpoint fires opportunistically after a commit once the WAL
/// holds at least this many frames.
pub const AUTO_CHECKPOINT_FRAMES: usize = 1000;

/// Copy every page covered by `frames` into `main` and fsync it. Returns the
/// number of pages copied. The caller is responsible for truncating or
/// zeroing the WAL header afterward so the next writer starts a fresh
/// chain; that reset is a separate step so a crash between the page copies
/// and the reset still leaves a replayable, idempotent WAL.
pub fn checkpoint<S: PageStore>(main: &mut S, frames: &FrameIndex) -> Result<usize> {
    if frames.is_empty() {
        return Ok(0);
    }
    let mut copied = 0;
    for page_number in frames.page_numbers() {
        if let Some(bytes) = frames.page_bytes(page_number) {
            main.write_page(page_number, bytes)?;
            copied += 1;
        }
    }
    main.sync()?;
    info!("checkpoint copied {copied} pages into the main database");
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::source::MemoryPageSource;

    #[test]
    fn checkpoint_on_empty_index_is_a_no_op() {
        let mut mem = MemoryPageSource::empty(512, 2);
        let frames = FrameIndex::empty();
        let copied = checkpoint(&mut mem, &frames).unwrap();
        assert_eq!(copied, 0);
    }

    #[test]
    fn checkpoint_copies_every_committed_page() {
        let mut mem = MemoryPageSource::empty(512, 2);
        let mut frames = FrameIndex::empty();
        frames.insert_for_test(1, vec![5u8; 512], 2);
        frames.insert_for_test(2, vec![6u8; 512], 2);
        let copied = checkpoint(&mut mem, &frames).unwrap();
        assert_eq!(copied, 2);
        use crate::page::source::PageSource;
        assert_eq!(&*mem.read_page(1).unwrap(), &vec![5u8; 512][..]);
        assert_eq!(&*mem.read_page(2).unwrap(), &vec![6u8; 512][..]);
    }

    #[test]
    fn checkpoint_is_idempotent() {
        let mut mem = MemoryPageSource::empty(512, 2);
        let mut frames = FrameIndex::empty();
        frames.insert_for_test(1, vec![5u8; 512], 2);
        checkpoint(&mut mem, &frames).unwrap();
        let second = checkpoint(&mut mem, &frames).unwrap();
        assert_eq!(second, 1);
        use crate::page::source::PageSource;
        assert_eq!(&*mem.read_page(1).unwrap(), &vec![5u8; 512][..]);
    }
}
