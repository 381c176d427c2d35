//! Transaction manager: owns the shadow page source and mutator for the
//! duration of one writer scope. `Transaction::begin` acquires the
//! reserved lock; `commit_rollback_journal`/`commit_wal` and `rollback`
//! each consume the transaction by value, so Rust's move semantics reject
//! a second commit or rollback at compile time — a stronger guarantee than
//! the runtime "double commit fails" check a language without ownership
//! would need. A transaction dropped without an explicit commit or
//! rollback call (an early return, a panic) still releases its lock via
//! `Drop`, matching the scoped-release discipline every other owning type
//! in this crate follows.

use crate::btree::Mutator;
use crate::error::Result;
use crate::format::db_header::{DbHeader, HEADER_SIZE};
use crate::page::{PageSource, PageStore, ShadowPageSource};
use crate::txn::journal::JournalWriter;
use crate::txn::lock::FileLock;
use crate::wal::writer::WalWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    RollbackJournal,
    Wal,
}

/// What the caller must durably persist to complete a commit. The
/// transaction manager never touches the main database file or a journal
/// file directly — it has no file handle of its own, only the read-only
/// `base` it was opened against — so it hands back the bytes the owning
/// `Database`/`OpenOptions` layer writes, fsyncs, and (for rollback-journal
/// mode) clears afterward.
pub enum CommitOutcome {
    /// The transaction made no writes; nothing to persist.
    NoOp,
    RollbackJournal {
        journal_bytes: Vec<u8>,
        dirty_pages: Vec<(u32, Vec<u8>)>,
    },
    Wal {
        frame_bytes: Vec<u8>,
        db_size_in_pages: u32,
    },
}

pub struct Transaction<'a, S: PageSource> {
    shadow: ShadowPageSource<'a, S>,
    /// `None` for a file-less (in-memory) database: there is no real file to
    /// lock, and Rust's borrow checker already prevents a second concurrent
    /// transaction against the same `Database` value.
    lock: Option<FileLock>,
    finished: bool,
}

impl<'a, S: PageSource> Transaction<'a, S> {
    /// Begin a writer scope against `base`, acquiring the reserved lock (if
    /// any). Fails with `Error::Busy` if another writer already holds it.
    pub fn begin(base: &'a S, mut lock: Option<FileLock>) -> Result<Self> {
        if let Some(l) = &mut lock {
            l.acquire_reserved()?;
        }
        Ok(Transaction {
            shadow: ShadowPageSource::new(base),
            lock,
            finished: false,
        })
    }

    /// A mutator scoped to this transaction's shadow overlay. Every write
    /// through it stays invisible to readers of `base` until commit.
    pub fn mutator(&mut self) -> Mutator<'_, ShadowPageSource<'a, S>> {
        Mutator::new(&mut self.shadow)
    }

    fn bump_change_counter(&mut self) -> Result<()> {
        let mut page1 = self.shadow.read_page(1)?.to_vec();
        let mut header = DbHeader::parse(&page1)?;
        header.change_counter = header.change_counter.wrapping_add(1);
        header.write(&mut page1[..HEADER_SIZE])?;
        self.shadow.write_page(1, &page1)
    }

    fn release_lock(&mut self) -> Result<()> {
        match &mut self.lock {
            Some(l) => l.release(),
            None => Ok(()),
        }
    }

    fn escalate_to_exclusive(&mut self) -> Result<()> {
        match &mut self.lock {
            Some(l) => l.acquire_exclusive(),
            None => Ok(()),
        }
    }

    /// Commit via the rollback-journal path: the exclusive lock is taken
    /// only for the commit itself (journal fsync, then main-DB page
    /// writes), matching spec.md's "exclusive for committing writers
    /// (rollback-journal)".
    pub fn commit_rollback_journal(mut self, journal_nonce: u32) -> Result<CommitOutcome>
    where
        S: PageStore,
    {
        if self.shadow.is_empty() {
            self.finished = true;
            self.release_lock()?;
            return Ok(CommitOutcome::NoOp);
        }
        self.bump_change_counter()?;
        self.escalate_to_exclusive()?;

        let original_page_count = self.shadow.base_page_count();
        let mut journal = JournalWriter::new(self.shadow.page_size(), journal_nonce);
        for (page_number, _) in self.shadow.dirty_pages() {
            // Pages allocated fresh by this transaction have no prior
            // content worth restoring; on rollback the shadow is simply
            // discarded, and on crash recovery the restored page-1 count
            // makes any leftover allocated page unreachable.
            if page_number <= original_page_count {
                let original = self.shadow.base_read(page_number)?.to_vec();
                journal.record_original(page_number, &original);
            }
        }
        let journal_bytes = journal.to_bytes()?;
        let dirty_pages = self
            .shadow
            .dirty_pages()
            .into_iter()
            .map(|(pn, bytes)| (pn, bytes.to_vec()))
            .collect();

        self.finished = true;
        self.release_lock()?;
        Ok(CommitOutcome::RollbackJournal {
            journal_bytes,
            dirty_pages,
        })
    }

    /// Commit via the WAL path: dirty pages become frames appended to
    /// `wal_writer`'s running checksum chain; the reserved lock is enough,
    /// no exclusive lock is taken (only a later checkpoint needs that).
    pub fn commit_wal(mut self, wal_writer: &mut WalWriter) -> Result<CommitOutcome> {
        if self.shadow.is_empty() {
            self.finished = true;
            self.release_lock()?;
            return Ok(CommitOutcome::NoOp);
        }
        self.bump_change_counter()?;

        let dirty = self.shadow.dirty_pages();
        let db_size_in_pages = self.shadow.page_count();
        let mut frame_bytes = Vec::new();
        let last = dirty.len() - 1;
        for (i, (page_number, bytes)) in dirty.into_iter().enumerate() {
            if i == last {
                wal_writer.append_commit_frame(&mut frame_bytes, page_number, bytes, db_size_in_pages)?;
            } else {
                wal_writer.append_frame(&mut frame_bytes, page_number, bytes)?;
            }
        }

        self.finished = true;
        self.release_lock()?;
        Ok(CommitOutcome::Wal {
            frame_bytes,
            db_size_in_pages,
        })
    }

    /// Discard every buffered write. `base` was never touched, so there is
    /// nothing to undo beyond releasing the lock.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.release_lock()
    }
}

impl<S: PageSource> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.release_lock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::source::new_empty_database;
    use crate::record;
    use crate::serial_type::Value;
    use tempfile::NamedTempFile;

    fn lock_on_tmp() -> (NamedTempFile, Option<FileLock>) {
        let tmp = NamedTempFile::new().unwrap();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        (tmp, Some(FileLock::new(file)))
    }

    #[test]
    fn empty_transaction_commits_as_noop() {
        let src = new_empty_database(512);
        let (_tmp, lock) = lock_on_tmp();
        let txn = Transaction::begin(&src, lock).unwrap();
        let outcome = txn.commit_wal(&mut WalWriter::new(1, 2)).unwrap();
        assert!(matches!(outcome, CommitOutcome::NoOp));
    }

    #[test]
    fn rollback_leaves_base_untouched() {
        let src = new_empty_database(512);
        let (_tmp, lock) = lock_on_tmp();
        let mut txn = Transaction::begin(&src, lock).unwrap();
        txn.mutator().insert(1, 1, &record::encode(&[Value::Int(1)])).unwrap();
        txn.rollback().unwrap();
        // `src` (the base) never saw a write; a fresh cursor over it still
        // finds an empty root leaf.
        let cursor = crate::btree::Cursor::open_at(&src, 1).unwrap();
        assert!(!cursor.is_valid());
    }

    #[test]
    fn wal_commit_produces_one_commit_frame_per_dirty_set() {
        let src = new_empty_database(512);
        let (_tmp, lock) = lock_on_tmp();
        let mut txn = Transaction::begin(&src, lock).unwrap();
        txn.mutator().insert(1, 1, &record::encode(&[Value::Int(7)])).unwrap();
        let mut writer = WalWriter::new(11, 22);
        let outcome = txn.commit_wal(&mut writer).unwrap();
        match outcome {
            CommitOutcome::Wal { frame_bytes, db_size_in_pages } => {
                assert!(!frame_bytes.is_empty());
                assert_eq!(db_size_in_pages, src.page_count());
            }
            _ => panic!("expected a WAL commit outcome"),
        }
    }

    #[test]
    fn rollback_journal_commit_captures_original_page_bytes() {
        let src = new_empty_database(512);
        let (_tmp, lock) = lock_on_tmp();
        let mut txn = Transaction::begin(&src, lock).unwrap();
        txn.mutator().insert(1, 1, &record::encode(&[Value::Int(1)])).unwrap();
        let outcome = txn.commit_rollback_journal(99).unwrap();
        match outcome {
            CommitOutcome::RollbackJournal { journal_bytes, dirty_pages } => {
                assert!(!journal_bytes.is_empty());
                assert_eq!(dirty_pages.len(), 1);
                assert_eq!(dirty_pages[0].0, 1);
            }
            _ => panic!("expected a rollback-journal commit outcome"),
        }
    }

    #[test]
    fn dropping_an_unfinished_transaction_releases_the_lock() {
        let src = new_empty_database(512);
        let (tmp, lock) = lock_on_tmp();
        {
            let mut txn = Transaction::begin(&src, lock).unwrap();
            txn.mutator().insert(1, 1, &record::encode(&[Value::Int(1)])).unwrap();
            // dropped without commit or rollback
        }
        let file = std::fs::OpenOptions::new().write(true).open(tmp.path()).unwrap();
        let mut other = FileLock::new(file);
        assert!(other.acquire_exclusive().is_ok());
    }
}
