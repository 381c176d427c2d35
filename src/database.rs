//! Ties the page I/O stack, the transaction manager, and the schema reader
//! together into the one type applications actually hold: `Database`,
//! opened through the `OpenOptions` builder.
//!
//! `Database` owns exactly one backend page source for the life of the
//! handle (memory, plain file, or encrypted file); mmap-backed databases
//! are read-only, matching `MmapPageSource`'s own contract. Every writer
//! transaction borrows that backend immutably through a `ShadowPageSource`
//! overlay, and only the commit path — which runs after the `Transaction`
//! is consumed — touches the backend's `PageStore` side and the real files
//! on disk (main file, rollback journal, WAL).

use std::fs::{File, OpenOptions as FsOpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rand::RngCore;

use crate::btree::Cursor;
use crate::crypto::{self, DerivedKey, KdfParams};
use crate::error::{Error, Result};
use crate::format::db_header::{DbHeader, HEADER_SIZE};
use crate::format::envelope::{CipherAlgorithm, Envelope, KdfAlgorithm as EnvelopeKdfAlgorithm, ENVELOPE_SIZE};
use crate::format::{BtreeHeader, PageType};
use crate::page::source::new_empty_database;
use crate::page::{
    CachedPageSource, CounterPolicy, EncryptedPageSource, EncryptingTransform, FilePageSource, MemoryPageSource,
    MmapPageSource, PageBuf, PageSource, PageStore,
};
use crate::schema::{SchemaEntry, SchemaReader};
use crate::txn::{CommitOutcome, FileLock, JournalMode, Transaction};
use crate::wal::{checkpoint, FrameIndex, WalWriter};

const DEFAULT_PAGE_SIZE: u32 = 4096;
const DEFAULT_CACHE_CAPACITY: usize = 2000;

/// Password-based encryption configuration passed to `OpenOptions`.
pub struct EncryptionOptions {
    pub password: String,
    pub kdf_params: KdfParams,
}

impl EncryptionOptions {
    pub fn new(password: impl Into<String>) -> Self {
        EncryptionOptions {
            password: password.into(),
            kdf_params: KdfParams::default(),
        }
    }
}

/// Builder for opening or creating a Sharc database.
pub struct OpenOptions {
    page_size: u32,
    cache_capacity: usize,
    journal_mode: JournalMode,
    encryption: Option<EncryptionOptions>,
    mmap: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            journal_mode: JournalMode::RollbackJournal,
            encryption: None,
            mmap: false,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn encrypted_with(mut self, options: EncryptionOptions) -> Self {
        self.encryption = Some(options);
        self
    }

    /// Map the file read-only instead of issuing positioned reads. Writers
    /// still require `create`/`open` without this flag: `MmapPageSource`
    /// carries no `PageStore` impl, so a mmap-backed `Database` can only
    /// read, never begin a write transaction.
    pub fn mmap(mut self, enabled: bool) -> Self {
        self.mmap = enabled;
        self
    }

    /// An ephemeral, file-less database, analogous to SQLite's `:memory:`.
    /// Commits still produce rollback-journal or WAL bytes internally (so
    /// the same `Transaction` API works unmodified) but nothing is ever
    /// written to disk, and there is no lock to take.
    pub fn open_in_memory(self) -> Database {
        Database {
            backend: Backend::Memory(new_empty_database(self.page_size)),
            main_file: None,
            path: None,
            journal_mode: self.journal_mode,
            page_size: self.page_size,
            wal_writer: None,
        }
    }

    /// Create a brand-new database file at `path`, which must not already
    /// exist.
    pub fn create(self, path: impl AsRef<Path>) -> Result<Database> {
        let path = path.as_ref().to_path_buf();
        let mut file = FsOpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        match &self.encryption {
            Some(enc) => self.create_encrypted(file, path, enc),
            None => {
                let page1 = fresh_page1(self.page_size);
                file.write_all(&page1)?;
                file.sync_all()?;
                self.open(path)
            }
        }
    }

    /// Open an existing database file at `path`.
    pub fn open(self, path: impl AsRef<Path>) -> Result<Database> {
        let path = path.as_ref().to_path_buf();
        let mut probe = FsOpenOptions::new().read(true).write(true).open(&path)?;

        let mut prefix = [0u8; ENVELOPE_SIZE];
        let is_encrypted = {
            use std::io::Read;
            match probe.read_exact(&mut prefix) {
                Ok(()) => Envelope::parse(&prefix).is_ok(),
                Err(_) => false,
            }
        };

        if is_encrypted {
            let enc = self
                .encryption
                .as_ref()
                .ok_or_else(|| Error::InvalidArgument("database is encrypted; no password supplied".into()))?;
            self.open_encrypted(probe, path, enc, Envelope::parse(&prefix)?)
        } else {
            self.open_plain(probe, path)
        }
    }

    fn open_plain(self, file: File, path: PathBuf) -> Result<Database> {
        let backend = if self.mmap {
            Backend::Mmap(MmapPageSource::open(&file, self.page_size)?)
        } else {
            let inner = FilePageSource::open(file.try_clone()?, self.page_size)?;
            Backend::Plain(CachedPageSource::new(inner, self.cache_capacity))
        };
        Ok(Database {
            backend,
            main_file: Some(file),
            path: Some(path),
            journal_mode: self.journal_mode,
            page_size: self.page_size,
            wal_writer: None,
        })
    }

    fn create_encrypted(self, mut file: File, path: PathBuf, enc: &EncryptionOptions) -> Result<Database> {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = crypto::derive_key(&enc.password, &salt, &enc.kdf_params)?;
        let key_verify = crypto::key_verification_tag(&key)?;

        let envelope = Envelope {
            kdf: EnvelopeKdfAlgorithm::Argon2id,
            cipher: CipherAlgorithm::Aes256Gcm,
            kdf_time_cost: enc.kdf_params.time_cost,
            kdf_memory_cost_kib: enc.kdf_params.memory_cost_kib,
            kdf_parallelism: enc.kdf_params.parallelism,
            salt,
            key_verify,
            inner_page_size: self.page_size,
            encrypted_page_count: 1,
        };
        let mut envelope_bytes = vec![0u8; ENVELOPE_SIZE];
        envelope.write(&mut envelope_bytes)?;
        file.write_all(&envelope_bytes)?;

        let transform = EncryptingTransform::new(key, CounterPolicy::PerPage);
        let page1 = fresh_page1(self.page_size);
        let transformed_len = transform.transformed_page_size(self.page_size) as usize;
        let mut ciphertext = vec![0u8; transformed_len];
        transform.transform_write(&page1, &mut ciphertext, 1)?;
        file.write_all(&ciphertext)?;
        file.sync_all()?;

        self.open(path)
    }

    fn open_encrypted(self, file: File, path: PathBuf, enc: &EncryptionOptions, envelope: Envelope) -> Result<Database> {
        if envelope.cipher != CipherAlgorithm::Aes256Gcm {
            return Err(Error::InvalidDatabase("unsupported cipher algorithm".into()));
        }
        let kdf_params = KdfParams {
            algorithm: envelope.kdf,
            time_cost: envelope.kdf_time_cost,
            memory_cost_kib: envelope.kdf_memory_cost_kib,
            parallelism: envelope.kdf_parallelism,
        };
        let key = crypto::derive_key(&enc.password, &envelope.salt, &kdf_params)?;
        crypto::verify_key(&key, &envelope.key_verify)?;

        let transform = EncryptingTransform::new(key, CounterPolicy::PerPage);
        let transformed_page_size = transform.transformed_page_size(envelope.inner_page_size);
        let inner = FilePageSource::open_at_offset(file.try_clone()?, transformed_page_size, ENVELOPE_SIZE as u64)?;
        let encrypted = EncryptedPageSource::new(inner, transform, envelope.inner_page_size);
        let backend = Backend::Encrypted(CachedPageSource::new(encrypted, self.cache_capacity));

        Ok(Database {
            backend,
            main_file: Some(file),
            path: Some(path),
            journal_mode: self.journal_mode,
            page_size: envelope.inner_page_size,
            wal_writer: None,
        })
    }
}

/// A freshly formatted page 1: the 100-byte database header followed by an
/// empty table-leaf b-tree header, the same content `new_empty_database`
/// writes for in-memory databases.
fn fresh_page1(page_size: u32) -> Vec<u8> {
    let mut page = vec![0u8; page_size as usize];
    let header = DbHeader::new_empty(page_size);
    header.write(&mut page[..HEADER_SIZE]).expect("fresh header always fits");
    let btree_header = BtreeHeader {
        page_type: PageType::TableLeaf,
        first_freeblock: 0,
        cell_count: 0,
        cell_content_start: page_size,
        fragmented_free_bytes: 0,
        right_child: None,
    };
    btree_header
        .write(&mut page, HEADER_SIZE)
        .expect("fresh b-tree header always fits");
    page
}

/// The backend a `Database` reads and writes through. Kept as a closed sum
/// type rather than a trait object: the set of supported page sources is
/// small and fixed, and callers never need to add a new variant without
/// touching this module anyway.
enum Backend {
    Memory(MemoryPageSource),
    Plain(CachedPageSource<FilePageSource>),
    Encrypted(CachedPageSource<EncryptedPageSource<FilePageSource, EncryptingTransform>>),
    Mmap(MmapPageSource),
}

impl Backend {
    fn as_store(&mut self) -> Result<&mut dyn PageStore> {
        match self {
            Backend::Memory(s) => Ok(s),
            Backend::Plain(s) => Ok(s),
            Backend::Encrypted(s) => Ok(s),
            Backend::Mmap(_) => Err(Error::InvalidArgument(
                "a memory-mapped database is opened read-only".into(),
            )),
        }
    }
}

impl PageSource for Backend {
    fn read_page(&self, page_number: u32) -> Result<PageBuf<'_>> {
        match self {
            Backend::Memory(s) => s.read_page(page_number),
            Backend::Plain(s) => s.read_page(page_number),
            Backend::Encrypted(s) => s.read_page(page_number),
            Backend::Mmap(s) => s.read_page(page_number),
        }
    }

    fn page_count(&self) -> u32 {
        match self {
            Backend::Memory(s) => s.page_count(),
            Backend::Plain(s) => s.page_count(),
            Backend::Encrypted(s) => s.page_count(),
            Backend::Mmap(s) => s.page_count(),
        }
    }

    fn page_size(&self) -> u32 {
        match self {
            Backend::Memory(s) => s.page_size(),
            Backend::Plain(s) => s.page_size(),
            Backend::Encrypted(s) => s.page_size(),
            Backend::Mmap(s) => s.page_size(),
        }
    }
}

/// An open database handle: one backend page source, the journal mode it
/// commits through, and (for file-backed databases) the open file and a
/// running WAL writer once one has been started.
pub struct Database {
    backend: Backend,
    main_file: Option<File>,
    path: Option<PathBuf>,
    journal_mode: JournalMode,
    page_size: u32,
    wal_writer: Option<WalWriter>,
}

impl Database {
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.backend.page_count()
    }

    pub fn journal_mode(&self) -> JournalMode {
        self.journal_mode
    }

    fn wal_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| path_with_suffix(p, "-wal"))
    }

    fn journal_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| path_with_suffix(p, "-journal"))
    }

    /// A read cursor over the table b-tree rooted at `root_page`.
    pub fn cursor(&self, root_page: u32) -> Result<Cursor<'_, Backend>> {
        Cursor::open_at(&self.backend, root_page)
    }

    /// The `sqlite_schema` rows: tables, indexes, views, triggers.
    pub fn schema(&self) -> Result<Vec<SchemaEntry>> {
        SchemaReader::new(&self.backend).entries()
    }

    /// Begin a writer transaction. The reserved lock (file-backed databases
    /// only) is acquired immediately; `Error::Busy` if another writer holds
    /// it already.
    pub fn begin_write(&self) -> Result<Transaction<'_, Backend>> {
        let page1 = self.backend.read_page(1)?;
        if DbHeader::parse(&page1)?.incremental_vacuum {
            return Err(Error::InvalidArgument(
                "database has incremental-vacuum enabled; pointer-map pages are not supported, refusing to write".into(),
            ));
        }
        let lock = match &self.main_file {
            Some(f) => Some(FileLock::new(f.try_clone()?)),
            None => None,
        };
        Transaction::begin(&self.backend, lock)
    }

    /// Commit `txn` through this database's configured journal mode,
    /// persisting to the main file (and journal or WAL file, for
    /// file-backed databases) before returning.
    pub fn commit(&mut self, txn: Transaction<'_, Backend>) -> Result<()> {
        match self.journal_mode {
            JournalMode::RollbackJournal => self.commit_rollback_journal(txn),
            JournalMode::Wal => self.commit_wal(txn),
        }
    }

    fn commit_rollback_journal(&mut self, txn: Transaction<'_, Backend>) -> Result<()> {
        let mut nonce_bytes = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = u32::from_be_bytes(nonce_bytes);

        let outcome = txn.commit_rollback_journal(nonce)?;
        let (journal_bytes, dirty_pages) = match outcome {
            CommitOutcome::NoOp => return Ok(()),
            CommitOutcome::RollbackJournal {
                journal_bytes,
                dirty_pages,
            } => (journal_bytes, dirty_pages),
            CommitOutcome::Wal { .. } => {
                return Err(Error::InvalidArgument(
                    "transaction committed in WAL mode but database is in rollback-journal mode".into(),
                ))
            }
        };

        if let Some(journal_path) = self.journal_path() {
            let mut journal_file = FsOpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&journal_path)?;
            journal_file.write_all(&journal_bytes)?;
            journal_file.sync_all()?;
        }

        let store = self.backend.as_store()?;
        for (page_number, bytes) in &dirty_pages {
            while store.page_count() < *page_number {
                store.allocate_page()?;
            }
            store.write_page(*page_number, bytes)?;
        }
        store.sync()?;

        if let Some(journal_path) = self.journal_path() {
            let _ = std::fs::remove_file(journal_path);
        }
        debug!("rollback-journal commit wrote {} pages", dirty_pages.len());
        Ok(())
    }

    fn commit_wal(&mut self, txn: Transaction<'_, Backend>) -> Result<()> {
        if self.wal_writer.is_none() {
            let mut salts = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut salts);
            let salt1 = u32::from_be_bytes(salts[..4].try_into().expect("4 bytes"));
            let salt2 = u32::from_be_bytes(salts[4..].try_into().expect("4 bytes"));
            let mut writer = WalWriter::new(salt1, salt2);
            if let Some(wal_path) = self.wal_path() {
                let mut header_bytes = Vec::new();
                writer.write_header(&mut header_bytes, self.page_size)?;
                let mut wal_file = FsOpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&wal_path)?;
                wal_file.write_all(&header_bytes)?;
                wal_file.sync_all()?;
            } else {
                let mut header_bytes = Vec::new();
                writer.write_header(&mut header_bytes, self.page_size)?;
            }
            self.wal_writer = Some(writer);
        }

        let outcome = {
            let writer = self.wal_writer.as_mut().expect("just initialized above");
            txn.commit_wal(writer)?
        };
        let (frame_bytes, db_size_in_pages) = match outcome {
            CommitOutcome::NoOp => return Ok(()),
            CommitOutcome::Wal {
                frame_bytes,
                db_size_in_pages,
            } => (frame_bytes, db_size_in_pages),
            CommitOutcome::RollbackJournal { .. } => {
                return Err(Error::InvalidArgument(
                    "transaction committed in rollback-journal mode but database is in WAL mode".into(),
                ))
            }
        };

        if let Some(wal_path) = self.wal_path() {
            let mut wal_file = FsOpenOptions::new().read(true).write(true).open(&wal_path)?;
            use std::io::{Seek, SeekFrom};
            wal_file.seek(SeekFrom::End(0))?;
            wal_file.write_all(&frame_bytes)?;
            wal_file.sync_all()?;
        }

        info!("WAL commit landed a {}-page database image", db_size_in_pages);
        self.maybe_checkpoint()?;
        Ok(())
    }

    /// Fold WAL frames into the main file once the WAL has grown past
    /// `wal::checkpoint::AUTO_CHECKPOINT_FRAMES` frames. A no-op for
    /// memory-backed databases, which never write a WAL file at all.
    fn maybe_checkpoint(&mut self) -> Result<()> {
        let Some(wal_path) = self.wal_path() else {
            return Ok(());
        };
        let wal_bytes = match std::fs::read(&wal_path) {
            Ok(b) => b,
            Err(_) => return Ok(()),
        };
        let frames = FrameIndex::build(&wal_bytes, self.page_size)?;
        if frames.page_numbers().len() < crate::wal::checkpoint::AUTO_CHECKPOINT_FRAMES {
            return Ok(());
        }
        let store = self.backend.as_store()?;
        checkpoint(store, &frames)?;
        self.wal_writer = None;
        let mut wal_file = FsOpenOptions::new().write(true).truncate(true).open(&wal_path)?;
        wal_file.sync_all()?;
        Ok(())
    }

    /// Recover from a hot rollback journal left behind by a crash between
    /// the journal's fsync and the main file's. Safe to call on every open;
    /// a no-op if no journal file exists.
    pub fn recover(&mut self) -> Result<bool> {
        let Some(journal_path) = self.journal_path() else {
            return Ok(false);
        };
        let bytes = match std::fs::read(&journal_path) {
            Ok(b) => b,
            Err(_) => return Ok(false),
        };
        let records = crate::txn::journal::parse(&bytes)?;
        let store = self.backend.as_store()?;
        crate::txn::journal::replay(store, &records)?;
        std::fs::remove_file(&journal_path)?;
        info!("recovered {} pages from a hot rollback journal", records.len());
        Ok(true)
    }
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::serial_type::Value;
    use tempfile::tempdir;

    #[test]
    fn incremental_vacuum_database_refuses_writes() {
        let mut db = OpenOptions::new().open_in_memory();
        {
            let page1 = db.backend.read_page(1).unwrap().to_vec();
            let mut header = DbHeader::parse(&page1).unwrap();
            header.incremental_vacuum = true;
            let mut page1 = page1;
            header.write(&mut page1[..HEADER_SIZE]).unwrap();
            db.backend.as_store().unwrap().write_page(1, &page1).unwrap();
        }
        let err = db.begin_write().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn in_memory_database_round_trips_a_row() {
        let mut db = OpenOptions::new().open_in_memory();
        let mut txn = db.begin_write().unwrap();
        txn.mutator().insert(1, 1, &record::encode(&[Value::Int(42)])).unwrap();
        db.commit(txn).unwrap();

        let mut cursor = db.cursor(1).unwrap();
        assert!(cursor.is_valid());
        assert_eq!(cursor.rowid().unwrap(), 1);
        assert!(!cursor.move_next().unwrap());
    }

    #[test]
    fn file_backed_database_survives_a_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sharc");
        {
            let mut db = OpenOptions::new().create(&path).unwrap();
            let mut txn = db.begin_write().unwrap();
            txn.mutator().insert(1, 7, &record::encode(&[Value::Text(b"hi")])).unwrap();
            db.commit(txn).unwrap();
        }

        let db = OpenOptions::new().open(&path).unwrap();
        let mut cursor = db.cursor(1).unwrap();
        assert!(cursor.is_valid());
        assert_eq!(cursor.rowid().unwrap(), 7);
    }

    #[test]
    fn wal_mode_commit_round_trips_through_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.sharc");
        {
            let mut db = OpenOptions::new().journal_mode(JournalMode::Wal).create(&path).unwrap();
            let mut txn = db.begin_write().unwrap();
            txn.mutator().insert(1, 1, &record::encode(&[Value::Int(1)])).unwrap();
            db.commit(txn).unwrap();
        }
        assert!(path_with_suffix(&path, "-wal").exists());
    }

    #[test]
    fn encrypted_database_requires_the_right_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enc.sharc");
        let fast_kdf = KdfParams {
            time_cost: 1,
            memory_cost_kib: 8,
            parallelism: 1,
            ..Default::default()
        };
        {
            let opts = OpenOptions::new().encrypted_with(EncryptionOptions {
                password: "correct horse".into(),
                kdf_params: fast_kdf,
            });
            let mut db = opts.create(&path).unwrap();
            let mut txn = db.begin_write().unwrap();
            txn.mutator().insert(1, 1, &record::encode(&[Value::Int(1)])).unwrap();
            db.commit(txn).unwrap();
        }

        let wrong = OpenOptions::new().encrypted_with(EncryptionOptions {
            password: "wrong".into(),
            kdf_params: fast_kdf,
        });
        let err = wrong.open(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::WrongPassword);

        let right = OpenOptions::new().encrypted_with(EncryptionOptions {
            password: "correct horse".into(),
            kdf_params: fast_kdf,
        });
        let db = right.open(&path).unwrap();
        let mut cursor = db.cursor(1).unwrap();
        assert!(cursor.is_valid());
    }
}
