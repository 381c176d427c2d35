//! Sharc: an embedded, SQLite-file-format-compatible storage engine core.
//!
//! This crate is the bottom of Sharc's stack — the part a query planner,
//! a graph layer, or any other consumer sits on top of. It reads and
//! writes standard SQLite database files bit-for-bit, with optional
//! page-level encryption and a write-ahead log, and exposes row-level byte
//! access only: no SQL parsing, no query planning, no execution. Those
//! live in a separate crate that depends on this one.
//!
//! Module layout, leaves first:
//!
//! - [`varint`] / [`serial_type`]: SQLite's variable-length integer and
//!   per-column serial-type codecs.
//! - [`format`]: parsers/writers for the on-disk header structs (database
//!   header, b-tree page header, WAL header/frame, encryption envelope).
//! - [`page`]: the page source/store abstraction — memory, file, mmap,
//!   the LRU cache wrapper, the WAL-merge wrapper, and the pluggable
//!   encryption transform.
//! - [`record`] / [`cell`]: the row payload codec and the b-tree cell
//!   framing built around it.
//! - [`btree`]: the read cursor, the insert/update/delete mutator, and the
//!   freelist manager the mutator allocates pages through.
//! - [`crypto`]: key derivation, key verification, nonce derivation, and
//!   page AEAD for the encryption envelope.
//! - [`txn`]: file locking, the rollback-journal writer, and the
//!   transaction manager tying a shadow page source and a mutator together
//!   for one writer's scope.
//! - [`wal`]: the WAL frame writer, the frame-index reader, and the
//!   checkpointer.
//! - [`schema`]: a pure consumer of [`btree::Cursor`] that reads the
//!   `sqlite_schema` table rooted at page 1.
//! - [`database`]: ties all of the above into the one type applications
//!   hold, [`Database`], opened through [`OpenOptions`].

pub mod btree;
pub mod cell;
pub mod crypto;
pub mod database;
pub mod error;
pub mod format;
pub mod page;
pub mod record;
pub mod schema;
pub mod serial_type;
pub mod txn;
pub mod varint;
pub mod wal;

pub use database::{Database, EncryptionOptions, OpenOptions};
pub use error::{Error, ErrorKind, Result};
pub use schema::{SchemaEntry, SchemaObjectKind, SchemaReader};
pub use txn::JournalMode;
