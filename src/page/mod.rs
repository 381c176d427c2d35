//! Page I/O stack: sources (memory, file, mmap), the LRU cache wrapper, the
//! WAL-merge wrapper, and the pluggable encryption transform.

pub mod cache;
pub mod encrypted;
pub mod shadow;
pub mod source;
pub mod transform;
pub mod wal_merge;

pub use cache::CachedPageSource;
pub use encrypted::EncryptedPageSource;
pub use shadow::ShadowPageSource;
pub use source::{FilePageSource, MemoryPageSource, MmapPageSource, PageBuf, PageSource, PageStore};
pub use transform::{CounterPolicy, EncryptingTransform, IdentityTransform, PageTransform};
pub use wal_merge::WalMergedSource;
