//! Table b-tree engine: a read cursor (`reader`), an insert/update/delete
//! mutator (`mutator`), and the freelist manager (`freelist`) the mutator
//! allocates and releases pages through.

pub mod freelist;
pub mod mutator;
pub mod reader;

pub use freelist::FreelistManager;
pub use mutator::Mutator;
pub use reader::Cursor;
