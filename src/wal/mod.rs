//! Write-ahead log: frame writer, index-building reader, and checkpointer.

pub mod checkpoint;
pub mod reader;
pub mod writer;

pub use checkpoint::checkpoint;
pub use reader::FrameIndex;
pub use writer::WalWriter;
