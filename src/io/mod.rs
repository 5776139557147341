pub mod block;
pub mod console;
pub mod defragmenter;
pub mod disk;
pub mod id_allocator;
pub mod loader;

pub use block::{Block, BlockAddress};
pub use console::{ConsoleSink, LogSink, MemorySink};
pub use defragmenter::DefragReport;
pub use disk::{DiskDriver, DiskError, FileInfo, Geometry};
pub use id_allocator::IdAllocator;
pub use loader::{parse_program, LoadError};
