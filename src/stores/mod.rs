//! Ready-made store backends (combined source and sink roles).

mod fs;
mod mem;

pub use fs::FsStore;
pub use mem::MemoryStore;
