pub mod source;
pub mod stream;

pub use source::{FileSource, InputSource, MemorySource};
pub use stream::{BatchStream, RowBatch};
