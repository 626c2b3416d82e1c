pub mod indexed_sort;
pub mod merge;
pub mod sort_buffer;

pub use indexed_sort::{IndexEntry, sort, sort_range};
pub use merge::RawMergeIterator;
pub use sort_buffer::RecordSortBuffer;
