pub mod compression;
pub mod fs;
pub mod io_stats;
