pub mod fs;
pub mod gpt;
mod io;
pub mod types;
pub mod units;
pub mod utils;

pub use gpt::{resolve_sector_size, Alignment, Disk};
pub use types::{FsType, Partition, PartitionTarget};
pub use units::{to_sector_delta, Geometry, Unit};
