pub mod block;
pub mod error;
pub mod filesystems;
pub mod flags;

pub use block::{Disk, Extent, Partition, TableKind};
pub use error::{EngineError, ErrorKind, UmountFailure};
pub use filesystems::FilesystemType;
pub use flags::PartitionFlag;
