//! File Operation Dispatch
//!
//! Generic file I/O entry points over mounted volumes, addressed by
//! `"<device>:/<path>"`.

pub mod devops;
pub mod error;
pub mod file;

pub use devops::DevOps;
pub use error::FsError;
pub use file::{DirHandle, FileHandle, OpenFlags, SeekFrom, Stat, StatVfs};
