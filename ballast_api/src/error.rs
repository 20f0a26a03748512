use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::block::TableKind;
use crate::filesystems::FilesystemType;

/// Outcome of one directory's unmount attempt within `umount_partition`.
/// Partial results are reported per target, never collapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmountFailure {
    /// The directory that stayed attached.
    pub directory: PathBuf,

    /// True when the kernel refused with EBUSY (open handles, a process cwd
    /// inside the tree).
    pub busy: bool,

    /// Human-readable failure detail.
    pub detail: String,
}

/// Typed failures of every engine operation. These cross the binding-layer
/// boundary, so they serialize and carry owned data only.
#[derive(Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineError {
    #[error("'{}' is not a block device", .device.display())]
    DeviceNotFound { device: PathBuf },

    #[error("failed to read the partition table on '{}': {detail}", .device.display())]
    ProbeFailed { device: PathBuf, detail: String },

    #[error("unknown partition table type '{label}'")]
    UnsupportedLabel { label: String },

    #[error("the partition table on '{}' is full ({max_partitions} entries)", .device.display())]
    TableFull {
        device: PathBuf,
        max_partitions: usize,
    },

    #[error("requested extent does not fit on '{}': {detail}", .device.display())]
    OutOfSpace { device: PathBuf, detail: String },

    #[error("'{}' is busy", .resource.display())]
    Busy { resource: PathBuf },

    #[error("partition names are not supported on '{label}' tables")]
    NamesUnsupported { label: TableKind },

    #[error("flag '{flag}' is not recognized for '{label}' tables")]
    UnknownFlag { flag: String, label: TableKind },

    #[error("no mountable filesystem detected on '{}'", .device.display())]
    FilesystemUnsupported { device: PathBuf },

    #[error("'{}' is already an active mount target", .directory.display())]
    AlreadyMounted { directory: PathBuf },

    #[error("{filesystem} does not support mounting '{}' at multiple directories", .device.display())]
    MultiMountUnsupported {
        device: PathBuf,
        filesystem: FilesystemType,
    },

    #[error("'{}' has no active mount record", .resource.display())]
    NotMounted { resource: PathBuf },

    #[error("unmounting '{}' left {} of {} target(s) attached", .device.display(), .failures.len(), .attempted)]
    UmountIncomplete {
        device: PathBuf,
        /// Directories that were attempted in this call.
        attempted: usize,
        /// The targets that stayed attached, one entry each.
        failures: Vec<UmountFailure>,
    },

    #[error("{context}")]
    Io { context: String },
}

/// Coarse error categories, used by the binding layer to route failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    Busy,
    Conflict,
    Unsupported,
    Io,
}

impl EngineError {
    /// Wraps an underlying tool/syscall failure, flattening its context
    /// chain into the serializable message.
    pub fn io(context: impl std::fmt::Display, source: anyhow::Error) -> Self {
        EngineError::Io {
            context: format!("{context}: {source:#}"),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DeviceNotFound { .. } | EngineError::NotMounted { .. } => {
                ErrorKind::NotFound
            }
            EngineError::Busy { .. } | EngineError::UmountIncomplete { .. } => ErrorKind::Busy,
            EngineError::AlreadyMounted { .. }
            | EngineError::TableFull { .. }
            | EngineError::OutOfSpace { .. } => ErrorKind::Conflict,
            EngineError::UnsupportedLabel { .. }
            | EngineError::NamesUnsupported { .. }
            | EngineError::UnknownFlag { .. }
            | EngineError::FilesystemUnsupported { .. }
            | EngineError::MultiMountUnsupported { .. } => ErrorKind::Unsupported,
            EngineError::ProbeFailed { .. } | EngineError::Io { .. } => ErrorKind::Io,
        }
    }
}
