//! Disk and partition management backend of an OS installer.
//!
//! The engine has three faces: read-only disk inventory (`locate_disk`),
//! destructive partition table edits (`label_disk`, `new_partition`, ...),
//! and the mount lifecycle (`mount`, `umount_partition`, `umount_directory`).
//! All calls run synchronously on the caller's thread; the engine owns no
//! state beyond its mount records and queries the OS live on every call, so
//! snapshots go stale on mutation and callers re-probe to observe effects.
//!
//! The OS is reached exclusively through an injected [`backend::Backend`]:
//! [`backend::ToolBackend`] drives the real tool-set, and the in-memory
//! fake behind the `test-utilities` feature stands in for it under test.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

pub mod backend;
mod editor;
mod inventory;
mod locks;
mod mounts;

pub use ballast_api::{
    Disk, EngineError, ErrorKind, Extent, FilesystemType, Partition, PartitionFlag, TableKind,
    UmountFailure,
};

use backend::{Backend, ToolBackend};

pub struct Engine {
    backend: Arc<dyn Backend>,
    disk_locks: locks::DiskLocks,
    mounts: mounts::MountTable,
}

impl Engine {
    /// Builds an engine over an explicit backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            disk_locks: locks::DiskLocks::default(),
            mounts: mounts::MountTable::default(),
        }
    }

    /// Builds an engine over the system tool-set, verifying the required
    /// binaries up front.
    pub fn with_system_tools() -> Result<Self, EngineError> {
        let backend = ToolBackend::new()
            .map_err(|e| EngineError::io("failed to initialize the system tool backend", e))?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Unpacks a compressed read-only filesystem image into a directory via
    /// the external extractor. The invocation is opaque to the engine; any
    /// failure surfaces as `Io`.
    pub fn extract_image(
        &self,
        image: impl AsRef<Path>,
        target: impl AsRef<Path>,
        force: bool,
    ) -> Result<(), EngineError> {
        let image = image.as_ref();
        let target = target.as_ref();
        self.backend
            .extract_image(image, target, force)
            .map_err(|e| {
                EngineError::io(
                    format!(
                        "failed to extract '{}' into '{}'",
                        image.display(),
                        target.display()
                    ),
                    e,
                )
            })
    }

    /// Paths of every partition currently held in the mount records. Intended
    /// for the binding layer's diagnostics; the authoritative mount state is
    /// the OS's.
    pub fn mounted_partitions(&self) -> Vec<PathBuf> {
        self.mounts.mounted_partitions()
    }
}
