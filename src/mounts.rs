use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use log::debug;

use ballast_api::{block::parent_disk_path, EngineError, Partition, UmountFailure};

use crate::{backend::UnmountError, Engine};

/// The engine's only in-memory state: which directories each partition is
/// currently attached to. Everything else is queried live from the OS.
///
/// Guarded by a single lock, independent of the per-disk table locks. The
/// table editor reads this state before taking a disk lock, never after.
#[derive(Default)]
pub(crate) struct MountTable {
    records: Mutex<HashMap<PathBuf, BTreeSet<PathBuf>>>,
}

impl MountTable {
    fn records(&self) -> MutexGuard<'_, HashMap<PathBuf, BTreeSet<PathBuf>>> {
        self.records.lock().expect("mount records poisoned")
    }

    /// Whether any directory is recorded for this partition path.
    pub(crate) fn is_mounted(&self, partition: &Path) -> bool {
        self.records()
            .get(partition)
            .is_some_and(|dirs| !dirs.is_empty())
    }

    /// Partition paths with at least one active record, sorted.
    pub(crate) fn mounted_partitions(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .records()
            .iter()
            .filter(|(_, dirs)| !dirs.is_empty())
            .map(|(partition, _)| partition.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Some partition of `disk` with an active record, if any.
    pub(crate) fn first_on_disk(&self, disk: &Path) -> Option<PathBuf> {
        self.records()
            .iter()
            .filter(|(_, dirs)| !dirs.is_empty())
            .map(|(partition, _)| partition)
            .find(|partition| parent_disk_path(partition) == disk)
            .cloned()
    }
}

impl Engine {
    /// Attaches the partition's filesystem at `target`. The record is added
    /// only after the OS mount succeeded.
    pub fn mount(
        &self,
        partition: &Partition,
        target: impl AsRef<Path>,
    ) -> Result<(), EngineError> {
        let target = target.as_ref();

        let Some(filesystem) = partition.filesystem.filter(|fs| fs.mountable()) else {
            return Err(EngineError::FilesystemUnsupported {
                device: partition.path.clone(),
            });
        };

        // Held across the OS call so a concurrent caller cannot pass the
        // same checks and race the record insert.
        let mut records = self.mounts.records();

        if records.values().any(|dirs| dirs.contains(target)) {
            return Err(EngineError::AlreadyMounted {
                directory: target.to_path_buf(),
            });
        }
        if let Some(dirs) = records.get(&partition.path) {
            if !dirs.is_empty() && !filesystem.supports_multi_mount() {
                return Err(EngineError::MultiMountUnsupported {
                    device: partition.path.clone(),
                    filesystem,
                });
            }
        }

        debug!(
            "Mounting '{}' ({}) at '{}'",
            partition.path.display(),
            filesystem,
            target.display()
        );
        self.backend
            .mount(&partition.path, target, filesystem)
            .map_err(|e| {
                EngineError::io(
                    format!(
                        "failed to mount '{}' at '{}'",
                        partition.path.display(),
                        target.display()
                    ),
                    e,
                )
            })?;

        records
            .entry(partition.path.clone())
            .or_default()
            .insert(target.to_path_buf());
        Ok(())
    }

    /// Detaches every directory recorded for this partition. Each directory
    /// is attempted independently: successes drop their records even when a
    /// sibling stays busy, and the failures are reported per target.
    pub fn umount_partition(&self, partition: &Partition) -> Result<(), EngineError> {
        let mut records = self.mounts.records();

        let targets: Vec<PathBuf> = records
            .get(&partition.path)
            .map(|dirs| dirs.iter().cloned().collect())
            .unwrap_or_default();
        if targets.is_empty() {
            return Err(EngineError::NotMounted {
                resource: partition.path.clone(),
            });
        }

        let attempted = targets.len();
        let mut failures = Vec::new();
        for target in targets {
            debug!(
                "Unmounting '{}' from '{}'",
                target.display(),
                partition.path.display()
            );
            match self.backend.unmount(&target) {
                Ok(()) => {
                    if let Some(dirs) = records.get_mut(&partition.path) {
                        dirs.remove(&target);
                    }
                }
                Err(UnmountError::Busy) => failures.push(UmountFailure {
                    directory: target,
                    busy: true,
                    detail: "target is busy".into(),
                }),
                Err(UnmountError::Other(e)) => failures.push(UmountFailure {
                    directory: target,
                    busy: false,
                    detail: format!("{e:#}"),
                }),
            }
        }
        if records
            .get(&partition.path)
            .is_some_and(|dirs| dirs.is_empty())
        {
            records.remove(&partition.path);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::UmountIncomplete {
                device: partition.path.clone(),
                attempted,
                failures,
            })
        }
    }

    /// Detaches whatever is recorded at exactly this directory, regardless of
    /// the source partition. Only that one record is removed.
    pub fn umount_directory(&self, target: impl AsRef<Path>) -> Result<(), EngineError> {
        let target = target.as_ref();
        let mut records = self.mounts.records();

        let Some(partition) = records
            .iter()
            .find(|(_, dirs)| dirs.contains(target))
            .map(|(partition, _)| partition.clone())
        else {
            return Err(EngineError::NotMounted {
                resource: target.to_path_buf(),
            });
        };

        debug!("Unmounting '{}'", target.display());
        match self.backend.unmount(target) {
            Ok(()) => {}
            Err(UnmountError::Busy) => {
                return Err(EngineError::Busy {
                    resource: target.to_path_buf(),
                })
            }
            Err(UnmountError::Other(e)) => {
                return Err(EngineError::io(
                    format!("failed to unmount '{}'", target.display()),
                    e,
                ))
            }
        }

        if let Some(dirs) = records.get_mut(&partition) {
            dirs.remove(target);
            if dirs.is_empty() {
                records.remove(&partition);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ballast_api::{ErrorKind, FilesystemType};

    use crate::backend::fake::FakeBackend;

    use super::*;

    const EXT4_TYPE: &str = "ext4";

    /// One gpt disk with two formatted partitions (1: ext4, 2: ntfs) and one
    /// unformatted (3).
    fn provisioned_engine() -> (Engine, Arc<FakeBackend>) {
        let fake = Arc::new(FakeBackend::new());
        fake.add_disk("/dev/sda", 2097152);
        let engine = Engine::new(fake.clone());

        let disk = engine.locate_disk("/dev/sda").unwrap();
        engine.label_disk(&disk, "gpt").unwrap();
        let disk = engine.locate_disk("/dev/sda").unwrap();
        engine
            .new_partition(&disk, EXT4_TYPE, Some(FilesystemType::Ext4), 2048, 4096)
            .unwrap();
        engine
            .new_partition(&disk, "ntfs", Some(FilesystemType::Ntfs), 8192, 4096)
            .unwrap();
        engine.new_partition(&disk, EXT4_TYPE, None, 16384, 4096).unwrap();
        (engine, fake)
    }

    fn partition(engine: &Engine, number: u32) -> Partition {
        engine
            .locate_disk("/dev/sda")
            .unwrap()
            .partition(number)
            .unwrap()
            .clone()
    }

    #[test]
    fn test_mount_requires_a_filesystem() {
        let (engine, _) = provisioned_engine();
        let unformatted = partition(&engine, 3);
        let err = engine.mount(&unformatted, "/mnt/t").unwrap_err();
        assert_eq!(
            err,
            EngineError::FilesystemUnsupported {
                device: "/dev/sda3".into()
            }
        );
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_mount_and_duplicate_record() {
        let (engine, fake) = provisioned_engine();
        let root = partition(&engine, 1);

        engine.mount(&root, "/mnt/t").unwrap();
        assert_eq!(fake.mounted_at("/mnt/t"), Some("/dev/sda1".into()));

        // The exact (partition, directory) pair again
        assert_eq!(
            engine.mount(&root, "/mnt/t").unwrap_err(),
            EngineError::AlreadyMounted {
                directory: "/mnt/t".into()
            }
        );

        // A different partition onto the occupied directory
        let other = partition(&engine, 2);
        assert_eq!(
            engine.mount(&other, "/mnt/t").unwrap_err(),
            EngineError::AlreadyMounted {
                directory: "/mnt/t".into()
            }
        );
    }

    #[test]
    fn test_multi_mount_depends_on_the_filesystem() {
        let (engine, fake) = provisioned_engine();

        // ext4 mounts at several directories at once
        let root = partition(&engine, 1);
        engine.mount(&root, "/mnt/a").unwrap();
        engine.mount(&root, "/mnt/b").unwrap();
        assert_eq!(fake.mounted_at("/mnt/b"), Some("/dev/sda1".into()));

        // ntfs does not
        let windows = partition(&engine, 2);
        engine.mount(&windows, "/mnt/c").unwrap();
        assert_eq!(
            engine.mount(&windows, "/mnt/d").unwrap_err(),
            EngineError::MultiMountUnsupported {
                device: "/dev/sda2".into(),
                filesystem: FilesystemType::Ntfs
            }
        );
    }

    #[test]
    fn test_umount_directory_once() {
        let (engine, fake) = provisioned_engine();
        let root = partition(&engine, 1);
        engine.mount(&root, "/mnt/t").unwrap();

        engine.umount_directory("/mnt/t").unwrap();
        assert_eq!(fake.mounted_at("/mnt/t"), None);

        // Records are gone; a repeat call is NotMounted, not a silent success.
        assert_eq!(
            engine.umount_directory("/mnt/t").unwrap_err(),
            EngineError::NotMounted {
                resource: "/mnt/t".into()
            }
        );
    }

    #[test]
    fn test_umount_directory_busy_keeps_the_record() {
        let (engine, fake) = provisioned_engine();
        let root = partition(&engine, 1);
        engine.mount(&root, "/mnt/t").unwrap();

        fake.set_busy("/mnt/t");
        assert_eq!(
            engine.umount_directory("/mnt/t").unwrap_err(),
            EngineError::Busy {
                resource: "/mnt/t".into()
            }
        );

        // Still attached, still recorded; clears once the handle goes away.
        fake.clear_busy("/mnt/t");
        engine.umount_directory("/mnt/t").unwrap();
    }

    #[test]
    fn test_umount_partition_detaches_every_target() {
        let (engine, fake) = provisioned_engine();
        let root = partition(&engine, 1);
        engine.mount(&root, "/mnt/a").unwrap();
        engine.mount(&root, "/mnt/b").unwrap();

        engine.umount_partition(&root).unwrap();
        assert_eq!(fake.mounted_at("/mnt/a"), None);
        assert_eq!(fake.mounted_at("/mnt/b"), None);

        assert_eq!(
            engine.umount_partition(&root).unwrap_err(),
            EngineError::NotMounted {
                resource: "/dev/sda1".into()
            }
        );
    }

    #[test]
    fn test_umount_partition_partial_failure() {
        let (engine, fake) = provisioned_engine();
        let root = partition(&engine, 1);
        engine.mount(&root, "/mnt/a").unwrap();
        engine.mount(&root, "/mnt/b").unwrap();

        fake.set_busy("/mnt/b");
        let err = engine.umount_partition(&root).unwrap_err();
        assert_eq!(
            err,
            EngineError::UmountIncomplete {
                device: "/dev/sda1".into(),
                attempted: 2,
                failures: vec![UmountFailure {
                    directory: "/mnt/b".into(),
                    busy: true,
                    detail: "target is busy".into(),
                }],
            }
        );
        assert_eq!(err.kind(), ErrorKind::Busy);

        // The successful half really detached and its record is gone.
        assert_eq!(fake.mounted_at("/mnt/a"), None);
        assert_eq!(fake.mounted_at("/mnt/b"), Some("/dev/sda1".into()));

        // A retry only touches the surviving record.
        fake.clear_busy("/mnt/b");
        engine.umount_partition(&root).unwrap();
        assert_eq!(fake.mounted_at("/mnt/b"), None);
    }

    #[test]
    fn test_mount_state_is_per_pair_not_per_partition() {
        let (engine, _) = provisioned_engine();
        let root = partition(&engine, 1);
        engine.mount(&root, "/mnt/a").unwrap();
        engine.mount(&root, "/mnt/b").unwrap();

        engine.umount_directory("/mnt/a").unwrap();
        // The other record is untouched.
        assert!(engine.mounts.is_mounted(Path::new("/dev/sda1")));
        assert_eq!(engine.mounted_partitions(), vec![PathBuf::from("/dev/sda1")]);
        engine.umount_directory("/mnt/b").unwrap();
        assert!(!engine.mounts.is_mounted(Path::new("/dev/sda1")));
        assert!(engine.mounted_partitions().is_empty());
    }
}
