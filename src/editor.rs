use log::debug;

use ballast_api::{
    Disk, EngineError, Extent, FilesystemType, Partition, PartitionFlag, TableKind,
};

use crate::{inventory, Engine};

/// Partition table edits.
///
/// Every operation is serialized per disk path in strict arrival order, since
/// interleaved invocations of the external tooling corrupt table state. The
/// `Busy` checks read the mount records before the per-disk lock is taken;
/// that lock order is fixed and must never be reversed.
///
/// Effects are observable only through a fresh `locate_disk`; caller-held
/// snapshots are never updated in place.
impl Engine {
    /// Writes a new partition table of the given type, destroying all
    /// existing entries.
    pub fn label_disk(&self, disk: &Disk, label: &str) -> Result<(), EngineError> {
        let kind: TableKind = label.parse().map_err(|_| EngineError::UnsupportedLabel {
            label: label.to_owned(),
        })?;

        if let Some(mounted) = self.mounts.first_on_disk(&disk.path) {
            return Err(EngineError::Busy { resource: mounted });
        }

        let lock = self.disk_locks.get(&disk.path);
        let _guard = lock.lock();
        debug!("Writing a {kind} label on '{}'", disk.path.display());
        self.backend
            .make_label(&disk.path, kind)
            .map_err(|e| EngineError::io(format!("failed to label '{}'", disk.path.display()), e))?;
        self.settle(disk)
    }

    /// Appends a partition covering `size` sectors from `start`. The
    /// `type_code` travels to the table tool in its fs-type vocabulary
    /// ("ext4", "linux-swap", ...); the type code a later probe reports is
    /// whatever the table derived from it. The table assigns the resulting
    /// partition number; callers re-probe to see it. When `filesystem` is
    /// given, it is created on the new partition.
    pub fn new_partition(
        &self,
        disk: &Disk,
        type_code: &str,
        filesystem: Option<FilesystemType>,
        start: u64,
        size: u64,
    ) -> Result<(), EngineError> {
        let lock = self.disk_locks.get(&disk.path);
        let _guard = lock.lock();

        // Validate against the live table, not the caller's snapshot.
        let fresh = inventory::locate(self.backend.as_ref(), &disk.path)?;

        if fresh.max_partitions > 0 && fresh.partitions.len() >= fresh.max_partitions {
            return Err(EngineError::TableFull {
                device: disk.path.clone(),
                max_partitions: fresh.max_partitions,
            });
        }

        let end = start.saturating_add(size);
        let extent = Extent { start, end };
        if size == 0 || end > fresh.size_sectors {
            return Err(EngineError::OutOfSpace {
                device: disk.path.clone(),
                detail: format!(
                    "extent {}..{} does not fit a {}-sector disk",
                    start, end, fresh.size_sectors
                ),
            });
        }
        if let Some(existing) = fresh.partitions.iter().find(|p| p.extent().overlaps(&extent)) {
            return Err(EngineError::OutOfSpace {
                device: disk.path.clone(),
                detail: format!(
                    "extent {}..{} overlaps partition {} ({}..{})",
                    start, end, existing.number, existing.start, existing.end
                ),
            });
        }

        debug!(
            "Creating a partition at {}..{} on '{}'",
            start,
            end,
            disk.path.display()
        );
        self.backend
            .make_partition(&disk.path, fresh.label, type_code, start, end)
            .map_err(|e| {
                EngineError::io(
                    format!("failed to create a partition on '{}'", disk.path.display()),
                    e,
                )
            })?;
        self.settle(disk)?;

        if let Some(filesystem) = filesystem {
            // The table picked the number; find the new entry by its extent.
            let after = inventory::locate(self.backend.as_ref(), &disk.path)?;
            let created = after
                .partitions
                .iter()
                .find(|p| p.start == start)
                .ok_or_else(|| EngineError::Io {
                    context: format!(
                        "created partition at sector {} not visible on '{}' after rescan",
                        start,
                        disk.path.display()
                    ),
                })?;
            self.backend
                .make_filesystem(&created.path, filesystem)
                .map_err(|e| {
                    EngineError::io(
                        format!("failed to format '{}'", created.path.display()),
                        e,
                    )
                })?;
        }

        Ok(())
    }

    /// Deletes the table entry. Removal never implicitly unmounts: a
    /// partition with any active mount record is `Busy`.
    pub fn remove_partition(&self, partition: &Partition) -> Result<(), EngineError> {
        if self.mounts.is_mounted(&partition.path) {
            return Err(EngineError::Busy {
                resource: partition.path.clone(),
            });
        }

        let disk_path = partition.disk_path();
        let lock = self.disk_locks.get(&disk_path);
        let _guard = lock.lock();
        debug!("Deleting partition '{}'", partition.path.display());
        self.backend
            .remove_partition(&disk_path, partition.number)
            .map_err(|e| {
                EngineError::io(
                    format!("failed to delete '{}'", partition.path.display()),
                    e,
                )
            })?;
        self.backend
            .settle(&disk_path)
            .map_err(|e| EngineError::io("failed to settle after a table edit", e))
    }

    /// Grows or shrinks the extent to the absolute `new_end` (exclusive,
    /// sectors). There is no live resize: a mounted partition is `Busy`.
    pub fn resize_partition(&self, partition: &Partition, new_end: u64) -> Result<(), EngineError> {
        if self.mounts.is_mounted(&partition.path) {
            return Err(EngineError::Busy {
                resource: partition.path.clone(),
            });
        }

        let disk_path = partition.disk_path();
        let lock = self.disk_locks.get(&disk_path);
        let _guard = lock.lock();

        let fresh = inventory::locate(self.backend.as_ref(), &disk_path)?;
        let current = fresh
            .partition(partition.number)
            .ok_or_else(|| EngineError::DeviceNotFound {
                device: partition.path.clone(),
            })?;

        if new_end <= current.start || new_end > fresh.size_sectors {
            return Err(EngineError::OutOfSpace {
                device: disk_path.clone(),
                detail: format!(
                    "new end {} is outside {}..{}",
                    new_end, current.start, fresh.size_sectors
                ),
            });
        }
        let following = fresh
            .partitions
            .iter()
            .filter(|p| p.number != current.number && p.start >= current.start)
            .min_by_key(|p| p.start);
        if let Some(next) = following {
            if new_end > next.start {
                return Err(EngineError::OutOfSpace {
                    device: disk_path.clone(),
                    detail: format!(
                        "new end {} reaches into partition {} (starts at {})",
                        new_end, next.number, next.start
                    ),
                });
            }
        }

        debug!(
            "Resizing '{}' to end at sector {}",
            partition.path.display(),
            new_end
        );
        self.backend
            .resize_partition(&disk_path, partition.number, new_end)
            .map_err(|e| {
                EngineError::io(
                    format!("failed to resize '{}'", partition.path.display()),
                    e,
                )
            })?;
        self.backend
            .settle(&disk_path)
            .map_err(|e| EngineError::io("failed to settle after a table edit", e))
    }

    /// Sets the table-level name. Only tables that carry names support this.
    pub fn name_partition(&self, partition: &Partition, name: &str) -> Result<(), EngineError> {
        let disk_path = partition.disk_path();
        let lock = self.disk_locks.get(&disk_path);
        let _guard = lock.lock();

        let fresh = inventory::locate(self.backend.as_ref(), &disk_path)?;
        if !fresh.label.supports_names() {
            return Err(EngineError::NamesUnsupported { label: fresh.label });
        }

        self.backend
            .name_partition(&disk_path, partition.number, name)
            .map_err(|e| {
                EngineError::io(
                    format!("failed to name '{}'", partition.path.display()),
                    e,
                )
            })
    }

    /// Toggles a table-level flag. The flag name is validated against the
    /// table type's known set.
    pub fn set_partition_flag(
        &self,
        partition: &Partition,
        flag: &str,
        enabled: bool,
    ) -> Result<(), EngineError> {
        let disk_path = partition.disk_path();
        let lock = self.disk_locks.get(&disk_path);
        let _guard = lock.lock();

        let fresh = inventory::locate(self.backend.as_ref(), &disk_path)?;
        let parsed: PartitionFlag = flag.parse().map_err(|_| EngineError::UnknownFlag {
            flag: flag.to_owned(),
            label: fresh.label,
        })?;
        if !parsed.valid_for(fresh.label) {
            return Err(EngineError::UnknownFlag {
                flag: flag.to_owned(),
                label: fresh.label,
            });
        }

        self.backend
            .set_partition_flag(&disk_path, partition.number, parsed, enabled)
            .map_err(|e| {
                EngineError::io(
                    format!(
                        "failed to set flag '{}' on '{}'",
                        flag,
                        partition.path.display()
                    ),
                    e,
                )
            })
    }

    fn settle(&self, disk: &Disk) -> Result<(), EngineError> {
        self.backend
            .settle(&disk.path)
            .map_err(|e| EngineError::io("failed to settle after a table edit", e))
    }
}
