use std::path::Path;

use log::warn;

use ballast_api::{
    block::partition_device_path, Disk, EngineError, Partition, TableKind,
};

use crate::{backend::Backend, Engine};

impl Engine {
    /// Resolves a device node and probes its partition table, returning an
    /// independent point-in-time snapshot.
    ///
    /// An absent table is a valid result (label "none", zero partitions); an
    /// unreadable or self-contradictory one is `ProbeFailed`. Snapshots are
    /// never cached: two concurrent callers each get their own probe, and a
    /// snapshot taken before a table edit simply goes stale.
    pub fn locate_disk(&self, device: impl AsRef<Path>) -> Result<Disk, EngineError> {
        locate(self.backend.as_ref(), device.as_ref())
    }
}

pub(crate) fn locate(backend: &dyn Backend, device: &Path) -> Result<Disk, EngineError> {
    let is_block = backend
        .is_block_device(device)
        .map_err(|e| EngineError::io(format!("failed to inspect '{}'", device.display()), e))?;
    if !is_block {
        return Err(EngineError::DeviceNotFound {
            device: device.to_path_buf(),
        });
    }

    let report = backend
        .probe_table(device)
        .map_err(|e| EngineError::ProbeFailed {
            device: device.to_path_buf(),
            detail: format!("{e:#}"),
        })?;

    // Filesystem detection is best-effort metadata; a failure leaves the
    // partitions reported as unformatted rather than failing the probe.
    let detected = match backend.probe_filesystems(device) {
        Ok(detected) => detected,
        Err(e) => {
            warn!(
                "Filesystem detection failed for '{}': {e:#}",
                device.display()
            );
            Default::default()
        }
    };

    let mut partitions: Vec<Partition> = report
        .partitions
        .into_iter()
        .map(|probed| {
            let path = partition_device_path(device, probed.number);
            let filesystem = detected
                .get(&path)
                .or(probed.filesystem.as_ref())
                .and_then(|raw| raw.parse().ok());
            Partition {
                path,
                number: probed.number,
                start: probed.start,
                end: probed.end,
                type_code: probed.type_code,
                name: probed.name,
                flags: probed.flags,
                filesystem,
            }
        })
        .collect();
    partitions.sort_by_key(|p| p.number);

    let disk = Disk {
        path: device.to_path_buf(),
        size_sectors: report.size_sectors,
        logical_sector_size: report.logical_sector_size,
        physical_sector_size: report.physical_sector_size,
        model: report.model,
        transport: report.transport,
        label: report.label,
        max_partitions: report.max_partitions,
        partitions,
    };

    if let Err(detail) = validate(&disk) {
        return Err(EngineError::ProbeFailed {
            device: device.to_path_buf(),
            detail,
        });
    }

    Ok(disk)
}

/// Rejects snapshots that violate the table invariants: unique numbers,
/// extents inside the disk, pairwise non-overlapping, count within the
/// table's capacity.
fn validate(disk: &Disk) -> Result<(), String> {
    for pair in disk.partitions.windows(2) {
        if pair[0].number == pair[1].number {
            return Err(format!("duplicate partition number {}", pair[0].number));
        }
    }

    for partition in &disk.partitions {
        if partition.start >= partition.end || partition.end > disk.size_sectors {
            return Err(format!(
                "partition {} extent {}..{} is outside the disk ({} sectors)",
                partition.number, partition.start, partition.end, disk.size_sectors
            ));
        }
    }

    let mut by_start: Vec<&Partition> = disk.partitions.iter().collect();
    by_start.sort_by_key(|p| p.start);
    for pair in by_start.windows(2) {
        if pair[0].extent().overlaps(&pair[1].extent()) {
            return Err(format!(
                "partitions {} and {} overlap",
                pair[0].number, pair[1].number
            ));
        }
    }

    if disk.max_partitions > 0 && disk.partitions.len() > disk.max_partitions {
        return Err(format!(
            "{} table entries exceed the {}-entry maximum",
            disk.partitions.len(),
            disk.max_partitions
        ));
    }

    if disk.label == TableKind::None && !disk.partitions.is_empty() {
        return Err("partitions reported without a partition table".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use ballast_api::FilesystemType;

    use crate::backend::fake::{FakeBackend, FakePartition};

    use super::*;

    fn engine_with(fake: FakeBackend) -> (Engine, Arc<FakeBackend>) {
        let backend = Arc::new(fake);
        (Engine::new(backend.clone()), backend)
    }

    fn raw_partition(number: u32, start: u64, end: u64) -> FakePartition {
        FakePartition {
            number,
            start,
            end,
            type_code: "0fc63daf-8483-4772-8e79-3d69d8477de4".into(),
            name: None,
            flags: Vec::new(),
            filesystem: None,
        }
    }

    #[test]
    fn test_missing_device() {
        let (engine, _) = engine_with(FakeBackend::new());
        assert_eq!(
            engine.locate_disk("/dev/sdz").unwrap_err(),
            EngineError::DeviceNotFound {
                device: "/dev/sdz".into()
            }
        );
    }

    #[test]
    fn test_blank_disk_probes_as_unlabeled() {
        let fake = FakeBackend::new();
        fake.add_disk("/dev/sda", 20480);
        let (engine, _) = engine_with(fake);

        let disk = engine.locate_disk("/dev/sda").unwrap();
        assert_eq!(disk.label, TableKind::None);
        assert_eq!(disk.max_partitions, 0);
        assert!(disk.partitions.is_empty());
        assert_eq!(disk.size_sectors, 20480);
    }

    #[test]
    fn test_missing_metadata_is_sentinel_not_error() {
        let fake = FakeBackend::new();
        fake.add_disk("/dev/sda", 20480);
        fake.disk_mut("/dev/sda", |disk| {
            disk.model = String::new();
            disk.transport = String::new();
        });
        let (engine, _) = engine_with(fake);

        let disk = engine.locate_disk("/dev/sda").unwrap();
        assert_eq!(disk.model, "");
        assert_eq!(disk.transport, "");
    }

    #[test]
    fn test_partitions_are_sorted_and_fs_detected() {
        let fake = FakeBackend::new();
        fake.add_disk("/dev/sda", 20480);
        fake.disk_mut("/dev/sda", |disk| {
            disk.label = TableKind::Gpt;
            disk.max_partitions = 128;
            disk.partitions = vec![
                FakePartition {
                    filesystem: Some("ext4".into()),
                    ..raw_partition(3, 8192, 10240)
                },
                FakePartition {
                    filesystem: Some("myfs".into()),
                    ..raw_partition(1, 2048, 4096)
                },
                raw_partition(2, 4096, 8192),
            ];
        });
        let (engine, _) = engine_with(fake);

        let disk = engine.locate_disk("/dev/sda").unwrap();
        let numbers: Vec<u32> = disk.partitions.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        assert_eq!(disk.partitions[0].path, PathBuf::from("/dev/sda1"));
        // Unrecognized filesystem strings surface as "no filesystem".
        assert_eq!(disk.partitions[0].filesystem, None);
        assert_eq!(disk.partitions[1].filesystem, None);
        assert_eq!(disk.partitions[2].filesystem, Some(FilesystemType::Ext4));
    }

    #[test]
    fn test_corrupt_tables_fail_the_probe() {
        let corrupt_shapes: Vec<Vec<FakePartition>> = vec![
            // overlapping extents
            vec![raw_partition(1, 2048, 8192), raw_partition(2, 4096, 10240)],
            // duplicate numbers
            vec![raw_partition(1, 2048, 4096), raw_partition(1, 4096, 8192)],
            // extent past the end of the disk
            vec![raw_partition(1, 2048, 999999)],
            // inverted extent
            vec![raw_partition(1, 4096, 2048)],
        ];

        for partitions in corrupt_shapes {
            let fake = FakeBackend::new();
            fake.add_disk("/dev/sda", 20480);
            fake.disk_mut("/dev/sda", |disk| {
                disk.label = TableKind::Gpt;
                disk.max_partitions = 128;
                disk.partitions = partitions.clone();
            });
            let (engine, _) = engine_with(fake);

            assert!(
                matches!(
                    engine.locate_disk("/dev/sda"),
                    Err(EngineError::ProbeFailed { .. })
                ),
                "shape {partitions:?} should fail the probe"
            );
        }
    }
}
