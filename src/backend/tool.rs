use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Error;

use ballast_api::{FilesystemType, PartitionFlag, TableKind};
use osutils::{
    block_devices, dependencies::Dependency, lsblk, mkfs, mount, parted, udevadm, unsquashfs,
};

use super::{Backend, ProbeReport, ProbedPartition, UnmountError};

/// Production backend driving the system tool-set. Construction verifies the
/// required binaries are present, so a misconfigured host fails at engine
/// init instead of mid-edit.
pub struct ToolBackend {
    _priv: (),
}

impl ToolBackend {
    const REQUIRED: [Dependency; 4] = [
        Dependency::Parted,
        Dependency::Partprobe,
        Dependency::Lsblk,
        Dependency::Udevadm,
    ];

    pub fn new() -> Result<Self, Error> {
        for dependency in Self::REQUIRED {
            dependency.ensure()?;
        }
        Ok(Self { _priv: () })
    }
}

impl Backend for ToolBackend {
    fn is_block_device(&self, device: &Path) -> Result<bool, Error> {
        block_devices::is_block_device(device)
    }

    fn probe_table(&self, device: &Path) -> Result<ProbeReport, Error> {
        let probed = parted::probe(device)?;
        let label = probed.table_kind();
        Ok(ProbeReport {
            size_sectors: probed.size,
            logical_sector_size: probed.logical_sector_size,
            physical_sector_size: probed.physical_sector_size,
            model: probed.model.unwrap_or_default(),
            transport: probed.transport.unwrap_or_default(),
            label,
            max_partitions: probed.max_partitions.unwrap_or_default(),
            partitions: probed
                .partitions
                .iter()
                .map(|entry| ProbedPartition {
                    number: entry.number,
                    start: entry.start,
                    // parted reports inclusive ends
                    end: entry.end + 1,
                    type_code: entry.type_code(),
                    name: entry.name.clone(),
                    flags: entry.flags.clone(),
                    filesystem: entry.filesystem.clone(),
                })
                .collect(),
        })
    }

    fn probe_filesystems(&self, device: &Path) -> Result<HashMap<PathBuf, String>, Error> {
        lsblk::filesystems(device)
    }

    fn make_label(&self, device: &Path, kind: TableKind) -> Result<(), Error> {
        parted::mklabel(device, kind)
    }

    fn make_partition(
        &self,
        device: &Path,
        kind: TableKind,
        type_code: &str,
        start: u64,
        end: u64,
    ) -> Result<(), Error> {
        parted::mkpart(device, kind, type_code, start, end - 1)
    }

    fn remove_partition(&self, device: &Path, number: u32) -> Result<(), Error> {
        parted::rm(device, number)
    }

    fn resize_partition(&self, device: &Path, number: u32, new_end: u64) -> Result<(), Error> {
        parted::resizepart(device, number, new_end - 1)
    }

    fn name_partition(&self, device: &Path, number: u32, name: &str) -> Result<(), Error> {
        parted::name_entry(device, number, name)
    }

    fn set_partition_flag(
        &self,
        device: &Path,
        number: u32,
        flag: PartitionFlag,
        enabled: bool,
    ) -> Result<(), Error> {
        parted::set_flag(device, number, flag, enabled)
    }

    fn make_filesystem(&self, device: &Path, filesystem: FilesystemType) -> Result<(), Error> {
        mkfs::run(device, filesystem)
    }

    fn settle(&self, device: &Path) -> Result<(), Error> {
        parted::rescan(device)?;
        udevadm::settle()
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        filesystem: FilesystemType,
    ) -> Result<(), Error> {
        mount::mount(source, target, filesystem)
    }

    fn unmount(&self, target: &Path) -> Result<(), UnmountError> {
        mount::unmount(target)
    }

    fn extract_image(&self, image: &Path, target: &Path, force: bool) -> Result<(), Error> {
        unsquashfs::extract(image, target, force)
    }
}
