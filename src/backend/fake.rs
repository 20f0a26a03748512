use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, bail, Error};

use ballast_api::{block::partition_device_path, FilesystemType, PartitionFlag, TableKind};

use super::{Backend, ProbeReport, ProbedPartition, UnmountError};

/// In-memory stand-in for a machine's disks and mount state. Mutations apply
/// with no validation beyond what the real tools would refuse themselves, so
/// engine-level checks stay observable.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    disks: HashMap<PathBuf, FakeDisk>,
    /// target directory -> mounted source device
    mounts: HashMap<PathBuf, PathBuf>,
    /// directories that refuse to unmount with EBUSY
    busy: HashSet<PathBuf>,
    extractions: Vec<(PathBuf, PathBuf, bool)>,
    fail_extractions: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeDisk {
    pub size_sectors: u64,
    pub model: String,
    pub transport: String,
    pub label: TableKind,
    pub max_partitions: usize,
    /// Insertion order, not table order.
    pub partitions: Vec<FakePartition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakePartition {
    pub number: u32,
    pub start: u64,
    pub end: u64,
    pub type_code: String,
    pub name: Option<String>,
    pub flags: Vec<String>,
    pub filesystem: Option<String>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake backend state poisoned")
    }

    /// Registers a blank (unlabeled) disk.
    pub fn add_disk(&self, path: impl Into<PathBuf>, size_sectors: u64) {
        self.state().disks.insert(
            path.into(),
            FakeDisk {
                size_sectors,
                model: "Fake Block Device".into(),
                transport: "virt".into(),
                label: TableKind::None,
                max_partitions: 0,
                partitions: Vec::new(),
            },
        );
    }

    /// Snapshot of a disk's fake state, for assertions.
    pub fn disk(&self, path: impl AsRef<Path>) -> FakeDisk {
        self.state().disks[path.as_ref()].clone()
    }

    /// Direct access for test setups that need a shape the public operations
    /// would refuse to produce (corrupt tables, metadata tweaks).
    pub fn disk_mut<R>(&self, path: impl AsRef<Path>, f: impl FnOnce(&mut FakeDisk) -> R) -> R {
        let mut state = self.state();
        f(state
            .disks
            .get_mut(path.as_ref())
            .expect("unknown fake disk"))
    }

    pub fn set_busy(&self, dir: impl Into<PathBuf>) {
        self.state().busy.insert(dir.into());
    }

    pub fn clear_busy(&self, dir: impl AsRef<Path>) {
        self.state().busy.remove(dir.as_ref());
    }

    pub fn mounted_at(&self, dir: impl AsRef<Path>) -> Option<PathBuf> {
        self.state().mounts.get(dir.as_ref()).cloned()
    }

    pub fn extractions(&self) -> Vec<(PathBuf, PathBuf, bool)> {
        self.state().extractions.clone()
    }

    pub fn fail_extractions(&self) {
        self.state().fail_extractions = true;
    }
}

impl Backend for FakeBackend {
    fn is_block_device(&self, device: &Path) -> Result<bool, Error> {
        Ok(self.state().disks.contains_key(device))
    }

    fn probe_table(&self, device: &Path) -> Result<ProbeReport, Error> {
        let state = self.state();
        let disk = state
            .disks
            .get(device)
            .ok_or_else(|| anyhow!("no such device '{}'", device.display()))?;
        Ok(ProbeReport {
            size_sectors: disk.size_sectors,
            logical_sector_size: 512,
            physical_sector_size: 512,
            model: disk.model.clone(),
            transport: disk.transport.clone(),
            label: disk.label,
            max_partitions: disk.max_partitions,
            partitions: disk
                .partitions
                .iter()
                .map(|p| ProbedPartition {
                    number: p.number,
                    start: p.start,
                    end: p.end,
                    type_code: p.type_code.clone(),
                    name: p.name.clone(),
                    flags: p.flags.clone(),
                    filesystem: p.filesystem.clone(),
                })
                .collect(),
        })
    }

    fn probe_filesystems(&self, device: &Path) -> Result<HashMap<PathBuf, String>, Error> {
        let state = self.state();
        let disk = state
            .disks
            .get(device)
            .ok_or_else(|| anyhow!("no such device '{}'", device.display()))?;
        Ok(disk
            .partitions
            .iter()
            .filter_map(|p| {
                p.filesystem
                    .clone()
                    .map(|fs| (partition_device_path(device, p.number), fs))
            })
            .collect())
    }

    fn make_label(&self, device: &Path, kind: TableKind) -> Result<(), Error> {
        let mut state = self.state();
        let disk = state
            .disks
            .get_mut(device)
            .ok_or_else(|| anyhow!("no such device '{}'", device.display()))?;
        disk.label = kind;
        disk.max_partitions = match kind {
            TableKind::Gpt => 128,
            TableKind::Msdos => 4,
            TableKind::None => 0,
        };
        disk.partitions.clear();
        Ok(())
    }

    fn make_partition(
        &self,
        device: &Path,
        _kind: TableKind,
        type_code: &str,
        start: u64,
        end: u64,
    ) -> Result<(), Error> {
        let mut state = self.state();
        let disk = state
            .disks
            .get_mut(device)
            .ok_or_else(|| anyhow!("no such device '{}'", device.display()))?;
        if disk.label == TableKind::None {
            bail!("unrecognised disk label on '{}'", device.display());
        }
        // The table hands out the lowest free number, like parted does.
        let number = (1..)
            .find(|n| disk.partitions.iter().all(|p| p.number != *n))
            .unwrap();
        disk.partitions.push(FakePartition {
            number,
            start,
            end,
            type_code: type_code.into(),
            name: None,
            flags: Vec::new(),
            filesystem: None,
        });
        Ok(())
    }

    fn remove_partition(&self, device: &Path, number: u32) -> Result<(), Error> {
        self.with_partition(device, number, |disk, index| {
            disk.partitions.remove(index);
        })
    }

    fn resize_partition(&self, device: &Path, number: u32, new_end: u64) -> Result<(), Error> {
        self.with_partition(device, number, |disk, index| {
            disk.partitions[index].end = new_end;
        })
    }

    fn name_partition(&self, device: &Path, number: u32, name: &str) -> Result<(), Error> {
        let name = name.to_owned();
        self.with_partition(device, number, move |disk, index| {
            disk.partitions[index].name = Some(name);
        })
    }

    fn set_partition_flag(
        &self,
        device: &Path,
        number: u32,
        flag: PartitionFlag,
        enabled: bool,
    ) -> Result<(), Error> {
        self.with_partition(device, number, |disk, index| {
            let flags = &mut disk.partitions[index].flags;
            flags.retain(|f| f != flag.name());
            if enabled {
                flags.push(flag.name().into());
            }
        })
    }

    fn make_filesystem(&self, device: &Path, filesystem: FilesystemType) -> Result<(), Error> {
        let mut state = self.state();
        for (disk_path, disk) in state.disks.iter_mut() {
            for partition in disk.partitions.iter_mut() {
                if partition_device_path(disk_path, partition.number) == device {
                    partition.filesystem = Some(filesystem.name().into());
                    return Ok(());
                }
            }
        }
        bail!("no such partition '{}'", device.display());
    }

    fn settle(&self, _device: &Path) -> Result<(), Error> {
        Ok(())
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        _filesystem: FilesystemType,
    ) -> Result<(), Error> {
        let mut state = self.state();
        if state.mounts.contains_key(target) {
            bail!("'{}' is already a mount point", target.display());
        }
        state.mounts.insert(target.into(), source.into());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), UnmountError> {
        let mut state = self.state();
        if state.busy.contains(target) {
            return Err(UnmountError::Busy);
        }
        if state.mounts.remove(target).is_none() {
            return Err(UnmountError::Other(anyhow!(
                "'{}' is not mounted",
                target.display()
            )));
        }
        Ok(())
    }

    fn extract_image(&self, image: &Path, target: &Path, force: bool) -> Result<(), Error> {
        let mut state = self.state();
        if state.fail_extractions {
            bail!("unsquashfs exited with status 1");
        }
        state.extractions.push((image.into(), target.into(), force));
        Ok(())
    }
}

impl FakeBackend {
    fn with_partition(
        &self,
        device: &Path,
        number: u32,
        f: impl FnOnce(&mut FakeDisk, usize),
    ) -> Result<(), Error> {
        let mut state = self.state();
        let disk = state
            .disks
            .get_mut(device)
            .ok_or_else(|| anyhow!("no such device '{}'", device.display()))?;
        let index = disk
            .partitions
            .iter()
            .position(|p| p.number == number)
            .ok_or_else(|| {
                anyhow!("no partition {} on '{}'", number, device.display())
            })?;
        f(disk, index);
        Ok(())
    }
}
