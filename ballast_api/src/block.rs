use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use crate::filesystems::FilesystemType;

/// Partition table type carried by a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    #[strum(serialize = "gpt")]
    Gpt,

    /// Master Boot Record
    #[strum(serialize = "msdos", serialize = "dos")]
    Msdos,

    /// No recognizable partition table. Not a valid target for `mklabel`.
    #[strum(disabled)]
    None,
}

impl TableKind {
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Gpt => "gpt",
            TableKind::Msdos => "msdos",
            TableKind::None => "none",
        }
    }

    /// Whether table entries carry a human-readable name field.
    pub fn supports_names(self) -> bool {
        self == TableKind::Gpt
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Contiguous range on a block device, in logical sectors. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub start: u64,
    pub end: u64,
}

impl Extent {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Point-in-time snapshot of one partition table entry.
///
/// Snapshots are never updated in place; any table mutation invalidates them
/// and callers re-probe the disk to observe effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Partition device path, e.g. `/dev/sda3`.
    pub path: PathBuf,

    /// Number in the partition table, unique per disk but not necessarily
    /// contiguous after deletions.
    pub number: u32,

    /// First sector of the extent.
    pub start: u64,

    /// One past the last sector of the extent.
    pub end: u64,

    /// Table-level type code: the GPT type GUID or the MBR type id.
    pub type_code: String,

    /// Table-level name, on tables that carry one.
    pub name: Option<String>,

    /// Table-level flags, in the external tool's vocabulary.
    pub flags: Vec<String>,

    /// Detected filesystem; `None` if unformatted or unrecognized.
    pub filesystem: Option<FilesystemType>,
}

impl Partition {
    pub fn extent(&self) -> Extent {
        Extent {
            start: self.start,
            end: self.end,
        }
    }

    pub fn size_sectors(&self) -> u64 {
        self.extent().len()
    }

    /// Path of the disk this partition lives on, derived from the partition
    /// device name (`/dev/sda3` -> `/dev/sda`, `/dev/nvme0n1p2` -> `/dev/nvme0n1`).
    pub fn disk_path(&self) -> PathBuf {
        parent_disk_path(&self.path)
    }
}

/// Point-in-time snapshot of a disk and its partition table, sorted by
/// partition number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Disk device path, e.g. `/dev/sda`.
    pub path: PathBuf,

    /// Disk size in logical sectors.
    pub size_sectors: u64,

    /// Logical sector size in bytes.
    pub logical_sector_size: u64,

    /// Physical sector size in bytes.
    pub physical_sector_size: u64,

    /// Hardware model string; empty when the device does not report one.
    pub model: String,

    /// Transport (sata, nvme, virtblk, ...); empty when unknown.
    pub transport: String,

    /// Partition table type.
    pub label: TableKind,

    /// Maximum number of table entries; 0 when there is no table.
    pub max_partitions: usize,

    /// Partitions in table order (sorted by number).
    pub partitions: Vec<Partition>,
}

impl Disk {
    /// Looks up a partition by its table number. Numbers need not match the
    /// position in `partitions` once entries have been deleted.
    pub fn partition(&self, number: u32) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.number == number)
    }

    /// Unallocated extents: the gaps between partitions and the tail after
    /// the last one. The reserved area before the first partition is not
    /// reported.
    pub fn free_extents(&self) -> Vec<Extent> {
        let mut by_start: Vec<&Partition> = self.partitions.iter().collect();
        by_start.sort_by_key(|p| p.start);

        let mut free = Vec::new();
        for pair in by_start.windows(2) {
            if pair[0].end < pair[1].start {
                free.push(Extent {
                    start: pair[0].end,
                    end: pair[1].start,
                });
            }
        }
        if let Some(last) = by_start.last() {
            if last.end < self.size_sectors {
                free.push(Extent {
                    start: last.end,
                    end: self.size_sectors,
                });
            }
        }
        free
    }
}

/// Inverse of `partition_device_path`: strips the partition suffix from a
/// partition device name.
pub fn parent_disk_path(partition: &Path) -> PathBuf {
    let raw = partition.to_string_lossy();
    let trimmed = raw.trim_end_matches(|c: char| c.is_ascii_digit());
    let trimmed = match trimmed.strip_suffix('p') {
        Some(prefix) if prefix.ends_with(|c: char| c.is_ascii_digit()) => prefix,
        _ => trimmed,
    };
    PathBuf::from(trimmed)
}

/// Derives the device path of partition `number` on `disk`, mirroring the
/// kernel's naming: a `p` separator is inserted when the disk name ends in a
/// digit (`/dev/nvme0n1` -> `/dev/nvme0n1p2`).
pub fn partition_device_path(disk: &Path, number: u32) -> PathBuf {
    let raw = disk.to_string_lossy();
    if raw.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{raw}p{number}"))
    } else {
        PathBuf::from(format!("{raw}{number}"))
    }
}
