use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};
use serde::{de, Deserialize, Deserializer};

use ballast_api::{PartitionFlag, TableKind};

use crate::{dependencies::Dependency, exe::RunAndCheck};

#[derive(Debug, PartialEq, Deserialize)]
struct PartedOutput {
    disk: Device,
}

/// One probed disk, as reported by `parted --json <dev> unit s print`.
///
/// All offsets are logical sectors. `end` fields keep parted's inclusive
/// convention; consumers wanting half-open extents add one.
#[derive(Debug, PartialEq, Deserialize)]
pub struct Device {
    /// Disk device path
    pub path: PathBuf,

    /// Disk size in sectors
    #[serde(deserialize_with = "sectors")]
    pub size: u64,

    /// Hardware model, when the transport reports one
    #[serde(default)]
    pub model: Option<String>,

    /// Transport (sata, nvme, virtblk, ...)
    #[serde(default)]
    pub transport: Option<String>,

    #[serde(rename = "logical-sector-size", default = "Device::default_sector_size")]
    pub logical_sector_size: u64,

    #[serde(rename = "physical-sector-size", default = "Device::default_sector_size")]
    pub physical_sector_size: u64,

    /// Partition table type; "unknown" on an unpartitioned disk
    #[serde(default)]
    pub label: Option<String>,

    /// Maximum number of table entries
    #[serde(rename = "max-partitions", default)]
    pub max_partitions: Option<usize>,

    /// Table entries, in whatever order parted printed them
    #[serde(default)]
    pub partitions: Vec<PartitionEntry>,
}

impl Device {
    fn default_sector_size() -> u64 {
        512
    }

    pub fn table_kind(&self) -> TableKind {
        match self.label.as_deref() {
            Some("gpt") => TableKind::Gpt,
            Some("msdos") | Some("dos") => TableKind::Msdos,
            _ => TableKind::None,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct PartitionEntry {
    /// Number in the partition table
    pub number: u32,

    /// First sector
    #[serde(deserialize_with = "sectors")]
    pub start: u64,

    /// Last sector, inclusive
    #[serde(deserialize_with = "sectors")]
    pub end: u64,

    /// Extent length in sectors
    #[serde(deserialize_with = "sectors")]
    pub size: u64,

    /// msdos partition role (primary/logical/extended)
    #[serde(rename = "type", default)]
    pub part_type: Option<String>,

    /// MBR type id, e.g. "0x83"
    #[serde(rename = "type-id", default)]
    pub type_id: Option<String>,

    /// GPT type GUID
    #[serde(rename = "type-uuid", default)]
    pub type_uuid: Option<String>,

    /// Table-level name (GPT)
    #[serde(default)]
    pub name: Option<String>,

    /// Filesystem as recognized by libparted, if any
    #[serde(default)]
    pub filesystem: Option<String>,

    #[serde(default)]
    pub flags: Vec<String>,
}

impl PartitionEntry {
    /// Table-level type code: the GPT type GUID, or the MBR type id, or the
    /// partition role as a last resort.
    pub fn type_code(&self) -> String {
        self.type_uuid
            .clone()
            .or_else(|| self.type_id.clone())
            .or_else(|| self.part_type.clone())
            .unwrap_or_default()
    }
}

fn sectors<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_sectors(&raw).map_err(de::Error::custom)
}

fn parse_sectors(raw: &str) -> Result<u64, String> {
    raw.strip_suffix('s')
        .ok_or_else(|| format!("expected a sector count ending in 's', got '{raw}'"))?
        .parse()
        .map_err(|e| format!("bad sector count '{raw}': {e}"))
}

/// Probes a device's partition table.
///
/// On a disk without a recognizable label parted exits non-zero while still
/// printing the JSON document, so the exit status alone is not treated as
/// fatal: the result is a `Device` with an "unknown" label and no partitions.
pub fn probe(device: &Path) -> Result<Device, Error> {
    let output = Dependency::Parted
        .cmd()
        .arg("--script")
        .arg("--json")
        .arg(device)
        .args(["unit", "s", "print"])
        .try_output()
        .context(format!("Failed to probe '{}'", device.display()))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.trim().is_empty() {
        bail!(
            "parted produced no output for '{}': {}",
            device.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    parse_probe_output(&stdout).context(format!(
        "Failed to parse parted output for '{}'",
        device.display()
    ))
}

fn parse_probe_output(output: &str) -> Result<Device, Error> {
    Ok(serde_json::from_str::<PartedOutput>(output)?.disk)
}

pub fn mklabel(device: &Path, kind: TableKind) -> Result<(), Error> {
    Dependency::Parted
        .cmd()
        .arg("--script")
        .arg(device)
        .arg("mklabel")
        .arg(kind.name())
        .run_and_check()
        .context(format!(
            "Failed to write a {} label on '{}'",
            kind,
            device.display()
        ))
}

/// Appends a table entry covering `[start, end_inclusive]`. The `type_code`
/// travels as parted's fs-type argument; on msdos the entry is created as a
/// primary partition.
pub fn mkpart(
    device: &Path,
    kind: TableKind,
    type_code: &str,
    start: u64,
    end_inclusive: u64,
) -> Result<(), Error> {
    let mut cmd = Dependency::Parted.cmd();
    cmd.arg("--script")
        .arg(device)
        .args(["unit", "s", "mkpart"]);
    match kind {
        TableKind::Msdos => {
            cmd.arg("primary");
        }
        // On gpt the first operand is the partition name; entries start
        // nameless and are named through `name_entry`.
        _ => {
            cmd.arg("");
        }
    }
    if !type_code.is_empty() {
        cmd.arg(type_code);
    }
    cmd.arg(start.to_string())
        .arg(end_inclusive.to_string())
        .run_and_check()
        .context(format!(
            "Failed to create partition at sector {} on '{}'",
            start,
            device.display()
        ))
}

pub fn rm(device: &Path, number: u32) -> Result<(), Error> {
    Dependency::Parted
        .cmd()
        .arg("--script")
        .arg(device)
        .arg("rm")
        .arg(number.to_string())
        .run_and_check()
        .context(format!(
            "Failed to delete partition {} on '{}'",
            number,
            device.display()
        ))
}

pub fn resizepart(device: &Path, number: u32, end_inclusive: u64) -> Result<(), Error> {
    Dependency::Parted
        .cmd()
        .arg("--script")
        .arg(device)
        .args(["unit", "s", "resizepart"])
        .arg(number.to_string())
        .arg(end_inclusive.to_string())
        .run_and_check()
        .context(format!(
            "Failed to resize partition {} on '{}'",
            number,
            device.display()
        ))
}

pub fn name_entry(device: &Path, number: u32, name: &str) -> Result<(), Error> {
    Dependency::Parted
        .cmd()
        .arg("--script")
        .arg(device)
        .arg("name")
        .arg(number.to_string())
        .arg(name)
        .run_and_check()
        .context(format!(
            "Failed to name partition {} on '{}'",
            number,
            device.display()
        ))
}

pub fn set_flag(
    device: &Path,
    number: u32,
    flag: PartitionFlag,
    enabled: bool,
) -> Result<(), Error> {
    Dependency::Parted
        .cmd()
        .arg("--script")
        .arg(device)
        .arg("set")
        .arg(number.to_string())
        .arg(flag.name())
        .arg(if enabled { "on" } else { "off" })
        .run_and_check()
        .context(format!(
            "Failed to set flag '{}' on partition {} of '{}'",
            flag,
            number,
            device.display()
        ))
}

/// Asks the kernel to re-read the partition table after an edit.
pub fn rescan(device: &Path) -> Result<(), Error> {
    Dependency::Partprobe
        .cmd()
        .arg(device)
        .run_and_check()
        .context(format!(
            "Failed to re-read the partition table of '{}'",
            device.display()
        ))
}
