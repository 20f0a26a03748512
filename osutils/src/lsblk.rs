use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::warn;
use serde::Deserialize;

use crate::{dependencies::Dependency, exe::RunAndCheck};

#[derive(Debug, Default, PartialEq, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<Entry>,
}

#[derive(Debug, PartialEq, Deserialize)]
struct Entry {
    path: PathBuf,
    fstype: Option<String>,
    #[serde(default)]
    children: Option<Vec<Entry>>,
}

/// Maps every node under `device` (the disk itself included) to its detected
/// filesystem. Nodes without one are absent from the map.
pub fn filesystems(device: &Path) -> Result<HashMap<PathBuf, String>, Error> {
    let result = Dependency::Lsblk
        .cmd()
        .arg("--json")
        .arg("--paths")
        .args(["--output", "PATH,FSTYPE"])
        .arg(device)
        .output_and_check()
        .context(format!(
            "Failed to list filesystems under '{}'",
            device.display()
        ))?;

    let parsed = parse_lsblk_output(&result);
    if parsed.is_err() {
        warn!("lsblk output: {result}");
    }

    parsed
}

fn parse_lsblk_output(output: &str) -> Result<HashMap<PathBuf, String>, Error> {
    let parsed: LsblkOutput =
        serde_json::from_str(output).context("Failed to parse lsblk output")?;

    let mut map = HashMap::new();
    let mut stack: Vec<Entry> = parsed.blockdevices;
    while let Some(entry) = stack.pop() {
        if let Some(fstype) = entry.fstype {
            map.insert(entry.path, fstype);
        }
        stack.extend(entry.children.unwrap_or_default());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsblk_output() {
        let output = indoc::indoc!(
            r#"
            {
                "blockdevices": [
                    {
                        "path": "/dev/sda",
                        "fstype": null,
                        "children": [
                            {
                                "path": "/dev/sda1",
                                "fstype": "vfat"
                            },
                            {
                                "path": "/dev/sda2",
                                "fstype": "ext4"
                            },
                            {
                                "path": "/dev/sda3",
                                "fstype": null
                            }
                        ]
                    }
                ]
            }
            "#
        );

        let map = parse_lsblk_output(output).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[Path::new("/dev/sda1")], "vfat");
        assert_eq!(map[Path::new("/dev/sda2")], "ext4");
        assert!(!map.contains_key(Path::new("/dev/sda3")));

        assert!(parse_lsblk_output("bad output").is_err());
    }
}
