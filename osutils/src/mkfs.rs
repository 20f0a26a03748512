use std::{path::Path, process::Command};

use anyhow::{Context, Error};

use ballast_api::FilesystemType;

use crate::exe::RunAndCheck;

/// Creates a filesystem on a freshly made partition. Each variant gets the
/// force flag of its own mkfs tool so re-provisioning a previously formatted
/// extent does not stop to ask.
pub fn run(device: &Path, filesystem: FilesystemType) -> Result<(), Error> {
    let mut cmd = match filesystem {
        FilesystemType::Ext2 | FilesystemType::Ext3 | FilesystemType::Ext4 => {
            let mut cmd = Command::new(format!("mkfs.{}", filesystem.name()));
            cmd.args(["-q", "-F"]);
            cmd
        }
        FilesystemType::Xfs | FilesystemType::Btrfs => {
            let mut cmd = Command::new(format!("mkfs.{}", filesystem.name()));
            cmd.arg("-f");
            cmd
        }
        FilesystemType::Vfat => {
            let mut cmd = Command::new("mkfs.fat");
            cmd.args(["-I", "-F", "32"]);
            cmd
        }
        FilesystemType::Ntfs => {
            let mut cmd = Command::new("mkfs.ntfs");
            cmd.args(["-Q", "-F"]);
            cmd
        }
        FilesystemType::LinuxSwap => {
            let mut cmd = Command::new("mkswap");
            cmd.arg("-f");
            cmd
        }
    };

    cmd.arg(device).run_and_check().context(format!(
        "Failed to create a {} filesystem on '{}'",
        filesystem,
        device.display()
    ))
}
