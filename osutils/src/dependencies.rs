use std::process::Command;

use anyhow::{bail, Error};
use strum_macros::IntoStaticStr;

/// External binaries the production backend drives. Mount and unmount go
/// through mount(2)/umount(2) directly and are not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Dependency {
    Lsblk,
    Parted,
    Partprobe,
    Udevadm,
    Unsquashfs,
}

impl Dependency {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn cmd(&self) -> Command {
        Command::new(self.name())
    }

    pub fn exists(&self) -> bool {
        which::which(self.name()).is_ok()
    }

    pub fn ensure(&self) -> Result<(), Error> {
        if !self.exists() {
            bail!("required tool '{}' was not found in PATH", self.name());
        }
        Ok(())
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(Dependency::Parted.name(), "parted");
        assert_eq!(Dependency::Partprobe.name(), "partprobe");
        assert_eq!(Dependency::Unsquashfs.name(), "unsquashfs");
        assert_eq!(Dependency::Udevadm.to_string(), "udevadm");
    }
}
