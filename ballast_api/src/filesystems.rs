use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

/// Filesystem types the engine knows how to create and mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemType {
    #[strum(serialize = "ext2")]
    Ext2,
    #[strum(serialize = "ext3")]
    Ext3,
    #[strum(serialize = "ext4")]
    Ext4,
    #[strum(serialize = "xfs")]
    Xfs,
    #[strum(serialize = "btrfs")]
    Btrfs,
    #[strum(serialize = "vfat", serialize = "fat32", serialize = "fat16")]
    Vfat,
    #[strum(serialize = "ntfs")]
    Ntfs,
    #[serde(rename = "linux-swap")]
    #[strum(serialize = "linux-swap", serialize = "swap")]
    LinuxSwap,
}

impl FilesystemType {
    pub fn name(self) -> &'static str {
        match self {
            FilesystemType::Ext2 => "ext2",
            FilesystemType::Ext3 => "ext3",
            FilesystemType::Ext4 => "ext4",
            FilesystemType::Xfs => "xfs",
            FilesystemType::Btrfs => "btrfs",
            FilesystemType::Vfat => "vfat",
            FilesystemType::Ntfs => "ntfs",
            FilesystemType::LinuxSwap => "linux-swap",
        }
    }

    /// Name in `parted mkpart` fs-type vocabulary.
    pub fn parted_name(self) -> &'static str {
        match self {
            FilesystemType::Vfat => "fat32",
            other => other.name(),
        }
    }

    /// Name in mount(2) fs-type vocabulary.
    pub fn mount_name(self) -> &'static str {
        self.name()
    }

    /// Swap is attached via swapon, never mounted at a directory.
    pub fn mountable(self) -> bool {
        self != FilesystemType::LinuxSwap
    }

    /// Whether the same partition may be mounted at several directories at
    /// once. The ntfs driver rejects a second mount of the same volume.
    pub fn supports_multi_mount(self) -> bool {
        self != FilesystemType::Ntfs
    }
}

impl std::fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detected_names() {
        // lsblk FSTYPE spellings
        assert_eq!("ext4".parse::<FilesystemType>().unwrap(), FilesystemType::Ext4);
        assert_eq!("vfat".parse::<FilesystemType>().unwrap(), FilesystemType::Vfat);
        assert_eq!(
            "swap".parse::<FilesystemType>().unwrap(),
            FilesystemType::LinuxSwap
        );
        // parted spellings
        assert_eq!("fat32".parse::<FilesystemType>().unwrap(), FilesystemType::Vfat);
        assert_eq!(
            "linux-swap".parse::<FilesystemType>().unwrap(),
            FilesystemType::LinuxSwap
        );
        // Anything else is "no recognized filesystem".
        assert!("squashfs".parse::<FilesystemType>().is_err());
        assert!("".parse::<FilesystemType>().is_err());
    }

    #[test]
    fn test_capabilities() {
        assert!(FilesystemType::Ext4.mountable());
        assert!(!FilesystemType::LinuxSwap.mountable());
        assert!(FilesystemType::Ext4.supports_multi_mount());
        assert!(FilesystemType::Btrfs.supports_multi_mount());
        assert!(!FilesystemType::Ntfs.supports_multi_mount());
    }

    #[test]
    fn test_parted_name() {
        assert_eq!(FilesystemType::Vfat.parted_name(), "fat32");
        assert_eq!(FilesystemType::Ext4.parted_name(), "ext4");
        assert_eq!(FilesystemType::LinuxSwap.parted_name(), "linux-swap");
    }
}
