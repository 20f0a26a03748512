use std::{fs, path::Path};

use anyhow::{bail, Context, Error};
use sys_mount::{Mount, UnmountFlags};

use ballast_api::FilesystemType;

/// Failure modes of `unmount` the caller needs to tell apart.
#[derive(Debug, thiserror::Error)]
pub enum UnmountError {
    /// The kernel refused with EBUSY: open handles, or a process cwd inside.
    #[error("mount target is busy")]
    Busy,

    #[error(transparent)]
    Other(#[from] Error),
}

/// Mounts the block device at `target`, preparing the directory first.
pub fn mount(source: &Path, target: &Path, filesystem: FilesystemType) -> Result<(), Error> {
    ensure_mount_directory(target)?;

    Mount::builder()
        .fstype(sys_mount::FilesystemType::Manual(filesystem.mount_name()))
        .mount(source, target)
        .map(drop)
        .with_context(|| {
            format!(
                "Failed to mount {} at {}",
                source.display(),
                target.display()
            )
        })
}

/// Unmounts whatever is attached at `target`.
pub fn unmount(target: &Path) -> Result<(), UnmountError> {
    sys_mount::unmount(target, UnmountFlags::empty()).map_err(|e| {
        if e.raw_os_error() == Some(nix::errno::Errno::EBUSY as i32) {
            UnmountError::Busy
        } else {
            UnmountError::Other(
                Error::new(e).context(format!("Failed to unmount {}", target.display())),
            )
        }
    })
}

/// Ensure that `target` is a suitable path for a mount point: an existing
/// empty directory, or a path that can be created.
pub fn ensure_mount_directory(target: &Path) -> Result<(), Error> {
    if target.exists() {
        if !target.is_dir() {
            bail!("Mount path '{}' is not a directory", target.display());
        }
        if let Ok(entries) = fs::read_dir(target) {
            if entries.count() > 0 {
                bail!("Mount path '{}' is not empty", target.display());
            }
        }
    } else {
        fs::create_dir_all(target).context(format!(
            "Failed to create mount path '{}'",
            target.display()
        ))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::File;

    use tempfile::TempDir;

    #[test]
    fn test_ensure_mount_directory() {
        let temp_mount_dir = TempDir::new().unwrap();

        // An existing empty directory is fine
        ensure_mount_directory(temp_mount_dir.path()).unwrap();

        // A missing directory is created
        let nested = temp_mount_dir.path().join("a/b");
        ensure_mount_directory(&nested).unwrap();
        assert!(nested.is_dir());

        // A non-empty directory is rejected
        assert_eq!(
            ensure_mount_directory(temp_mount_dir.path())
                .unwrap_err()
                .to_string(),
            format!(
                "Mount path '{}' is not empty",
                temp_mount_dir.path().display()
            )
        );

        // A file path is rejected
        let file_path = temp_mount_dir.path().join("a/file");
        File::create(&file_path).unwrap();
        assert_eq!(
            ensure_mount_directory(&file_path).unwrap_err().to_string(),
            format!("Mount path '{}' is not a directory", file_path.display())
        );
    }

    #[test]
    fn test_unmount_classifies_errors() {
        // Unmounting a directory that is not a mount point fails with EINVAL,
        // which must not be mistaken for Busy.
        let temp_dir = TempDir::new().unwrap();
        match unmount(temp_dir.path()) {
            Err(UnmountError::Other(_)) => {}
            other => panic!("expected Other, got {other:?}"),
        }
    }
}
