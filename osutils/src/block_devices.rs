use std::path::Path;

use anyhow::{Context, Error};
use nix::sys::stat::{stat, SFlag};

/// Whether `path` names a block device node. A missing path is simply
/// `false`, not an error.
pub fn is_block_device(path: &Path) -> Result<bool, Error> {
    match stat(path) {
        Ok(st) => Ok(st.st_mode & SFlag::S_IFMT.bits() == SFlag::S_IFBLK.bits()),
        Err(nix::errno::Errno::ENOENT) | Err(nix::errno::Errno::ENOTDIR) => Ok(false),
        Err(e) => Err(e).context(format!("Failed to stat '{}'", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_block_device() {
        // Character device
        assert!(!is_block_device(Path::new("/dev/null")).unwrap());
        // Directory
        assert!(!is_block_device(Path::new("/")).unwrap());
        // Missing path
        assert!(!is_block_device(Path::new("/dev/does-not-exist-1234")).unwrap());
    }
}
