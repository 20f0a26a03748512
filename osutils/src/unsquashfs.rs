use std::path::Path;

use anyhow::{Context, Error};

use crate::{dependencies::Dependency, exe::RunAndCheck};

/// Unpacks a squashfs image into `target`. With `force`, existing files in
/// the target are overwritten.
pub fn extract(image: &Path, target: &Path, force: bool) -> Result<(), Error> {
    let mut cmd = Dependency::Unsquashfs.cmd();
    if force {
        cmd.arg("-f");
    }
    cmd.arg("-d")
        .arg(target)
        .arg(image)
        .run_and_check()
        .context(format!(
            "Failed to extract '{}' into '{}'",
            image.display(),
            target.display()
        ))
}
