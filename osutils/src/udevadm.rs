use anyhow::{Context, Error};

use crate::{dependencies::Dependency, exe::RunAndCheck};

/// Waits for udev to finish processing queued device events, so device nodes
/// created by a table edit exist before the caller re-probes.
pub fn settle() -> Result<(), Error> {
    Dependency::Udevadm
        .cmd()
        .arg("settle")
        .run_and_check()
        .context("Failed to settle udev")
}
