//! Shared state carried across pipeline steps.

use anyhow::{Context as _, Error, Result};
use std::path::{Path, PathBuf};

/// Typed context threaded through the pipeline.
///
/// Each field is written by exactly one step; later steps read but never
/// mutate earlier fields. Created empty at pipeline start and discarded after
/// the artifact is derived from it.
#[derive(Debug, Default)]
pub struct BuildContext {
    /// Verified base image in the download cache. Written by the download step.
    pub downloaded_image: Option<PathBuf>,
    /// Working copy in the output directory; becomes the artifact. Written by
    /// the copy step.
    pub work_image: Option<PathBuf>,
    /// Partition device paths in partition order (entry 0 is partition 1).
    /// Written by the map step; invalid once the loop device is detached.
    pub partitions: Vec<PathBuf>,
    /// Root of the mounted chroot. Written by the image-mount step.
    pub chroot_root: Option<PathBuf>,
    /// Emulator path as seen from inside the chroot. Written by the
    /// emulator-install step.
    pub qemu_in_chroot: Option<PathBuf>,

    /// Terminal error recorded by a halting step.
    pub error: Option<Error>,
    /// Set when the run was cancelled from outside.
    pub cancelled: bool,
    /// Set when a step halted the run.
    pub halted: bool,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_downloaded_image(&self) -> Result<&Path> {
        self.downloaded_image
            .as_deref()
            .context("no downloaded image recorded by an earlier step")
    }

    pub fn require_work_image(&self) -> Result<&Path> {
        self.work_image
            .as_deref()
            .context("no working image recorded by an earlier step")
    }

    pub fn require_last_partition(&self) -> Result<&Path> {
        self.partitions
            .last()
            .map(|p| p.as_path())
            .context("no partitions recorded by an earlier step")
    }

    pub fn require_chroot_root(&self) -> Result<&Path> {
        self.chroot_root
            .as_deref()
            .context("no chroot root recorded by an earlier step")
    }

    pub fn require_qemu_in_chroot(&self) -> Result<&Path> {
        self.qemu_in_chroot
            .as_deref()
            .context("no in-chroot emulator recorded by an earlier step")
    }
}
