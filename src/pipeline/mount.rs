//! Mount the image partitions under a fresh chroot root.
//!
//! Mount order follows the configured list, which the caller supplies in a
//! valid nesting order: `/` before anything nested under it. Entry i of the
//! list is the mount point of partition i+1. Cleanup unmounts in strict
//! reverse order and is idempotent.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::process::Cmd;
use crate::ui::Ui;

pub struct StepMountPartitions {
    output_dir: PathBuf,
    image_mounts: Vec<String>,
    mounted: Vec<PathBuf>,
}

impl StepMountPartitions {
    pub fn new(output_dir: PathBuf, image_mounts: Vec<String>) -> Self {
        Self {
            output_dir,
            image_mounts,
            mounted: Vec::new(),
        }
    }

    fn mount_all(&mut self, partitions: &[PathBuf], ui: &dyn Ui) -> Result<PathBuf> {
        if self.image_mounts.len() > partitions.len() {
            bail!(
                "{} image mounts configured but the image has only {} partitions",
                self.image_mounts.len(),
                partitions.len()
            );
        }

        // Fresh chroot root; leftovers from a previous run are stale.
        let chroot = self.output_dir.join("chroot");
        clear_stale_chroot(&chroot, &read_mount_table()?)?;
        fs::create_dir_all(&chroot)
            .with_context(|| format!("Failed to create chroot root {}", chroot.display()))?;

        let mounts = self.image_mounts.clone();
        for (i, mount_point) in mounts.iter().enumerate() {
            let device = &partitions[i];
            let target = chroot.join(mount_point.trim_start_matches('/'));
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create mount point {}", target.display()))?;

            ui.say(&format!(
                "  mounting {} at {}",
                device.display(),
                target.display()
            ));
            Cmd::new("mount")
                .arg_path(device)
                .arg_path(&target)
                .error_msg(format!(
                    "failed to mount {} at {}",
                    device.display(),
                    target.display()
                ))
                .run()?;
            self.mounted.push(target);
        }
        Ok(chroot)
    }
}

impl Step for StepMountPartitions {
    fn name(&self) -> &'static str {
        "mount partitions"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        if ctx.partitions.is_empty() {
            return halt(
                ctx,
                anyhow::anyhow!("no partitions recorded by an earlier step"),
            );
        }
        ui.say("Mounting image partitions...");
        let partitions = ctx.partitions.clone();
        match self.mount_all(&partitions, ui) {
            Ok(chroot) => {
                ctx.chroot_root = Some(chroot);
                StepOutcome::Continue
            }
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, _ctx: &mut BuildContext, ui: &dyn Ui) {
        // Drain so a second sweep has nothing left to unmount.
        while let Some(target) = self.mounted.pop() {
            if let Err(e) = unmount(&target) {
                ui.warn(&format!(
                    "could not unmount {}: {:#}",
                    target.display(),
                    e
                ));
            }
        }
    }
}

/// Unmount a path.
pub(crate) fn unmount(target: &Path) -> Result<()> {
    Cmd::new("umount")
        .arg_path(target)
        .error_msg(format!("umount {} failed", target.display()))
        .run()?;
    Ok(())
}

fn read_mount_table() -> Result<String> {
    fs::read_to_string("/proc/mounts").context("Failed to read /proc/mounts")
}

/// Remove a leftover chroot directory from a previous run.
///
/// A previous run that leaked mounts leaves live host state (a bound /dev,
/// image partitions) under the stale tree; deleting through a live mount
/// would destroy host device nodes or image contents. Anything still mounted
/// at or below the chroot makes this fatal, and the user has to unmount by
/// hand.
fn clear_stale_chroot(chroot: &Path, mount_table: &str) -> Result<()> {
    if !chroot.exists() {
        return Ok(());
    }
    let live = mounts_under(mount_table, chroot);
    if !live.is_empty() {
        bail!(
            "stale chroot {} still has mounts under it ({}); unmount them before rebuilding",
            chroot.display(),
            live.join(", ")
        );
    }
    fs::remove_dir_all(chroot)
        .with_context(|| format!("Failed to clear stale chroot {}", chroot.display()))?;
    Ok(())
}

/// Mount points from a /proc/mounts table that sit at or below the given
/// path.
fn mounts_under(mount_table: &str, root: &Path) -> Vec<String> {
    mount_table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_mount_point)
        .filter(|mp| Path::new(mp).starts_with(root))
        .collect()
}

/// Decode the octal escapes /proc/mounts uses for whitespace and backslash.
fn unescape_mount_point(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\134", "\\")
}
