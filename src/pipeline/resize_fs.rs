//! Grow the filesystem on the last partition to fill its extended entry.
//!
//! Runs strictly after mapping and before mounting: resize2fs needs the raw
//! block device. Only ext-family filesystems can be grown; anything else is
//! fatal because extra size was explicitly requested.

use anyhow::{bail, Result};
use std::path::Path;

use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::process::Cmd;
use crate::ui::Ui;

pub struct StepResizeFilesystem;

impl StepResizeFilesystem {
    pub fn new() -> Self {
        Self
    }

    fn resize(&self, device: &Path, ui: &dyn Ui) -> Result<()> {
        let fstype = Cmd::new("blkid")
            .args(["-o", "value", "-s", "TYPE"])
            .arg_path(device)
            .error_msg(format!(
                "blkid could not identify the filesystem on {}",
                device.display()
            ))
            .run()?
            .stdout_trimmed()
            .to_string();

        ensure_extendable(&fstype, device)?;

        ui.say(&format!("Growing {} filesystem on {}...", fstype, device.display()));

        // e2fsck exits 1 when it corrected errors; that is still a clean fs.
        let check = Cmd::new("e2fsck")
            .args(["-f", "-y"])
            .arg_path(device)
            .allow_fail()
            .run()?;
        if check.code() > 1 {
            bail!(
                "e2fsck failed on {} (exit code {}):\n{}",
                device.display(),
                check.code(),
                check.stderr_trimmed()
            );
        }

        Cmd::new("resize2fs")
            .arg_path(device)
            .error_msg(format!("resize2fs failed on {}", device.display()))
            .run()?;
        Ok(())
    }
}

/// Reject resize attempts on anything resize2fs cannot grow.
fn ensure_extendable(fstype: &str, device: &Path) -> Result<()> {
    if !fstype.starts_with("ext") {
        bail!(
            "cannot grow \"{}\" filesystem on {}; only ext filesystems can be extended",
            fstype,
            device.display()
        );
    }
    Ok(())
}

impl Step for StepResizeFilesystem {
    fn name(&self) -> &'static str {
        "resize filesystem"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        let device = match ctx.require_last_partition() {
            Ok(p) => p.to_path_buf(),
            Err(e) => return halt(ctx, e),
        };
        match self.resize(&device, ui) {
            Ok(()) => StepOutcome::Continue,
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, _ctx: &mut BuildContext, _ui: &dyn Ui) {
        // The grown filesystem lives in the working image; nothing to release.
    }
}
