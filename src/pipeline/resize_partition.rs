//! Grow the working image file and extend the last partition-table entry.
//!
//! Only the last entry of a DOS partition table can be extended in place.
//! The file is grown first, then `sfdisk -N` rewrites the entry to span the
//! added space. Images with any other table format are a configuration
//! error, never a silent skip.

use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::path::Path;

use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::process::Cmd;
use crate::ui::Ui;

pub struct StepResizeLastPartition {
    extra_size: u64,
}

impl StepResizeLastPartition {
    pub fn new(extra_size: u64) -> Self {
        Self { extra_size }
    }

    fn resize(&self, image: &Path) -> Result<()> {
        let last = last_dos_partition_number(image)?;

        let file = OpenOptions::new()
            .write(true)
            .open(image)
            .with_context(|| format!("Failed to open {}", image.display()))?;
        let len = file.metadata()?.len();
        file.set_len(len + self.extra_size)
            .with_context(|| format!("Failed to grow {}", image.display()))?;

        // ", +" keeps the start and extends the entry to the end of the file.
        Cmd::new("sfdisk")
            .args(["--no-reread", "-N"])
            .arg(last.to_string())
            .arg_path(image)
            .stdin(", +\n")
            .error_msg("sfdisk failed to extend the last partition")
            .run()?;
        Ok(())
    }
}

impl Step for StepResizeLastPartition {
    fn name(&self) -> &'static str {
        "resize last partition"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        let image = match ctx.require_work_image() {
            Ok(p) => p.to_path_buf(),
            Err(e) => return halt(ctx, e),
        };
        ui.say(&format!(
            "Extending last partition by {} bytes...",
            self.extra_size
        ));
        match self.resize(&image) {
            Ok(()) => StepOutcome::Continue,
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, _ctx: &mut BuildContext, _ui: &dyn Ui) {
        // Table edits live in the working image; nothing to release.
    }
}

/// Inspect the image's partition table and return the number of its last
/// partition. Fails on non-DOS labels and on empty tables.
fn last_dos_partition_number(image: &Path) -> Result<usize> {
    let dump = Cmd::new("sfdisk")
        .arg("--dump")
        .arg_path(image)
        .error_msg(format!(
            "sfdisk could not read the partition table of {}",
            image.display()
        ))
        .run()?;
    parse_last_partition(&dump.stdout)
}

/// Parse `sfdisk --dump` output.
fn parse_last_partition(dump: &str) -> Result<usize> {
    let label = dump
        .lines()
        .find_map(|l| l.strip_prefix("label:"))
        .map(str::trim)
        .unwrap_or("");
    if label != "dos" {
        bail!(
            "last-partition resize requires a DOS partition table, found \"{}\"",
            label
        );
    }

    // Partition lines look like "<device> : start= 8192, size= 1048576, type=c".
    let count = dump
        .lines()
        .filter(|l| l.contains(": start="))
        .count();
    if count == 0 {
        bail!("image has a DOS label but no partitions");
    }
    Ok(count)
}
