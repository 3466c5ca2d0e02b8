//! Copy step: place a working copy of the base image in the output directory.
//!
//! Everything after this step mutates the working copy; the cached download
//! stays pristine. On success the copy becomes the artifact, so cleanup never
//! deletes it (removal is `Artifact::destroy`), and failed runs leave it
//! behind for inspection.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::ui::Ui;

pub struct StepCopyImage {
    output_dir: PathBuf,
    build_name: String,
}

impl StepCopyImage {
    pub fn new(output_dir: PathBuf, build_name: String) -> Self {
        Self {
            output_dir,
            build_name,
        }
    }

    fn copy(&self, source: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                self.output_dir.display()
            )
        })?;
        let dest = self.output_dir.join(format!("{}.img", self.build_name));
        fs::copy(source, &dest).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                source.display(),
                dest.display()
            )
        })?;
        Ok(dest)
    }
}

impl Step for StepCopyImage {
    fn name(&self) -> &'static str {
        "copy image"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        let source = match ctx.require_downloaded_image() {
            Ok(p) => p.to_path_buf(),
            Err(e) => return halt(ctx, e),
        };
        ui.say(&format!(
            "Copying image to {}...",
            self.output_dir.display()
        ));
        match self.copy(&source) {
            Ok(dest) => {
                ctx.work_image = Some(dest);
                StepOutcome::Continue
            }
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, _ctx: &mut BuildContext, _ui: &dyn Ui) {}
}
