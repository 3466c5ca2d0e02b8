//! Download step: fetch the base image through the [`Fetcher`] interface.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::download::Fetcher;
use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::ui::Ui;

pub struct StepDownload {
    fetcher: Arc<dyn Fetcher>,
    urls: Vec<String>,
    checksum: String,
    checksum_type: String,
}

impl StepDownload {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        urls: Vec<String>,
        checksum: String,
        checksum_type: String,
    ) -> Self {
        Self {
            fetcher,
            urls,
            checksum,
            checksum_type,
        }
    }

    fn fetch(&self) -> Result<PathBuf> {
        self.fetcher
            .fetch(&self.urls, &self.checksum, &self.checksum_type)
    }
}

impl Step for StepDownload {
    fn name(&self) -> &'static str {
        "download image"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        ui.say("Downloading base image...");
        match self.fetch() {
            Ok(path) => {
                ui.say(&format!("Base image ready: {}", path.display()));
                ctx.downloaded_image = Some(path);
                StepOutcome::Continue
            }
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, _ctx: &mut BuildContext, _ui: &dyn Ui) {
        // The cache owns the download; nothing to release.
    }
}
