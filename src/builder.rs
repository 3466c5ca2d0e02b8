//! Pipeline orchestrator.
//!
//! Assembles the conditional step list, runs it under a cancellation watcher,
//! and turns the terminal context state into an artifact or an error.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::artifact::Artifact;
use crate::config::BuildConfig;
use crate::download::Fetcher;
use crate::hook::ProvisionHook;
use crate::pipeline::binfmt::StepRegisterBinfmt;
use crate::pipeline::copy::StepCopyImage;
use crate::pipeline::download::StepDownload;
use crate::pipeline::extra_mounts::StepMountAuxiliary;
use crate::pipeline::map::StepMapPartitions;
use crate::pipeline::mount::StepMountPartitions;
use crate::pipeline::provision::StepProvision;
use crate::pipeline::qemu::StepInstallEmulator;
use crate::pipeline::resize_fs::StepResizeFilesystem;
use crate::pipeline::resize_partition::StepResizeLastPartition;
use crate::pipeline::{BuildContext, CancelToken, Runner, Step};
use crate::ui::Ui;

pub struct Builder {
    config: BuildConfig,
    token: CancelToken,
}

impl Builder {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            token: CancelToken::new(),
        }
    }

    /// Validate the configuration and apply defaults.
    ///
    /// Returns warnings; the error lists every configuration problem at
    /// once. Must succeed before `run` touches any resource.
    pub fn prepare(&mut self) -> Result<Vec<String>> {
        self.config.prepare()
    }

    /// Token another thread can use to cancel an in-progress run.
    pub fn cancel_handle(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Execute the pipeline and return the finished artifact.
    ///
    /// Every step that executed is cleaned up in reverse order before this
    /// returns, whatever the outcome.
    pub fn run(
        &mut self,
        ui: &dyn Ui,
        hook: Arc<dyn ProvisionHook>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Artifact> {
        let steps = self.build_steps(hook.clone(), fetcher);
        let mut ctx = BuildContext::new();
        let mut runner = Runner::new(steps, self.token.clone());

        // Watcher blocks until cancel-or-finish; on cancellation it asks the
        // hook to stop at its next checkpoint. The runner itself checks the
        // token between steps.
        let watch_token = self.token.clone();
        let watch_hook = hook;
        let watcher = thread::spawn(move || {
            if watch_token.wait() {
                watch_hook.cancel();
            }
        });

        runner.run(&mut ctx, ui);

        self.token.finish();
        let _ = watcher.join();

        if ctx.cancelled {
            bail!("step canceled or halted");
        }
        if let Some(err) = ctx.error.take() {
            return Err(err);
        }
        if ctx.halted {
            bail!("step canceled or halted");
        }

        let image = ctx
            .work_image
            .take()
            .context("pipeline finished without recording an image")?;
        Ok(Artifact::new(image))
    }

    /// The ordered step list; resize stages appear only when extra size was
    /// requested.
    fn build_steps(
        &self,
        hook: Arc<dyn ProvisionHook>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Vec<Box<dyn Step>> {
        let cfg = &self.config;
        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(StepDownload::new(
                fetcher,
                cfg.image_urls.clone(),
                cfg.image_checksum.clone(),
                cfg.image_checksum_type.clone(),
            )),
            Box::new(StepCopyImage::new(
                cfg.output_directory.clone(),
                cfg.build_name.clone(),
            )),
        ];

        if cfg.last_partition_extra_size > 0 {
            steps.push(Box::new(StepResizeLastPartition::new(
                cfg.last_partition_extra_size,
            )));
        }

        steps.push(Box::new(StepMapPartitions::new()));

        if cfg.last_partition_extra_size > 0 {
            steps.push(Box::new(StepResizeFilesystem::new()));
        }

        steps.push(Box::new(StepMountPartitions::new(
            cfg.output_directory.clone(),
            cfg.image_mounts.clone(),
        )));
        steps.push(Box::new(StepMountAuxiliary::new(cfg.chroot_mounts.clone())));
        steps.push(Box::new(StepInstallEmulator::new(PathBuf::from(
            &cfg.qemu_binary,
        ))));
        steps.push(Box::new(StepRegisterBinfmt::new()));
        steps.push(Box::new(StepProvision::new(
            hook,
            cfg.command_wrapper.clone(),
        )));

        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::NullHook;

    struct NoFetch;
    impl Fetcher for NoFetch {
        fn fetch(&self, _: &[String], _: &str, _: &str) -> Result<std::path::PathBuf> {
            bail!("not used")
        }
    }

    fn base_config() -> BuildConfig {
        BuildConfig {
            image_mounts: vec!["/".to_string()],
            ..Default::default()
        }
    }

    fn step_names(builder: &Builder) -> Vec<&'static str> {
        builder
            .build_steps(Arc::new(NullHook), Arc::new(NoFetch))
            .iter()
            .map(|s| s.name())
            .collect()
    }

    #[test]
    fn test_no_resize_steps_without_extra_size() {
        let builder = Builder::new(base_config());
        let names = step_names(&builder);
        assert_eq!(
            names,
            vec![
                "download image",
                "copy image",
                "map partitions",
                "mount partitions",
                "mount auxiliary filesystems",
                "install emulator",
                "register binfmt",
                "provision",
            ]
        );
    }

    #[test]
    fn test_resize_steps_bracket_mapping_when_requested() {
        let mut config = base_config();
        config.last_partition_extra_size = 256 * 1024 * 1024;
        let builder = Builder::new(config);
        let names = step_names(&builder);
        assert_eq!(
            names,
            vec![
                "download image",
                "copy image",
                "resize last partition",
                "map partitions",
                "resize filesystem",
                "mount partitions",
                "mount auxiliary filesystems",
                "install emulator",
                "register binfmt",
                "provision",
            ]
        );
    }
}
