//! Mount host virtual filesystems into the chroot.
//!
//! Provisioning inside the chroot needs proc, sysfs, device nodes, ptys, and
//! binfmt_misc (for the emulator registration). These nest inside the image
//! mounts, so the reverse-order sweep releases them first.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ChrootMount;
use crate::pipeline::mount::unmount;
use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::process::Cmd;
use crate::ui::Ui;

pub struct StepMountAuxiliary {
    chroot_mounts: Vec<ChrootMount>,
    mounted: Vec<PathBuf>,
}

impl StepMountAuxiliary {
    pub fn new(chroot_mounts: Vec<ChrootMount>) -> Self {
        Self {
            chroot_mounts,
            mounted: Vec::new(),
        }
    }

    fn mount_all(&mut self, chroot: &Path, ui: &dyn Ui) -> Result<()> {
        let mounts = self.chroot_mounts.clone();
        for m in &mounts {
            let target = chroot.join(m.target.trim_start_matches('/'));
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create mount point {}", target.display()))?;

            ui.say(&format!("  mounting {} ({}) at {}", m.source, m.kind, target.display()));
            let cmd = if m.kind == "bind" {
                Cmd::new("mount").arg("--bind").arg(&m.source).arg_path(&target)
            } else {
                Cmd::new("mount")
                    .args(["-t", &m.kind])
                    .arg(&m.source)
                    .arg_path(&target)
            };
            cmd.error_msg(format!(
                "failed to mount {} ({}) at {}",
                m.source,
                m.kind,
                target.display()
            ))
            .run()?;
            self.mounted.push(target);
        }
        Ok(())
    }
}

impl Step for StepMountAuxiliary {
    fn name(&self) -> &'static str {
        "mount auxiliary filesystems"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        let chroot = match ctx.require_chroot_root() {
            Ok(p) => p.to_path_buf(),
            Err(e) => return halt(ctx, e),
        };
        ui.say("Mounting chroot auxiliary filesystems...");
        match self.mount_all(&chroot, ui) {
            Ok(()) => StepOutcome::Continue,
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, _ctx: &mut BuildContext, ui: &dyn Ui) {
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
