//! Install the user-mode emulator inside the chroot.
//!
//! The binfmt interpreter path is resolved inside the chroot when a foreign
//! binary is executed, so the static qemu binary must exist in the chroot's
//! own filesystem. The in-chroot path is recorded for the registration step.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::ui::Ui;

pub struct StepInstallEmulator {
    /// Host path of the static qemu-user binary, resolved during prepare.
    qemu_binary: PathBuf,
    installed: Option<PathBuf>,
}

impl StepInstallEmulator {
    pub fn new(qemu_binary: PathBuf) -> Self {
        Self {
            qemu_binary,
            installed: None,
        }
    }

    fn install(&mut self, chroot: &Path) -> Result<PathBuf> {
        let name = self
            .qemu_binary
            .file_name()
            .with_context(|| format!("invalid qemu binary path {}", self.qemu_binary.display()))?
            .to_os_string();

        let dest = chroot.join("usr/bin").join(&name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::copy(&self.qemu_binary, &dest).with_context(|| {
            format!(
                "Failed to copy {} into the chroot",
                self.qemu_binary.display()
            )
        })?;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))?;
        self.installed = Some(dest);

        Ok(Path::new("/usr/bin").join(&name))
    }
}

impl Step for StepInstallEmulator {
    fn name(&self) -> &'static str {
        "install emulator"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        let chroot = match ctx.require_chroot_root() {
            Ok(p) => p.to_path_buf(),
            Err(e) => return halt(ctx, e),
        };
        ui.say(&format!(
            "Installing {} into the chroot...",
            self.qemu_binary.display()
        ));
        match self.install(&chroot) {
            Ok(in_chroot) => {
                ctx.qemu_in_chroot = Some(in_chroot);
                StepOutcome::Continue
            }
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, _ctx: &mut BuildContext, ui: &dyn Ui) {
        if let Some(dest) = self.installed.take() {
            if let Err(e) = fs::remove_file(&dest) {
                ui.warn(&format!(
                    "could not remove emulator {}: {}",
                    dest.display(),
                    e
                ));
            }
        }
    }
}
