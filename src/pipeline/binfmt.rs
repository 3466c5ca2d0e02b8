//! Register the emulator with the kernel's binfmt_misc interface.
//!
//! Writing a registration line to the `register` file associates the ARM ELF
//! magic with the in-chroot interpreter path; afterwards the kernel routes
//! every ARM executable started inside the chroot through the emulator. The
//! registration is process-wide kernel state, so cleanup removes it unless
//! the host had registered it before us.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::ui::Ui;

/// Name of the binfmt entry this builder manages.
pub const BINFMT_NAME: &str = "arm";

/// ELF header magic for 32-bit little-endian ARM executables.
const ARM_MAGIC: &str = r"\x7fELF\x01\x01\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x02\x00\x28\x00";

/// Mask applied before the magic comparison; byte 7 (OS ABI) and the
/// low bit of e_type (EXEC vs DYN) are wildcarded.
const ARM_MASK: &str = r"\xff\xff\xff\xff\xff\xff\xff\x00\xff\xff\xff\xff\xff\xff\xff\xff\xfe\xff\xff\xff";

/// binfmt_misc mount point relative to the chroot root.
const BINFMT_DIR: &str = "proc/sys/fs/binfmt_misc";

pub struct StepRegisterBinfmt {
    /// Path of the entry file while we own the registration.
    registered: Option<PathBuf>,
}

impl StepRegisterBinfmt {
    pub fn new() -> Self {
        Self { registered: None }
    }

    fn register(&mut self, chroot: &Path, interpreter: &Path, ui: &dyn Ui) -> Result<()> {
        let binfmt_dir = chroot.join(BINFMT_DIR);
        let entry = binfmt_dir.join(BINFMT_NAME);

        if entry.exists() {
            // The host already runs ARM binaries through an emulator; leave
            // its registration alone and don't remove it on cleanup.
            ui.warn(&format!(
                "binfmt entry \"{}\" already registered on the host; reusing it",
                BINFMT_NAME
            ));
            return Ok(());
        }

        let line = registration_line(interpreter);
        fs::write(binfmt_dir.join("register"), line).with_context(|| {
            format!(
                "Failed to register binfmt entry (is binfmt_misc mounted at {}?)",
                binfmt_dir.display()
            )
        })?;
        self.registered = Some(entry);
        Ok(())
    }
}

impl Step for StepRegisterBinfmt {
    fn name(&self) -> &'static str {
        "register binfmt"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        let chroot = match ctx.require_chroot_root() {
            Ok(p) => p.to_path_buf(),
            Err(e) => return halt(ctx, e),
        };
        let interpreter = match ctx.require_qemu_in_chroot() {
            Ok(p) => p.to_path_buf(),
            Err(e) => return halt(ctx, e),
        };
        ui.say(&format!(
            "Registering binfmt handler \"{}\" -> {}...",
            BINFMT_NAME,
            interpreter.display()
        ));
        match self.register(&chroot, &interpreter, ui) {
            Ok(()) => StepOutcome::Continue,
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, _ctx: &mut BuildContext, ui: &dyn Ui) {
        if let Some(entry) = self.registered.take() {
            // If the interface is already gone the entry is gone with it;
            // that is the state we wanted.
            if !entry.exists() {
                return;
            }
            if let Err(e) = fs::write(&entry, "-1") {
                ui.warn(&format!(
                    "could not remove binfmt entry {}: {}",
                    entry.display(),
                    e
                ));
            }
        }
    }
}

/// Build the `:name:type:offset:magic:mask:interpreter:flags` line the
/// kernel expects on the `register` file.
fn registration_line(interpreter: &Path) -> String {
    format!(
        ":{}:M::{}:{}:{}:",
        BINFMT_NAME,
        ARM_MAGIC,
        ARM_MASK,
        interpreter.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_line_shape() {
        let line = registration_line(Path::new("/usr/bin/qemu-arm-static"));
        assert!(line.starts_with(":arm:M::"));
        assert!(line.ends_with(":/usr/bin/qemu-arm-static:"));
        assert!(line.contains(r"\x7fELF"));
        // name, type, offset, magic, mask, interpreter, flags
        assert_eq!(line.split(':').count() - 1, 7);
    }

    #[test]
    fn test_existing_host_entry_is_not_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let chroot = dir.path();
        let binfmt_dir = chroot.join(BINFMT_DIR);
        fs::create_dir_all(&binfmt_dir).unwrap();
        fs::write(binfmt_dir.join(BINFMT_NAME), "enabled\n").unwrap();

        let mut step = StepRegisterBinfmt::new();
        step.register(chroot, Path::new("/usr/bin/qemu-arm-static"), &crate::ui::NullUi)
            .unwrap();

        assert!(step.registered.is_none());
        assert!(!binfmt_dir.join("register").exists());
    }

    #[test]
    fn test_register_writes_registration_file() {
        let dir = tempfile::tempdir().unwrap();
        let chroot = dir.path();
        let binfmt_dir = chroot.join(BINFMT_DIR);
        fs::create_dir_all(&binfmt_dir).unwrap();

        let mut step = StepRegisterBinfmt::new();
        step.register(chroot, Path::new("/usr/bin/qemu-arm-static"), &crate::ui::NullUi)
            .unwrap();

        // A real kernel consumes the write; on a plain directory it lands in
        // the file, which is enough to assert the plumbing.
        let written = fs::read_to_string(binfmt_dir.join("register")).unwrap();
        assert_eq!(
            written,
            registration_line(Path::new("/usr/bin/qemu-arm-static"))
        );
        assert_eq!(step.registered, Some(binfmt_dir.join(BINFMT_NAME)));
    }
}
