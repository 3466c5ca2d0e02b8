//! Provisioning hook interface and the built-in shell hook.
//!
//! The generic multi-provisioner engine lives in the host framework; the
//! pipeline only needs something it can invoke once the chroot is ready and
//! ask to stop on cancellation.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::process::Cmd;
use crate::ui::Ui;

/// Invoked once, inside a fully-mounted chroot with emulation enabled.
///
/// `wrap` applies the configured command-wrapper template; implementations
/// must pass every command they execute through it. `cancel` may be called
/// from another thread and should stop the hook at its next checkpoint.
pub trait ProvisionHook: Send + Sync {
    fn provision(&self, chroot: &Path, wrap: &dyn Fn(&str) -> String, ui: &dyn Ui) -> Result<()>;

    fn cancel(&self);
}

/// Hook that does nothing. Used when a build only reshapes the image.
pub struct NullHook;

impl ProvisionHook for NullHook {
    fn provision(&self, _chroot: &Path, _wrap: &dyn Fn(&str) -> String, _ui: &dyn Ui) -> Result<()> {
        Ok(())
    }

    fn cancel(&self) {}
}

/// Hook that runs an ordered list of shell commands inside the chroot via
/// `chroot <root> /bin/sh -c <command>`.
///
/// Cancellation is checked between commands; an in-flight command is not
/// interrupted. qemu invocation arguments are exported as `QEMU_*`
/// environment variables (the binfmt interpreter field cannot carry argv).
pub struct ShellHook {
    commands: Vec<String>,
    env: Vec<(String, String)>,
    cancelled: AtomicBool,
}

impl ShellHook {
    pub fn new(commands: Vec<String>, qemu_args: &[String]) -> Self {
        Self {
            commands,
            env: qemu_env(qemu_args),
            cancelled: AtomicBool::new(false),
        }
    }
}

impl ProvisionHook for ShellHook {
    fn provision(&self, chroot: &Path, wrap: &dyn Fn(&str) -> String, ui: &dyn Ui) -> Result<()> {
        for command in &self.commands {
            if self.cancelled.load(Ordering::SeqCst) {
                bail!("provisioning canceled");
            }
            let wrapped = wrap(command);
            ui.say(&format!("  $ {}", wrapped));

            let mut cmd = Cmd::new("chroot")
                .arg_path(chroot)
                .args(["/bin/sh", "-c"])
                .arg(&wrapped)
                .error_msg(format!("provision command failed: {}", command));
            for (key, value) in &self.env {
                cmd = cmd.env(key, value);
            }
            cmd.run()?;
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Translate qemu command-line arguments into the equivalent `QEMU_*`
/// environment variables: `-cpu cortex-a8` becomes `QEMU_CPU=cortex-a8`,
/// a bare flag becomes `QEMU_<FLAG>=1`.
///
/// A value that itself starts with `-` (e.g. `-L -custom-dir`) is read as
/// the next flag, not as the value. None of qemu-user's flags take such
/// values today; if one appears, pass it via the environment instead.
pub fn qemu_env(args: &[String]) -> Vec<(String, String)> {
    let mut env = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(name) = arg.strip_prefix('-') else {
            continue;
        };
        let key = format!(
            "QEMU_{}",
            name.trim_start_matches('-').to_uppercase().replace('-', "_")
        );
        let value = match iter.peek() {
            Some(next) if !next.starts_with('-') => {
                let v = (*next).clone();
                iter.next();
                v
            }
            _ => "1".to_string(),
        };
        env.push((key, value));
    }
    env
}
