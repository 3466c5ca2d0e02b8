//! Provision step: hand the ready chroot to the provisioning hook.
//!
//! Runs after emulation is enabled so foreign-architecture provisioning
//! scripts execute transparently. Every command the hook wants to run is
//! first passed through the command-wrapper template.

use std::sync::Arc;

use crate::hook::ProvisionHook;
use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::ui::Ui;

pub struct StepProvision {
    hook: Arc<dyn ProvisionHook>,
    command_wrapper: String,
}

impl StepProvision {
    pub fn new(hook: Arc<dyn ProvisionHook>, command_wrapper: String) -> Self {
        Self {
            hook,
            command_wrapper,
        }
    }
}

impl Step for StepProvision {
    fn name(&self) -> &'static str {
        "provision"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        let chroot = match ctx.require_chroot_root() {
            Ok(p) => p.to_path_buf(),
            Err(e) => return halt(ctx, e),
        };
        ui.say("Provisioning inside the chroot...");

        let template = self.command_wrapper.clone();
        let wrap = move |command: &str| template.replace(crate::config::COMMAND_PLACEHOLDER, command);

        match self.hook.provision(&chroot, &wrap, ui) {
            Ok(()) => StepOutcome::Continue,
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, _ctx: &mut BuildContext, _ui: &dyn Ui) {
        // The hook owns nothing the pipeline must release.
    }
}
