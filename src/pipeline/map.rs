//! Map step: expose the working image's partitions as block devices.
//!
//! `kpartx -a` attaches the image to a loop device and creates one
//! `/dev/mapper/loopXpY` node per partition. Loop devices are host-scoped
//! kernel state: the detach in cleanup must happen on every exit path, and
//! by the time it runs all mounts built on these nodes have already been
//! released by the reverse-order sweep.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::pipeline::{halt, BuildContext, Step, StepOutcome};
use crate::process::Cmd;
use crate::ui::Ui;

#[derive(Default)]
pub struct StepMapPartitions {
    mapped: bool,
}

impl StepMapPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, image: &Path) -> Result<Vec<PathBuf>> {
        let result = Cmd::new("kpartx")
            .args(["-a", "-v", "-s"])
            .arg_path(image)
            .error_msg(format!("kpartx failed to map {}", image.display()))
            .run()?;

        let devices = parse_kpartx_output(&result.stdout);
        if devices.is_empty() {
            // Attach may have half-succeeded; don't leak the loop device.
            let _ = Cmd::new("kpartx")
                .args(["-d", "-s"])
                .arg_path(image)
                .allow_fail()
                .run();
            bail!(
                "no partitions found in {} (unreadable partition table?)",
                image.display()
            );
        }
        Ok(devices)
    }
}

impl Step for StepMapPartitions {
    fn name(&self) -> &'static str {
        "map partitions"
    }

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome {
        let image = match ctx.require_work_image() {
            Ok(p) => p.to_path_buf(),
            Err(e) => return halt(ctx, e),
        };
        ui.say("Mapping image partitions...");
        match self.map(&image) {
            Ok(devices) => {
                self.mapped = true;
                for (i, dev) in devices.iter().enumerate() {
                    ui.say(&format!("  partition {}: {}", i + 1, dev.display()));
                }
                ctx.partitions = devices;
                StepOutcome::Continue
            }
            Err(e) => halt(ctx, e),
        }
    }

    fn cleanup(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) {
        if !self.mapped {
            return;
        }
        self.mapped = false;
        let image = match ctx.work_image.as_deref() {
            Some(p) => p.to_path_buf(),
            None => return,
        };
        // Detaching invalidates every derived partition device path.
        ctx.partitions.clear();
        if let Err(e) = Cmd::new("kpartx")
            .args(["-d", "-s"])
            .arg_path(&image)
            .error_msg("kpartx failed to unmap image")
            .run()
        {
            ui.warn(&format!("could not detach loop device: {:#}", e));
        }
    }
}

/// Parse `kpartx -av` output lines of the form
/// `add map loop0p1 (253:0): 0 114688 linear 7:0 8192`.
fn parse_kpartx_output(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("add map "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(|name| Path::new("/dev/mapper").join(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kpartx_output() {
        let out = "add map loop3p1 (253:0): 0 114688 linear 7:3 8192\n\
                   add map loop3p2 (253:1): 0 3499008 linear 7:3 122880\n";
        let devices = parse_kpartx_output(out);
        assert_eq!(
            devices,
            vec![
                PathBuf::from("/dev/mapper/loop3p1"),
                PathBuf::from("/dev/mapper/loop3p2"),
            ]
        );
    }

    #[test]
    fn test_parse_kpartx_ignores_noise() {
        let out = "device-mapper: reload ioctl failed\n";
        assert!(parse_kpartx_output(out).is_empty());
    }
}
