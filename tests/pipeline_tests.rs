//! End-to-end pipeline behavior that doesn't need root or system tools:
//! terminal outcomes of `Builder::run`, the cancellation watcher, and the
//! artifact surface.

mod helpers;

use anyhow::{bail, Result};
use helpers::TestEnv;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use armimg::artifact::Artifact;
use armimg::builder::Builder;
use armimg::config::BuildConfig;
use armimg::download::Fetcher;
use armimg::hook::{NullHook, ProvisionHook};
use armimg::ui::{NullUi, Ui};

struct FailingFetcher;

impl Fetcher for FailingFetcher {
    fn fetch(&self, _urls: &[String], _checksum: &str, _checksum_type: &str) -> Result<PathBuf> {
        bail!("host unreachable")
    }
}

/// Hook that records whether its cancel() was called.
struct CancelSpy {
    cancelled: AtomicBool,
}

impl ProvisionHook for CancelSpy {
    fn provision(&self, _chroot: &std::path::Path, _wrap: &dyn Fn(&str) -> String, _ui: &dyn Ui) -> Result<()> {
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

fn runnable_config(env: &TestEnv) -> BuildConfig {
    BuildConfig {
        image_urls: vec!["http://example.org/raspbian.img".to_string()],
        image_checksum_type: "none".to_string(),
        image_mounts: vec!["/".to_string()],
        qemu_binary: env
            .fake_executable("qemu-arm-static")
            .to_string_lossy()
            .into_owned(),
        output_directory: env.root.join("output"),
        ..Default::default()
    }
}

#[test]
fn test_fetch_failure_propagates_as_the_terminal_error() {
    let env = TestEnv::new();
    let mut builder = Builder::new(runnable_config(&env));

    let err = builder
        .run(&NullUi, Arc::new(NullHook), Arc::new(FailingFetcher))
        .unwrap_err();

    assert!(err.to_string().contains("host unreachable"));
    // The pipeline never produced a working image.
    assert!(!env.root.join("output").join("arm-image.img").exists());
}

#[test]
fn test_cancelled_run_reports_canceled_outcome_and_notifies_hook() {
    let env = TestEnv::new();
    let mut builder = Builder::new(runnable_config(&env));

    let handle = builder.cancel_handle();
    handle.cancel();

    let spy = Arc::new(CancelSpy {
        cancelled: AtomicBool::new(false),
    });
    let err = builder
        .run(&NullUi, spy.clone(), Arc::new(FailingFetcher))
        .unwrap_err();

    assert_eq!(err.to_string(), "step canceled or halted");
    // The watcher asked the provisioning hook to stop.
    assert!(spy.cancelled.load(Ordering::SeqCst));
}

#[test]
fn test_watcher_exits_when_run_finishes_without_cancel() {
    let env = TestEnv::new();
    let mut builder = Builder::new(runnable_config(&env));

    let spy = Arc::new(CancelSpy {
        cancelled: AtomicBool::new(false),
    });
    // Run fails at download, finishes, and must not signal the hook.
    let _ = builder.run(&NullUi, spy.clone(), Arc::new(FailingFetcher));

    assert!(!spy.cancelled.load(Ordering::SeqCst));
}

#[test]
fn test_artifact_is_one_file_and_destroy_deletes_it() {
    let env = TestEnv::new();
    let image = env.root.join("arm-image.img");
    std::fs::write(&image, b"image-bytes").unwrap();

    let artifact = Artifact::new(image.clone());
    assert_eq!(artifact.files(), vec![image.as_path()]);
    assert_eq!(artifact.id(), image.to_string_lossy());
    assert_eq!(artifact.to_string(), image.to_string_lossy());

    artifact.destroy().expect("destroy should remove the file");
    assert!(!image.exists());
}
