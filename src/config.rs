//! Build configuration: recognized options, defaults, and validation.
//!
//! Configuration is deserialized from a JSON build file. `prepare()` applies
//! defaults, resolves the image-type profile, and reports every problem it
//! finds at once rather than stopping at the first.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Default qemu-user binary name, looked up on PATH when no override is set.
pub const DEFAULT_QEMU_BINARY: &str = "qemu-arm-static";

/// Placeholder replaced by the actual command in the wrapper template.
pub const COMMAND_PLACEHOLDER: &str = "{{command}}";

/// Known image-type profiles.
///
/// A profile supplies the default partition mount list and the default qemu
/// invocation arguments for a board family. The table is an explicit match,
/// constructed at the point of use; no global registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    RaspberryPi,
    BeagleBone,
}

impl ImageType {
    pub const ALL: [ImageType; 2] = [ImageType::RaspberryPi, ImageType::BeagleBone];

    /// Parse a configuration string into a known type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raspberrypi" => Some(ImageType::RaspberryPi),
            "beaglebone" => Some(ImageType::BeagleBone),
            _ => None,
        }
    }

    /// Configuration name of this type.
    pub fn name(self) -> &'static str {
        match self {
            ImageType::RaspberryPi => "raspberrypi",
            ImageType::BeagleBone => "beaglebone",
        }
    }

    /// Default mount points, in partition order: entry i is the mount point
    /// of partition i+1.
    pub fn default_mounts(self) -> &'static [&'static str] {
        match self {
            ImageType::RaspberryPi => &["/boot", "/"],
            ImageType::BeagleBone => &["/"],
        }
    }

    /// Default qemu invocation arguments.
    pub fn default_qemu_args(self) -> &'static [&'static str] {
        match self {
            ImageType::RaspberryPi => &[],
            ImageType::BeagleBone => &["-cpu", "cortex-a8"],
        }
    }

    /// Guess the image type from the base-image URL.
    ///
    /// Plain substring heuristic carried over from the original tooling;
    /// a URL containing "bone" for unrelated reasons will mis-detect.
    pub fn detect_from_url(url: &str) -> Option<Self> {
        if url.contains("raspbian") {
            return Some(ImageType::RaspberryPi);
        }
        if url.contains("bone") {
            return Some(ImageType::BeagleBone);
        }
        None
    }
}

/// An auxiliary mount placed inside the chroot: a (kind, source, target)
/// triplet. Kind "bind" bind-mounts the source directory; any other kind is
/// passed to `mount -t`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChrootMount {
    pub kind: String,
    pub source: String,
    pub target: String,
}

impl ChrootMount {
    pub fn new(kind: &str, source: &str, target: &str) -> Self {
        Self {
            kind: kind.to_string(),
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

/// The five conventional virtual filesystems a chroot needs: process info,
/// system info, device nodes, pseudo-terminals, and binfmt_misc for the
/// emulator registration.
pub fn default_chroot_mounts() -> Vec<ChrootMount> {
    vec![
        ChrootMount::new("proc", "proc", "/proc"),
        ChrootMount::new("sysfs", "sysfs", "/sys"),
        ChrootMount::new("bind", "/dev", "/dev"),
        ChrootMount::new("devpts", "devpts", "/dev/pts"),
        ChrootMount::new("binfmt_misc", "binfmt_misc", "/proc/sys/fs/binfmt_misc"),
    ]
}

/// Build configuration, immutable for the duration of a run once prepared.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Name of this build; used for default output paths.
    pub build_name: String,

    /// Base image URL(s). Tried in order until one downloads and verifies.
    pub image_urls: Vec<String>,
    /// Expected checksum of the base image.
    pub image_checksum: String,
    /// Checksum type: "sha256" (default), "sha1", "md5", or "none".
    pub image_checksum_type: String,

    /// Output directory for the working image. Default: `output-<build_name>`.
    pub output_directory: PathBuf,

    /// Image type, used to derive mounts and qemu args. If empty, detection
    /// from the URL is attempted.
    pub image_type: String,

    /// Mount point of each image partition inside the chroot, in partition
    /// order. Must list `/` before any path nested under it.
    pub image_mounts: Vec<String>,

    /// Auxiliary mounts placed inside the chroot. Empty means the standard
    /// five-entry default.
    pub chroot_mounts: Vec<ChrootMount>,

    /// Extra bytes appended to the last partition. 0 disables both resize
    /// stages.
    pub last_partition_extra_size: u64,

    /// qemu-user binary. Resolved on PATH during prepare.
    pub qemu_binary: String,
    /// qemu invocation arguments. Empty means the profile default.
    pub qemu_args: Vec<String>,

    /// Template every provision command is passed through. The literal
    /// `{{command}}` is replaced by the command; the default is the identity.
    pub command_wrapper: String,

    /// Commands the shell provisioning hook runs inside the chroot.
    pub provision_commands: Vec<String>,

    /// Resolved image type, populated by `prepare()`.
    #[serde(skip)]
    pub resolved_type: Option<ImageType>,
}

impl BuildConfig {
    /// Load configuration from a JSON build file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: BuildConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Apply defaults and validate.
    ///
    /// Returns accumulated warnings on success. On failure the error message
    /// lists every problem found, one per line, and no resource has been
    /// touched.
    pub fn prepare(&mut self) -> Result<Vec<String>> {
        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        if self.build_name.is_empty() {
            self.build_name = "arm-image".to_string();
        }

        if self.image_urls.is_empty() {
            errors.push("no image url provided".to_string());
        }
        if self.image_checksum_type.is_empty() {
            self.image_checksum_type = "sha256".to_string();
        }
        match self.image_checksum_type.as_str() {
            "none" => {
                warnings.push(
                    "checksum verification disabled; a corrupted download will not be caught"
                        .to_string(),
                );
            }
            "sha256" | "sha1" | "md5" => {
                if self.image_checksum.is_empty() {
                    errors.push("image_checksum is required (or set image_checksum_type to \"none\")".to_string());
                }
            }
            other => {
                errors.push(format!(
                    "unknown image_checksum_type \"{}\". must be one of: sha256, sha1, md5, none",
                    other
                ));
            }
        }

        if self.output_directory.as_os_str().is_empty() {
            self.output_directory = PathBuf::from(format!("output-{}", self.build_name));
        }

        if self.chroot_mounts.is_empty() {
            self.chroot_mounts = default_chroot_mounts();
        }

        if self.command_wrapper.is_empty() {
            self.command_wrapper = COMMAND_PLACEHOLDER.to_string();
        }

        // Resolve the image type. An explicit unknown type is an error and
        // never falls back to URL detection or a default.
        if self.image_type.is_empty() {
            self.resolved_type = self
                .image_urls
                .first()
                .and_then(|url| ImageType::detect_from_url(url));
        } else {
            match ImageType::parse(&self.image_type) {
                Some(t) => self.resolved_type = Some(t),
                None => {
                    let valid: Vec<&str> = ImageType::ALL.iter().map(|t| t.name()).collect();
                    errors.push(format!(
                        "unknown image_type \"{}\". must be one of: {}",
                        self.image_type,
                        valid.join(", ")
                    ));
                }
            }
        }

        if let Some(t) = self.resolved_type {
            if self.image_mounts.is_empty() {
                self.image_mounts = t.default_mounts().iter().map(|s| s.to_string()).collect();
            }
            if self.qemu_args.is_empty() {
                self.qemu_args = t
                    .default_qemu_args()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
            }
        }

        if self.image_mounts.is_empty() {
            errors.push(
                "no image mounts provided. set image_mounts or a known image_type".to_string(),
            );
        }

        if self.qemu_binary.is_empty() {
            self.qemu_binary = DEFAULT_QEMU_BINARY.to_string();
        }
        match which::which(&self.qemu_binary) {
            Ok(path) => {
                if !path.to_string_lossy().contains("qemu-") {
                    warnings.push(format!(
                        "\"{}\" doesn't look like a qemu-user binary",
                        path.display()
                    ));
                }
                self.qemu_binary = path.to_string_lossy().into_owned();
            }
            Err(_) => {
                errors.push(format!(
                    "qemu binary \"{}\" not found on PATH",
                    self.qemu_binary
                ));
            }
        }

        if !errors.is_empty() {
            bail!("invalid configuration:\n  {}", errors.join("\n  "));
        }
        Ok(warnings)
    }

    /// Run a command through the wrapper template.
    pub fn wrap_command(&self, command: &str) -> String {
        self.command_wrapper.replace(COMMAND_PLACEHOLDER, command)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_types() {
        assert_eq!(ImageType::parse("raspberrypi"), Some(ImageType::RaspberryPi));
        assert_eq!(ImageType::parse("beaglebone"), Some(ImageType::BeagleBone));
        assert_eq!(ImageType::parse("pinephone"), None);
        assert_eq!(ImageType::parse(""), None);
    }

    #[test]
    fn test_profile_defaults() {
        assert_eq!(ImageType::RaspberryPi.default_mounts(), &["/boot", "/"]);
        assert_eq!(ImageType::BeagleBone.default_mounts(), &["/"]);
        assert!(ImageType::RaspberryPi.default_qemu_args().is_empty());
        assert_eq!(
            ImageType::BeagleBone.default_qemu_args(),
            &["-cpu", "cortex-a8"]
        );
    }

    #[test]
    fn test_detect_from_url() {
        assert_eq!(
            ImageType::detect_from_url("http://downloads.example.org/raspbian-lite.zip"),
            Some(ImageType::RaspberryPi)
        );
        assert_eq!(
            ImageType::detect_from_url("http://example.org/bone-debian-9.img"),
            Some(ImageType::BeagleBone)
        );
        assert_eq!(
            ImageType::detect_from_url("http://example.org/alpine.img"),
            None
        );
    }

    #[test]
    fn test_default_chroot_mounts_are_five() {
        let mounts = default_chroot_mounts();
        assert_eq!(mounts.len(), 5);
        assert_eq!(mounts[0], ChrootMount::new("proc", "proc", "/proc"));
        assert_eq!(
            mounts[4],
            ChrootMount::new("binfmt_misc", "binfmt_misc", "/proc/sys/fs/binfmt_misc")
        );
    }

    #[test]
    fn test_wrap_command_identity_default() {
        let config = BuildConfig {
            command_wrapper: COMMAND_PLACEHOLDER.to_string(),
            ..Default::default()
        };
        assert_eq!(config.wrap_command("apt-get update"), "apt-get update");
    }

    #[test]
    fn test_wrap_command_prefix() {
        let config = BuildConfig {
            command_wrapper: "sudo sh -c '{{command}}'".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.wrap_command("echo hi"),
            "sudo sh -c 'echo hi'"
        );
    }

    #[test]
    fn test_config_json_roundtrip() {
        let json = r#"{
            "image_urls": ["http://example.org/raspbian.img"],
            "image_checksum": "abc123",
            "chroot_mounts": [
                {"kind": "proc", "source": "proc", "target": "/proc"}
            ],
            "last_partition_extra_size": 1048576
        }"#;
        let config: BuildConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.image_urls.len(), 1);
        assert_eq!(config.last_partition_extra_size, 1048576);
        assert_eq!(config.chroot_mounts.len(), 1);
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        let json = r#"{"image_url_typo": ["x"]}"#;
        assert!(serde_json::from_str::<BuildConfig>(json).is_err());
    }
}
