//! The build's tangible output: a single provisioned disk image.

use anyhow::Result;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Identifier of this builder, recorded alongside artifacts by hosts that
/// track provenance.
pub const BUILDER_ID: &str = "armimg.arm-image";

/// A finished disk image. Immutable once produced; identity is the file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    image: PathBuf,
}

impl Artifact {
    pub fn new(image: PathBuf) -> Self {
        Self { image }
    }

    /// The one file this artifact consists of.
    pub fn files(&self) -> Vec<&Path> {
        vec![self.image.as_path()]
    }

    /// Artifact identity.
    pub fn id(&self) -> String {
        self.image.to_string_lossy().into_owned()
    }

    /// Identifier of the builder that produced this artifact.
    pub fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    /// Path to the image file.
    pub fn image_path(&self) -> &Path {
        &self.image
    }

    /// Remove the backing file from disk.
    pub fn destroy(&self) -> Result<()> {
        fs::remove_file(&self.image)?;
        Ok(())
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.image.display())
    }
}
