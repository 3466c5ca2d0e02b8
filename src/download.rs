//! Base-image download and checksum verification.
//!
//! Downloads are cached; a cached file that still verifies is reused without
//! touching the network. Corrupted downloads are deleted so the next attempt
//! starts clean.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

/// Fetches and checksum-verifies a base image.
pub trait Fetcher {
    /// Try each URL in order; return the path of the first download whose
    /// checksum verifies. `checksum_type` "none" skips verification.
    fn fetch(&self, urls: &[String], checksum: &str, checksum_type: &str) -> Result<PathBuf>;
}

/// Fetcher that shells out to curl and caches downloads on disk.
pub struct CurlFetcher {
    cache_dir: PathBuf,
}

impl CurlFetcher {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Cache under the user cache directory (`~/.cache/armimg` on Linux),
    /// falling back to `.armimg-cache` in the working directory.
    pub fn with_default_cache() -> Self {
        let cache_dir = dirs::cache_dir()
            .map(|d| d.join("armimg"))
            .unwrap_or_else(|| PathBuf::from(".armimg-cache"));
        Self::new(cache_dir)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        Cmd::new("curl")
            .args(["-L", "-f", "--progress-bar", "-o"])
            .arg_path(dest)
            .arg(url)
            .error_msg(format!("download failed: {}", url))
            .run()?;
        Ok(())
    }
}

impl Fetcher for CurlFetcher {
    fn fetch(&self, urls: &[String], checksum: &str, checksum_type: &str) -> Result<PathBuf> {
        if urls.is_empty() {
            bail!("no image url provided");
        }
        fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("Failed to create cache dir {}", self.cache_dir.display()))?;

        let mut last_error = None;
        for url in urls {
            let dest = self.cache_dir.join(cache_file_name(url));

            if dest.exists() && verify_checksum(&dest, checksum, checksum_type).is_ok() {
                return Ok(dest);
            }

            if let Err(e) = self.download(url, &dest) {
                last_error = Some(e);
                continue;
            }
            match verify_checksum(&dest, checksum, checksum_type) {
                Ok(()) => return Ok(dest),
                Err(e) => {
                    // Keep nothing that doesn't verify.
                    let _ = fs::remove_file(&dest);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("no image url could be downloaded")))
    }
}

/// Derive a cache file name from the URL's last path segment.
fn cache_file_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("image")
        .split(['?', '#'])
        .next()
        .unwrap_or("image")
        .to_string()
}

/// Verify a file against an expected checksum.
///
/// sha256 is computed in-process; sha1 and md5 shell out to the coreutils
/// checksum tools.
pub fn verify_checksum(path: &Path, expected: &str, checksum_type: &str) -> Result<()> {
    let actual = match checksum_type {
        "none" => return Ok(()),
        "sha256" => sha256_file(path)?,
        "sha1" | "md5" => {
            let tool = format!("{}sum", checksum_type);
            let result = Cmd::new(&tool)
                .arg_path(path)
                .error_msg(format!("{} failed", tool))
                .run()?;
            result
                .stdout_trimmed()
                .split_whitespace()
                .next()
                .with_context(|| format!("Could not parse {} output", tool))?
                .to_string()
        }
        other => bail!("unknown checksum type \"{}\"", other),
    };

    if !actual.eq_ignore_ascii_case(expected) {
        bail!(
            "Checksum mismatch for {}\n  Expected: {}\n  Got: {}",
            path.display(),
            expected,
            actual
        );
    }
    Ok(())
}

/// Streaming SHA256 of a file.
fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// =============================================================================
// Tests
// =============================================================================
