//! Content fingerprints for local and installed configuration files.
//!
//! Both sides use SHA-256: the local side hashes rendered bytes in-process and
//! the remote side runs `sha256sum`. A file that does not exist remotely has
//! the [`Fingerprint::Absent`] sentinel, which never matches a digest.

use std::fmt;

use camino::Utf8Path;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::command::RemoteCommand;
use crate::transport::RemoteTransport;

const SHA256_HEX_LEN: usize = 64;

/// Lowercase hex SHA-256 digest.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hashes `content`.
    #[must_use]
    pub fn of(content: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(content)))
    }

    /// Parses a hex digest, accepting either case.
    ///
    /// Returns `None` unless `raw` is exactly 64 hex digits.
    #[must_use]
    pub fn from_hex(raw: &str) -> Option<Self> {
        let candidate = raw.trim();
        if candidate.len() != SHA256_HEX_LEN || !candidate.chars().all(|ch| ch.is_ascii_hexdigit())
        {
            return None;
        }
        Some(Self(candidate.to_ascii_lowercase()))
    }

    /// Hex digits of the digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Fingerprint of an installed file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Fingerprint {
    /// The file exists and hashes to this digest.
    Digest(ContentHash),
    /// The file has never been installed.
    Absent,
}

impl Fingerprint {
    /// Returns `true` only when the installed digest equals `local`.
    #[must_use]
    pub fn matches(&self, local: &ContentHash) -> bool {
        matches!(self, Self::Digest(installed) if installed == local)
    }
}

/// The remote fingerprint could not be determined.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fingerprint of {path} on {host} unavailable: {reason}")]
pub struct FingerprintUnavailable {
    /// Host that was queried.
    pub host: String,
    /// Remote path that was probed.
    pub path: String,
    /// What went wrong.
    pub reason: String,
}

/// Fetches the fingerprint of `path` on `host`.
///
/// A `test -e` probe distinguishes an absent file (exit status 1) from one
/// that must be hashed.
///
/// # Errors
///
/// Returns [`FingerprintUnavailable`] when either remote command cannot be
/// delivered, exits unexpectedly, or prints something that is not a digest.
pub fn fetch_remote<T: RemoteTransport + ?Sized>(
    transport: &T,
    host: &str,
    path: &Utf8Path,
) -> Result<Fingerprint, FingerprintUnavailable> {
    let unavailable = |reason: String| FingerprintUnavailable {
        host: host.to_owned(),
        path: path.to_string(),
        reason,
    };

    let probe = RemoteCommand::new("test").arg("-e").arg(path.as_str());
    let probed = transport
        .run(host, &probe)
        .map_err(|err| unavailable(err.to_string()))?;
    match probed.exit_code {
        Some(0) => {}
        Some(1) => return Ok(Fingerprint::Absent),
        Some(code) => return Err(unavailable(format!("existence probe exited with {code}"))),
        None => return Err(unavailable(String::from("existence probe reported no status"))),
    }

    let hash = RemoteCommand::new("sha256sum").arg("--").arg(path.as_str());
    let output = transport
        .run_checked(host, &hash)
        .map_err(|err| unavailable(err.to_string()))?;
    output
        .stdout
        .split_whitespace()
        .next()
        .and_then(ContentHash::from_hex)
        .map(Fingerprint::Digest)
        .ok_or_else(|| unavailable(format!("unexpected sha256sum output: {:?}", output.stdout)))
}
