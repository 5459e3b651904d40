//! Object storage access for the artifact passes.

use std::ffi::OsString;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use super::{ArtifactError, SyncFilters, list_files};
use crate::transport::{CommandRunner, ProcessCommandRunner, TransportError, require_success};

/// Which of the three sync passes a [`SyncPass`] describes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PassKind {
    /// Build-root files without encoding.
    Plain,
    /// Build-root files stored with `content-encoding: gzip`.
    Gzip,
    /// Fingerprinted assets with a long cache lifetime.
    Assets,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Plain => "plain",
            Self::Gzip => "gzip",
            Self::Assets => "assets",
        };
        f.write_str(label)
    }
}

/// One directory-to-bucket sync.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncPass {
    /// Pass category.
    pub kind: PassKind,
    /// Local directory whose contents are uploaded.
    pub source: Utf8PathBuf,
    /// Destination URL, `s3://<bucket>/<prefix>/...`.
    pub destination: String,
    /// Ordered include/exclude filters.
    pub filters: SyncFilters,
    /// Access control applied to uploaded objects.
    pub acl: String,
    /// `Cache-Control` header value.
    pub cache_control: String,
    /// `Content-Encoding` header value, if any.
    pub content_encoding: Option<String>,
}

impl SyncPass {
    /// Files under [`SyncPass::source`] the filters let through, relative to
    /// the source.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when the source cannot be walked or a filter
    /// does not compile.
    pub fn selected_files(&self) -> Result<Vec<Utf8PathBuf>, ArtifactError> {
        let compiled = self.filters.compile()?;
        Ok(list_files(&self.source)?
            .into_iter()
            .filter(|file| compiled.selects(file))
            .collect())
    }
}

/// Failure reported by a [`StorageSync`] implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StorageError {
    /// The storage command could not run or exited unsuccessfully.
    #[error(transparent)]
    Command(#[from] TransportError),
    /// The storage backend refused the request.
    #[error("storage rejected {destination}: {reason}")]
    Rejected {
        /// Destination URL.
        destination: String,
        /// Backend explanation.
        reason: String,
    },
}

/// Blocking access to an object storage mirror.
pub trait StorageSync {
    /// Uploads the files selected by `pass`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the sync fails.
    fn sync_directory(&self, pass: &SyncPass) -> Result<(), StorageError>;

    /// Recursively deletes everything under `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the removal fails.
    fn purge(&self, destination: &str) -> Result<(), StorageError>;
}

impl<T: StorageSync + ?Sized> StorageSync for &T {
    fn sync_directory(&self, pass: &SyncPass) -> Result<(), StorageError> {
        (**self).sync_directory(pass)
    }

    fn purge(&self, destination: &str) -> Result<(), StorageError> {
        (**self).purge(destination)
    }
}

/// Drives the `aws s3` command line client.
#[derive(Clone, Debug)]
pub struct AwsCliStorage<R: CommandRunner> {
    aws_bin: String,
    region: String,
    runner: R,
}

impl AwsCliStorage<ProcessCommandRunner> {
    /// Uses the real process runner.
    #[must_use]
    pub fn with_process_runner(aws_bin: impl Into<String>, region: impl Into<String>) -> Self {
        Self::new(aws_bin, region, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> AwsCliStorage<R> {
    /// Creates a client that runs commands through `runner`.
    pub fn new(aws_bin: impl Into<String>, region: impl Into<String>, runner: R) -> Self {
        Self {
            aws_bin: aws_bin.into(),
            region: region.into(),
            runner,
        }
    }

    fn build_sync_args(&self, pass: &SyncPass) -> Vec<OsString> {
        let mut args: Vec<String> = vec![
            String::from("s3"),
            String::from("sync"),
            source_with_slash(&pass.source),
            pass.destination.clone(),
            String::from("--acl"),
            pass.acl.clone(),
        ];
        if let Some(encoding) = pass.content_encoding.as_ref() {
            args.push(String::from("--content-encoding"));
            args.push(encoding.clone());
        }
        args.extend(pass.filters.to_args());
        args.extend([
            String::from("--cache-control"),
            pass.cache_control.clone(),
            String::from("--region"),
            self.region.clone(),
        ]);
        args.into_iter().map(OsString::from).collect()
    }

    fn build_purge_args(&self, destination: &str) -> Vec<OsString> {
        [
            "s3",
            "rm",
            destination,
            "--recursive",
            "--region",
            self.region.as_str(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect()
    }
}

fn source_with_slash(source: &Utf8Path) -> String {
    let raw = source.as_str();
    if raw.ends_with('/') {
        raw.to_owned()
    } else {
        format!("{raw}/")
    }
}

impl<R: CommandRunner> StorageSync for AwsCliStorage<R> {
    fn sync_directory(&self, pass: &SyncPass) -> Result<(), StorageError> {
        let args = self.build_sync_args(pass);
        debug!(pass = %pass.kind, destination = %pass.destination, ?args, "syncing to storage");
        let output = self.runner.run(&self.aws_bin, &args)?;
        require_success(&self.aws_bin, output)?;
        Ok(())
    }

    fn purge(&self, destination: &str) -> Result<(), StorageError> {
        let args = self.build_purge_args(destination);
        debug!(destination, "purging storage prefix");
        let output = self.runner.run(&self.aws_bin, &args)?;
        require_success(&self.aws_bin, output)?;
        Ok(())
    }
}
