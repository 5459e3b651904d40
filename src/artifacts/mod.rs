//! Synchronising the static build to object storage.
//!
//! Every bucket receives three passes under the project prefix:
//!
//! - **plain**: build-root files that are neither gzip-encoded nor assets,
//!   cached for five seconds;
//! - **gzip**: build-root files matching the gzip patterns, stored with
//!   `content-encoding: gzip` and the same short cache lifetime;
//! - **assets**: the assets directory, cached for a day.
//!
//! Never-deploy paths are deleted from the build root before syncing and
//! excluded from every pass. A failing pass is recorded and the remaining
//! passes and buckets still run.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{info, warn};

mod compress;
mod filters;
mod partition;
mod storage;

pub use compress::{CompressSummary, Compressor, GzipCompressor};
pub use filters::{CompiledFilters, FilterRule, SyncFilters};
pub use partition::{
    ArtifactClass, ArtifactPartition, DEFAULT_ASSETS_PREFIX, DEFAULT_NEVER_DEPLOY,
    PartitionMatcher, PartitionRules, list_files, load_gzip_patterns,
};
pub use storage::{AwsCliStorage, PassKind, StorageError, StorageSync, SyncPass};

/// Access control applied to every uploaded object.
pub const PUBLIC_READ: &str = "public-read";

/// Cache lifetime for build-root files.
pub const SHORT_CACHE: &str = "max-age=5";

/// Cache lifetime for fingerprinted assets.
pub const LONG_CACHE: &str = "max-age=86400";

/// Raised while preparing artifacts locally.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArtifactError {
    /// A local file or directory could not be read or written.
    #[error("artifact I/O failed at {path}: {message}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// A never-deploy entry or the assets prefix does not name a path inside
    /// the build root.
    #[error("{path:?} does not name a path inside the build root")]
    UnsafeSubpath {
        /// Offending entry.
        path: String,
    },
    /// A gzip or exclusion pattern is invalid.
    #[error("invalid artifact pattern {pattern}: {message}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Parser diagnostic.
        message: String,
    },
}

/// What to sync and where.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncRequest {
    /// Compressed copy of the static output.
    pub build_root: Utf8PathBuf,
    /// Fingerprinted assets directory.
    pub assets_root: Utf8PathBuf,
    /// Buckets receiving the artifacts, in order.
    pub buckets: Vec<String>,
    /// Project prefix inside each bucket.
    pub prefix: String,
    /// Classification rules.
    pub rules: PartitionRules,
}

impl SyncRequest {
    /// Destination URL for the project prefix in `bucket`.
    #[must_use]
    pub fn destination(&self, bucket: &str) -> String {
        prefix_url(bucket, &self.prefix)
    }

    /// The three passes for `bucket`, in execution order.
    #[must_use]
    pub fn passes(&self, bucket: &str) -> Vec<SyncPass> {
        let destination = self.destination(bucket);

        let plain = SyncPass {
            kind: PassKind::Plain,
            source: self.build_root.clone(),
            destination: destination.clone(),
            filters: self.rules.plain_filters(),
            acl: String::from(PUBLIC_READ),
            cache_control: String::from(SHORT_CACHE),
            content_encoding: None,
        };
        let gzipped = SyncPass {
            kind: PassKind::Gzip,
            source: self.build_root.clone(),
            destination: destination.clone(),
            filters: self.rules.gzip_filters(),
            acl: String::from(PUBLIC_READ),
            cache_control: String::from(SHORT_CACHE),
            content_encoding: Some(String::from("gzip")),
        };
        let assets = SyncPass {
            kind: PassKind::Assets,
            source: self.assets_root.clone(),
            destination: format!("{destination}{}/", self.rules.assets_prefix().trim_matches('/')),
            filters: self.rules.assets_filters(),
            acl: String::from(PUBLIC_READ),
            cache_control: String::from(LONG_CACHE),
            content_encoding: None,
        };
        vec![plain, gzipped, assets]
    }
}

fn prefix_url(bucket: &str, prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        format!("s3://{bucket}/")
    } else {
        format!("s3://{bucket}/{trimmed}/")
    }
}

/// A pass that reached storage successfully.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PassRecord {
    /// Bucket the pass targeted.
    pub bucket: String,
    /// Which pass ran.
    pub kind: PassKind,
}

/// A pass that failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PassFailure {
    /// Bucket the pass targeted.
    pub bucket: String,
    /// Which pass failed.
    pub kind: PassKind,
    /// Storage error.
    pub error: StorageError,
}

/// Result of [`ArtifactSync::sync`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncReport {
    /// How build-root files were classified.
    pub partition: ArtifactPartition,
    /// Passes that succeeded, in execution order.
    pub completed: Vec<PassRecord>,
    /// Passes that failed, in execution order.
    pub failures: Vec<PassFailure>,
}

impl SyncReport {
    /// Returns `true` when every pass succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failed passes.
    #[must_use]
    pub fn failures(&self) -> &[PassFailure] {
        &self.failures
    }
}

/// A bucket prefix that could not be removed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PurgeFailure {
    /// Destination URL.
    pub destination: String,
    /// Storage error.
    pub error: StorageError,
}

/// Result of [`ArtifactSync::purge`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PurgeReport {
    /// Destinations removed.
    pub purged: Vec<String>,
    /// Destinations that could not be removed.
    pub failures: Vec<PurgeFailure>,
}

impl PurgeReport {
    /// Returns `true` when every destination was removed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs sync passes and purges against a [`StorageSync`] backend.
#[derive(Clone, Debug)]
pub struct ArtifactSync<S: StorageSync> {
    storage: S,
}

impl<S: StorageSync> ArtifactSync<S> {
    /// Creates a sync engine over `storage`.
    pub const fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Deletes never-deploy paths, partitions the build root, and runs the
    /// three passes for every bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when the rules are unsafe or local
    /// preparation fails. Storage failures are recorded in the report
    /// instead.
    pub fn sync(&self, request: &SyncRequest) -> Result<SyncReport, ArtifactError> {
        request.rules.validate()?;
        remove_never_deploy(&request.build_root, request.rules.never_deploy())?;
        let partition = ArtifactPartition::scan(&request.build_root, &request.rules)?;
        info!(
            gzip = partition.gzip.len(),
            plain = partition.plain.len(),
            excluded = partition.excluded.len(),
            "partitioned build output"
        );

        let mut report = SyncReport {
            partition,
            ..SyncReport::default()
        };
        for bucket in &request.buckets {
            for pass in request.passes(bucket) {
                match self.storage.sync_directory(&pass) {
                    Ok(()) => {
                        info!(bucket = %bucket, pass = %pass.kind, "synced");
                        report.completed.push(PassRecord {
                            bucket: bucket.clone(),
                            kind: pass.kind,
                        });
                    }
                    Err(error) => {
                        warn!(bucket = %bucket, pass = %pass.kind, error = %error, "sync pass failed");
                        report.failures.push(PassFailure {
                            bucket: bucket.clone(),
                            kind: pass.kind,
                            error,
                        });
                    }
                }
            }
        }
        Ok(report)
    }

    /// Recursively removes the project prefix from every bucket, continuing
    /// past failures.
    pub fn purge(&self, buckets: &[String], prefix: &str) -> PurgeReport {
        let mut report = PurgeReport::default();
        for bucket in buckets {
            let destination = prefix_url(bucket, prefix);
            match self.storage.purge(&destination) {
                Ok(()) => {
                    info!(%destination, "purged");
                    report.purged.push(destination);
                }
                Err(error) => {
                    warn!(%destination, error = %error, "purge failed");
                    report.failures.push(PurgeFailure { destination, error });
                }
            }
        }
        report
    }
}

fn remove_never_deploy(build_root: &Utf8Path, never_deploy: &[String]) -> Result<(), ArtifactError> {
    for relative in never_deploy {
        let target = build_root.join(relative.trim_matches('/'));
        let removed = if target.is_dir() {
            fs::remove_dir_all(&target)
        } else if target.exists() {
            fs::remove_file(&target)
        } else {
            continue;
        };
        removed.map_err(|err| ArtifactError::Io {
            path: target.clone(),
            message: err.to_string(),
        })?;
        info!(path = %target, "removed never-deploy path");
    }
    Ok(())
}
