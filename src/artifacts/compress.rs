//! Producing the compressed copy of the static output.

use std::fs;
use std::io::Write;

use camino::Utf8Path;
use flate2::{Compression, write::GzEncoder};
use tracing::debug;

use super::filters::pattern_set;
use super::{ArtifactError, list_files};

/// Counts of files written by a [`Compressor`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CompressSummary {
    /// Files written gzip-encoded.
    pub compressed: usize,
    /// Files copied unchanged.
    pub copied: usize,
}

/// Builds the gzip staging tree from the rendered static output.
pub trait Compressor {
    /// Replaces `destination` with a copy of `source`, encoding files that
    /// should be served compressed.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when the tree cannot be copied.
    fn compress(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<CompressSummary, ArtifactError>;
}

impl<T: Compressor + ?Sized> Compressor for &T {
    fn compress(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<CompressSummary, ArtifactError> {
        (**self).compress(source, destination)
    }
}

/// Gzip-encodes files matching the gzip patterns and copies the rest.
///
/// Patterns use the storage CLI's matching rules, so every file the gzip
/// pass selects has been encoded.
///
/// Encoded files keep their names, since storage serves them with a
/// `content-encoding` header rather than a `.gz` suffix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GzipCompressor {
    patterns: Vec<String>,
}

impl GzipCompressor {
    /// Compresses files matching `patterns`.
    #[must_use]
    pub const fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }
}

fn io_error(path: &Utf8Path, err: &std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn gzip_file(source: &Utf8Path, destination: &Utf8Path) -> Result<(), ArtifactError> {
    let content = fs::read(source).map_err(|err| io_error(source, &err))?;
    let file = fs::File::create(destination).map_err(|err| io_error(destination, &err))?;
    let mut encoder = GzEncoder::new(file, Compression::best());
    encoder
        .write_all(&content)
        .map_err(|err| io_error(destination, &err))?;
    encoder
        .finish()
        .map_err(|err| io_error(destination, &err))?;
    Ok(())
}

impl Compressor for GzipCompressor {
    fn compress(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<CompressSummary, ArtifactError> {
        let gzip = pattern_set(&self.patterns)?;

        if destination.exists() {
            fs::remove_dir_all(destination).map_err(|err| io_error(destination, &err))?;
        }

        let mut summary = CompressSummary::default();
        for relative in list_files(source)? {
            let from = source.join(&relative);
            let to = destination.join(&relative);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|err| io_error(parent, &err))?;
            }
            if gzip.is_match(&relative) {
                gzip_file(&from, &to)?;
                summary.compressed += 1;
            } else {
                fs::copy(&from, &to).map_err(|err| io_error(&from, &err))?;
                summary.copied += 1;
            }
        }
        debug!(%source, %destination, compressed = summary.compressed, copied = summary.copied, "compressed static output");
        Ok(summary)
    }
}
