//! Classification of build-root files into exactly one sync category.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use walkdir::WalkDir;

use super::{ArtifactError, CompiledFilters, SyncFilters};

/// Subpaths of the build root that must never reach a bucket.
pub const DEFAULT_NEVER_DEPLOY: [&str; 2] = ["live-data", "sitemap.xml"];

/// Directory, relative to the build root, delivered by the assets pass.
pub const DEFAULT_ASSETS_PREFIX: &str = "assets";

/// The category a build-root file falls into.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ArtifactClass {
    /// Never transmitted by the build-root passes.
    Excluded,
    /// Transmitted with `content-encoding: gzip`.
    GzipSynced,
    /// Transmitted as is.
    PlainSynced,
}

/// Patterns deciding how build-root files are classified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionRules {
    gzip_patterns: Vec<String>,
    never_deploy: Vec<String>,
    assets_prefix: String,
}

impl PartitionRules {
    /// Rules with the default never-deploy list and assets prefix.
    #[must_use]
    pub fn new(gzip_patterns: Vec<String>) -> Self {
        Self {
            gzip_patterns,
            never_deploy: DEFAULT_NEVER_DEPLOY.iter().map(|path| (*path).to_owned()).collect(),
            assets_prefix: String::from(DEFAULT_ASSETS_PREFIX),
        }
    }

    /// Replaces the never-deploy subpaths.
    #[must_use]
    pub fn with_never_deploy(self, never_deploy: Vec<String>) -> Self {
        Self {
            never_deploy,
            ..self
        }
    }

    /// Replaces the assets prefix.
    #[must_use]
    pub fn with_assets_prefix(self, assets_prefix: impl Into<String>) -> Self {
        Self {
            assets_prefix: assets_prefix.into(),
            ..self
        }
    }

    /// Gzip include patterns, in file order.
    #[must_use]
    pub fn gzip_patterns(&self) -> &[String] {
        &self.gzip_patterns
    }

    /// Subpaths removed from the build root before syncing.
    #[must_use]
    pub fn never_deploy(&self) -> &[String] {
        &self.never_deploy
    }

    /// Assets directory relative to the build root.
    #[must_use]
    pub fn assets_prefix(&self) -> &str {
        &self.assets_prefix
    }

    /// Storage filter patterns excluding every never-deploy subpath and
    /// anything beneath it.
    #[must_use]
    pub fn exclusion_patterns(&self) -> Vec<String> {
        self.never_deploy.iter().flat_map(|path| subtree_patterns(path)).collect()
    }

    /// Filters for the pass uploading build-root files as they are.
    #[must_use]
    pub fn plain_filters(&self) -> SyncFilters {
        SyncFilters::new()
            .exclude_all(self.gzip_patterns.iter().cloned())
            .exclude_all(subtree_patterns(&self.assets_prefix))
            .exclude_all(self.exclusion_patterns())
    }

    /// Filters for the pass uploading gzip-encoded build-root files.
    #[must_use]
    pub fn gzip_filters(&self) -> SyncFilters {
        SyncFilters::new()
            .exclude("*")
            .include_all(self.gzip_patterns.iter().cloned())
            .exclude_all(subtree_patterns(&self.assets_prefix))
            .exclude_all(self.exclusion_patterns())
    }

    /// Filters for the pass uploading the assets directory.
    #[must_use]
    pub fn assets_filters(&self) -> SyncFilters {
        SyncFilters::new().exclude_all(self.exclusion_patterns())
    }

    /// Checks that every never-deploy entry and the assets prefix name a
    /// path strictly inside the build root.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::UnsafeSubpath`] for blank entries or entries
    /// with `.` or `..` components.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        self.never_deploy
            .iter()
            .chain(std::iter::once(&self.assets_prefix))
            .try_for_each(|path| ensure_inside_root(path))
    }

    /// Compiles the build-root pass filters into a matcher.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when the rules are unsafe or a pattern does
    /// not parse.
    pub fn compile(&self) -> Result<PartitionMatcher, ArtifactError> {
        self.validate()?;
        Ok(PartitionMatcher {
            plain: self.plain_filters().compile()?,
            gzip: self.gzip_filters().compile()?,
        })
    }
}

fn subtree_patterns(path: &str) -> [String; 2] {
    let trimmed = path.trim_matches('/');
    [trimmed.to_owned(), format!("{trimmed}/*")]
}

fn ensure_inside_root(path: &str) -> Result<(), ArtifactError> {
    let trimmed = path.trim_matches('/');
    let unsafe_path = || ArtifactError::UnsafeSubpath {
        path: path.to_owned(),
    };
    if trimmed.trim().is_empty() {
        return Err(unsafe_path());
    }
    if trimmed
        .split('/')
        .any(|component| component.is_empty() || component == "." || component == "..")
    {
        return Err(unsafe_path());
    }
    Ok(())
}

/// Compiled [`PartitionRules`].
///
/// A file is classified by the build-root pass that would transmit it, so the
/// partition always agrees with what reaches storage.
#[derive(Clone, Debug)]
pub struct PartitionMatcher {
    plain: CompiledFilters,
    gzip: CompiledFilters,
}

impl PartitionMatcher {
    /// Classifies a path relative to the build root. Exclusion wins over the
    /// gzip patterns.
    #[must_use]
    pub fn classify(&self, relative: &Utf8Path) -> ArtifactClass {
        if self.gzip.selects(relative) {
            ArtifactClass::GzipSynced
        } else if self.plain.selects(relative) {
            ArtifactClass::PlainSynced
        } else {
            ArtifactClass::Excluded
        }
    }
}

/// Every build-root file, relative to the root, by category.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ArtifactPartition {
    /// Files withheld from the build-root passes.
    pub excluded: Vec<Utf8PathBuf>,
    /// Files synced with gzip encoding.
    pub gzip: Vec<Utf8PathBuf>,
    /// Files synced without encoding.
    pub plain: Vec<Utf8PathBuf>,
}

impl ArtifactPartition {
    /// Walks `root` and classifies every regular file.
    ///
    /// A missing root yields an empty partition.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when the tree cannot be read or a pattern is
    /// invalid.
    pub fn scan(root: &Utf8Path, rules: &PartitionRules) -> Result<Self, ArtifactError> {
        let matcher = rules.compile()?;
        let mut partition = Self::default();
        for relative in list_files(root)? {
            match matcher.classify(&relative) {
                ArtifactClass::Excluded => partition.excluded.push(relative),
                ArtifactClass::GzipSynced => partition.gzip.push(relative),
                ArtifactClass::PlainSynced => partition.plain.push(relative),
            }
        }
        Ok(partition)
    }

    /// The category `relative` was placed in, if it was scanned.
    #[must_use]
    pub fn class_of(&self, relative: &Utf8Path) -> Option<ArtifactClass> {
        [
            (&self.excluded, ArtifactClass::Excluded),
            (&self.gzip, ArtifactClass::GzipSynced),
            (&self.plain, ArtifactClass::PlainSynced),
        ]
        .into_iter()
        .find(|(files, _)| files.iter().any(|file| file == relative))
        .map(|(_, class)| class)
    }

    /// Total number of classified files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.excluded.len() + self.gzip.len() + self.plain.len()
    }

    /// Returns `true` when no files were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Regular files under `root`, relative to it, in a stable order.
///
/// # Errors
///
/// Returns [`ArtifactError::Io`] when the walk fails or a path is not UTF-8.
pub fn list_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ArtifactError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| ArtifactError::Io {
            path: root.to_path_buf(),
            message: err.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8Path::from_path(entry.path()).ok_or_else(|| ArtifactError::Io {
            path: root.to_path_buf(),
            message: format!("non UTF-8 path {}", entry.path().display()),
        })?;
        let relative = path.strip_prefix(root).map_err(|err| ArtifactError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        files.push(relative.to_path_buf());
    }
    Ok(files)
}

/// Reads gzip include patterns: one per line, trimmed, skipping blank lines
/// and `#` comments.
///
/// # Errors
///
/// Returns [`ArtifactError::Io`] when the file cannot be read.
pub fn load_gzip_patterns(path: &Utf8Path) -> Result<Vec<String>, ArtifactError> {
    let io_error = |err: std::io::Error| ArtifactError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| ArtifactError::Io {
        path: path.to_path_buf(),
        message: String::from("pattern file path has no file name"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(io_error)?;
    let content = dir.read_to_string(file_name).map_err(io_error)?;
    Ok(parse_patterns(&content))
}

fn parse_patterns(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}
