//! Ordered include/exclude filters for a storage sync pass.
//!
//! Filters follow the storage CLI's rules: every file starts out selected and
//! the *last* matching filter decides. Exclusions appended at the end of a
//! filter list therefore always win.
//!
//! Patterns are shell globs matched against the whole path relative to the
//! sync source. `*` crosses directory separators, so `graphics/*.html`
//! selects `graphics/a/index.html` and `live-data` names only the top-level
//! entry.

use std::fmt;

use camino::Utf8Path;
use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};

use super::ArtifactError;

/// A single include or exclude pattern.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FilterRule {
    /// Select matching files.
    Include(String),
    /// Skip matching files.
    Exclude(String),
}

impl FilterRule {
    /// The pattern text.
    #[must_use]
    pub fn pattern(&self) -> &str {
        match self {
            Self::Include(pattern) | Self::Exclude(pattern) => pattern,
        }
    }

    const fn flag(&self) -> &'static str {
        match self {
            Self::Include(_) => "--include",
            Self::Exclude(_) => "--exclude",
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.flag(), self.pattern())
    }
}

/// Ordered filter list.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncFilters {
    rules: Vec<FilterRule>,
}

impl SyncFilters {
    /// Creates an empty filter list that selects everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an exclusion.
    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(FilterRule::Exclude(pattern.into()));
        self
    }

    /// Appends an inclusion.
    #[must_use]
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(FilterRule::Include(pattern.into()));
        self
    }

    /// Appends an exclusion for every pattern.
    #[must_use]
    pub fn exclude_all<I, S>(self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        patterns.into_iter().fold(self, Self::exclude)
    }

    /// Appends an inclusion for every pattern.
    #[must_use]
    pub fn include_all<I, S>(self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        patterns.into_iter().fold(self, Self::include)
    }

    /// Filters in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Flattens the filters into CLI arguments.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        self.rules
            .iter()
            .flat_map(|rule| [rule.flag().to_owned(), rule.pattern().to_owned()])
            .collect()
    }

    /// Compiles every filter for local evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::InvalidPattern`] when a pattern does not
    /// parse.
    pub fn compile(&self) -> Result<CompiledFilters, ArtifactError> {
        let compiled = self
            .rules
            .iter()
            .map(|rule| {
                compile_one(rule.pattern()).map(|matcher| (matches!(rule, FilterRule::Include(_)), matcher))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CompiledFilters { rules: compiled })
    }
}

fn storage_glob(pattern: &str) -> Result<globset::Glob, ArtifactError> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(false)
        .build()
        .map_err(|err| ArtifactError::InvalidPattern {
            pattern: pattern.to_owned(),
            message: err.to_string(),
        })
}

fn compile_one(pattern: &str) -> Result<GlobMatcher, ArtifactError> {
    storage_glob(pattern).map(|glob| glob.compile_matcher())
}

/// Compiles `patterns` into a set matching any of them.
///
/// # Errors
///
/// Returns [`ArtifactError::InvalidPattern`] for the first pattern that does
/// not parse.
pub(super) fn pattern_set(patterns: &[String]) -> Result<GlobSet, ArtifactError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(storage_glob(pattern)?);
    }
    builder.build().map_err(|err| ArtifactError::InvalidPattern {
        pattern: patterns.join(" "),
        message: err.to_string(),
    })
}

/// [`SyncFilters`] ready to evaluate paths.
#[derive(Clone, Debug)]
pub struct CompiledFilters {
    rules: Vec<(bool, GlobMatcher)>,
}

impl CompiledFilters {
    /// Returns `true` when the pass would transmit `relative`.
    #[must_use]
    pub fn selects(&self, relative: &Utf8Path) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|(_, matcher)| matcher.is_match(relative))
            .is_none_or(|(include, _)| *include)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn empty_filters_select_everything() {
        let compiled = SyncFilters::new().compile().expect("compile");

        assert!(compiled.selects(Utf8Path::new("any/file.txt")));
    }

    #[rstest]
    #[case("index.html", true)]
    #[case("css/site.css", false)]
    #[case("live-data/feed.html", false)]
    fn last_matching_filter_wins(#[case] path: &str, #[case] selected: bool) {
        let filters = SyncFilters::new()
            .exclude("*")
            .include("*.html")
            .exclude_all(["live-data", "live-data/*"]);
        let compiled = filters.compile().expect("compile");

        assert_eq!(compiled.selects(Utf8Path::new(path)), selected);
    }

    #[rstest]
    #[case("graphics/a/index.html", true)]
    #[case("graphics/index.html", true)]
    #[case("index.html", false)]
    #[case("other/graphics/index.html", false)]
    fn star_crosses_directories_but_patterns_stay_anchored(
        #[case] path: &str,
        #[case] selected: bool,
    ) {
        let compiled = SyncFilters::new()
            .exclude("*")
            .include("graphics/*.html")
            .compile()
            .expect("compile");

        assert_eq!(compiled.selects(Utf8Path::new(path)), selected);
    }

    #[rstest]
    #[case("live-data", false)]
    #[case("live-data/feed.json", false)]
    #[case("graphics/a/live-data/x.html", true)]
    #[case("live-data.html", true)]
    fn exclusions_only_reach_the_named_top_level_entry(
        #[case] path: &str,
        #[case] selected: bool,
    ) {
        let compiled = SyncFilters::new()
            .exclude_all(["live-data", "live-data/*"])
            .compile()
            .expect("compile");

        assert_eq!(compiled.selects(Utf8Path::new(path)), selected);
    }

    #[rstest]
    fn malformed_patterns_are_reported() {
        let err = SyncFilters::new()
            .include("[*.html")
            .compile()
            .expect_err("unclosed class");

        assert!(matches!(err, ArtifactError::InvalidPattern { ref pattern, .. } if pattern == "[*.html"));
    }

    #[rstest]
    fn args_preserve_order() {
        let filters = SyncFilters::new().exclude("*").include("*.js");

        assert_eq!(filters.to_args(), vec!["--exclude", "*", "--include", "*.js"]);
    }
}
