//! Secret values merged into configuration templates.
//!
//! Secrets only leave a [`Secret`] when a template is rendered; their `Debug`
//! and `Display` output is redacted so they cannot end up in logs.

use std::collections::BTreeMap;
use std::env;
use std::fmt;

use thiserror::Error;

const REDACTED: &str = "[redacted]";

/// A value that must not be logged or persisted by the orchestrator.
#[derive(Clone, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reveals the value for rendering.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Raised when secrets cannot be collected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SecretsError {
    /// The provider could not be read.
    #[error("secrets unavailable: {0}")]
    Unavailable(String),
}

/// Source of secrets for template rendering.
pub trait SecretsProvider {
    /// Returns every secret keyed by the name templates refer to.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError`] when the source cannot be read.
    fn secrets(&self) -> Result<BTreeMap<String, Secret>, SecretsError>;
}

/// Collects environment variables whose names start with a project prefix.
///
/// For a project called `lookup` every `LOOKUP_*` variable is returned under
/// its full name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvSecrets {
    prefix: String,
}

impl EnvSecrets {
    /// Reads secrets for `project`, upper-casing it and mapping `-` to `_`.
    #[must_use]
    pub fn for_project(project: &str) -> Self {
        Self {
            prefix: format!("{}_", project.to_uppercase().replace('-', "_")),
        }
    }

    /// The variable name prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl SecretsProvider for EnvSecrets {
    fn secrets(&self) -> Result<BTreeMap<String, Secret>, SecretsError> {
        Ok(env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .filter(|(key, _)| key.starts_with(&self.prefix))
            .map(|(key, value)| (key, Secret::new(value)))
            .collect())
    }
}

impl<T: SecretsProvider + ?Sized> SecretsProvider for &T {
    fn secrets(&self) -> Result<BTreeMap<String, Secret>, SecretsError> {
        (**self).secrets()
    }
}
