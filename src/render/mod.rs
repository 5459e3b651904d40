//! Rendering service configuration templates into the local staging
//! directory.
//!
//! Templates live in `<template_dir>/<service>.<extension>` and render into
//! `<staging_dir>/<project>.<service>.<extension>`. Rendering is strict: a
//! template that refers to a key missing from the context fails instead of
//! producing a blank.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use thiserror::Error;
use tracing::debug;

use crate::secrets::Secret;
use crate::service::ServiceSpec;

/// A value available to templates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContextValue {
    /// Ordinary configuration value.
    Plain(String),
    /// Secret value, exposed only while rendering.
    Secret(Secret),
}

impl ContextValue {
    fn expose(&self) -> &str {
        match self {
            Self::Plain(value) => value,
            Self::Secret(secret) => secret.expose(),
        }
    }
}

/// Key/value mapping handed to the template engine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RenderContext {
    values: BTreeMap<String, ContextValue>,
}

impl RenderContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a plain value, replacing any previous value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(key.into(), ContextValue::Plain(value.into()));
    }

    /// Sets a secret value, replacing any previous value for `key`.
    pub fn insert_secret(&mut self, key: impl Into<String>, secret: Secret) {
        self.values.insert(key.into(), ContextValue::Secret(secret));
    }

    /// Merges every secret; secrets win over plain values with the same key.
    pub fn merge_secrets(&mut self, secrets: BTreeMap<String, Secret>) {
        for (key, secret) in secrets {
            self.insert_secret(key, secret);
        }
    }

    /// Returns the value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when the context holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reveals every value, secrets included, for a template engine.
    #[must_use]
    pub fn expose_all(&self) -> BTreeMap<&str, &str> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.expose()))
            .collect()
    }
}

/// Raised by a [`TemplateEngine`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TemplateError {
    /// The template refers to a key absent from the context.
    #[error("missing context key: {detail}")]
    MissingContextKey {
        /// Engine diagnostic locating the reference.
        detail: String,
    },
    /// The template could not be parsed or evaluated.
    #[error("malformed template: {detail}")]
    Malformed {
        /// Engine diagnostic.
        detail: String,
    },
}

/// Turns template text plus a context into rendered text.
pub trait TemplateEngine {
    /// Renders `template` against `context`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::MissingContextKey`] for unresolved references
    /// and [`TemplateError::Malformed`] for anything else.
    fn render_template(&self, template: &str, context: &RenderContext)
    -> Result<String, TemplateError>;
}

/// Jinja-compatible engine with strict undefined handling.
#[derive(Debug)]
pub struct JinjaEngine {
    env: Environment<'static>,
}

impl JinjaEngine {
    /// Creates an engine that refuses to render undefined values.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }
}

impl Default for JinjaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for JinjaEngine {
    fn render_template(
        &self,
        template: &str,
        context: &RenderContext,
    ) -> Result<String, TemplateError> {
        self.env
            .render_str(template, context.expose_all())
            .map_err(|err| match err.kind() {
                ErrorKind::UndefinedError => TemplateError::MissingContextKey {
                    detail: err.to_string(),
                },
                _ => TemplateError::Malformed {
                    detail: err.to_string(),
                },
            })
    }
}

/// A configuration file rendered for one service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedConf {
    /// Service the file belongs to.
    pub service_name: String,
    /// Where the rendered file was written.
    pub local_path: Utf8PathBuf,
    /// Rendered bytes.
    pub content: Vec<u8>,
}

/// Raised while rendering a service configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RenderError {
    /// The template could not be rendered.
    #[error("failed to render {service}: {source}")]
    Template {
        /// Service being rendered.
        service: String,
        /// Engine failure.
        #[source]
        source: TemplateError,
    },
    /// Reading the template or writing the result failed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

impl RenderError {
    /// Returns `true` when rendering failed on an unresolved key.
    #[must_use]
    pub const fn is_missing_context_key(&self) -> bool {
        matches!(
            self,
            Self::Template {
                source: TemplateError::MissingContextKey { .. },
                ..
            }
        )
    }
}

/// Renders service templates into the staging directory.
#[derive(Debug)]
pub struct ConfRenderer<E: TemplateEngine> {
    engine: E,
    template_dir: Utf8PathBuf,
    staging_dir: Utf8PathBuf,
    project: String,
}

impl<E: TemplateEngine> ConfRenderer<E> {
    /// Creates a renderer for `project`.
    pub fn new(
        engine: E,
        template_dir: impl Into<Utf8PathBuf>,
        staging_dir: impl Into<Utf8PathBuf>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            template_dir: template_dir.into(),
            staging_dir: staging_dir.into(),
            project: project.into(),
        }
    }

    /// Project identifier used in rendered file names.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Where `spec` renders to.
    #[must_use]
    pub fn rendered_path(&self, spec: &ServiceSpec) -> Utf8PathBuf {
        self.staging_dir.join(spec.rendered_file_name(&self.project))
    }

    /// Renders `spec` and writes the result, overwriting earlier renderings.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] when the template is missing, fails to render,
    /// or the staging file cannot be written.
    pub fn render(
        &self,
        spec: &ServiceSpec,
        context: &RenderContext,
    ) -> Result<RenderedConf, RenderError> {
        let template_name = spec.template_file_name();
        let template = read_file(&self.template_dir, &template_name)?;
        let rendered = self
            .engine
            .render_template(&template, context)
            .map_err(|source| RenderError::Template {
                service: spec.service_name.clone(),
                source,
            })?;

        let file_name = spec.rendered_file_name(&self.project);
        write_file(&self.staging_dir, &file_name, rendered.as_bytes())?;
        let local_path = self.staging_dir.join(&file_name);
        debug!(service = %spec.service_name, path = %local_path, "rendered configuration");

        Ok(RenderedConf {
            service_name: spec.service_name.clone(),
            local_path,
            content: rendered.into_bytes(),
        })
    }

    /// Renders every service, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`RenderError`] encountered.
    pub fn render_all(
        &self,
        specs: &[ServiceSpec],
        context: &RenderContext,
    ) -> Result<Vec<RenderedConf>, RenderError> {
        specs.iter().map(|spec| self.render(spec, context)).collect()
    }
}

fn io_error(path: &Utf8Path, err: &std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn read_file(dir_path: &Utf8Path, file_name: &str) -> Result<String, RenderError> {
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| io_error(dir_path, &err))?;
    dir.read_to_string(file_name)
        .map_err(|err| io_error(&dir_path.join(file_name), &err))
}

fn write_file(dir_path: &Utf8Path, file_name: &str, content: &[u8]) -> Result<(), RenderError> {
    Dir::create_ambient_dir_all(dir_path, ambient_authority())
        .map_err(|err| io_error(dir_path, &err))?;
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| io_error(dir_path, &err))?;
    dir.write(file_name, content)
        .map_err(|err| io_error(&dir_path.join(file_name), &err))
}

#[cfg(test)]
mod tests;
