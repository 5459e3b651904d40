//! The project manifest: services, environments and template values.
//!
//! ```toml
//! [project]
//! name = "lookup"
//! repository_url = "git@example.org:apps/lookup.git"
//!
//! [app]
//! deploy_services = true
//!
//! [[services]]
//! name = "nginx"
//! install_root_path = "/etc/nginx/locations-enabled"
//! extension = "conf"
//!
//! [environments.staging]
//! hosts = ["web1.example.org"]
//! branch = "master"
//! deploy_to_servers = true
//! buckets = ["staging.example.org"]
//!
//! [context]
//! SERVER_NAME = "apps.example.org"
//! ```

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use serde::Deserialize;
use thiserror::Error;

use crate::artifacts::{self, ArtifactError, PartitionRules};
use crate::config::DeploySettings;
use crate::deploy::{DEFAULT_GIT_REMOTE, DeployPlan, STABLE_BRANCH};
use crate::render::RenderContext;
use crate::secrets::{SecretsError, SecretsProvider};
use crate::server::ServerLayout;
use crate::service::{AppRuntime, ServiceError, ServiceKind, ServiceSpec, ensure_unique};
use crate::targets::{Environment, TargetError, TargetRegistry};

/// Errors raised while loading or using a manifest.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ManifestError {
    /// The manifest could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying error.
        message: String,
    },
    /// The manifest is not valid TOML for this schema.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        message: String,
    },
    /// A required value is blank.
    #[error("manifest field {field} must not be empty")]
    Blank {
        /// Dotted field name.
        field: String,
    },
    /// A service declaration is invalid.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// An environment declaration is invalid.
    #[error(transparent)]
    Target(#[from] TargetError),
    /// Secrets could not be collected.
    #[error(transparent)]
    Secrets(#[from] SecretsError),
    /// Artifact rules are unsafe or the gzip pattern list could not be
    /// loaded.
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
}

/// `[project]` table.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ProjectSection {
    /// Project identifier used in file names and bucket prefixes.
    pub name: String,
    /// Repository cloned on setup.
    pub repository_url: String,
    /// Optional mirror added as a second remote.
    #[serde(default)]
    pub repository_alt_url: Option<String>,
    /// Remote account that owns the checkout.
    #[serde(default = "default_server_user")]
    pub server_user: String,
    /// Prefix inside each bucket; defaults to the project name.
    #[serde(default)]
    pub bucket_prefix: Option<String>,
}

fn default_server_user() -> String {
    String::from("ubuntu")
}

/// `[app]` table.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct AppSection {
    /// Install the repository crontab on remote deploys.
    pub deploy_crontab: bool,
    /// Reconcile service configuration on remote deploys.
    pub deploy_services: bool,
    /// Branch production may receive without confirmation.
    pub stable_branch: String,
    /// Git remote pulled from during checkout.
    pub git_remote: String,
    /// Command, and its leading arguments, that renders the static site.
    pub render_command: Vec<String>,
    /// Build-root subpaths that must never be synced.
    pub never_deploy: Option<Vec<String>>,
    /// Application socket and log files; conventional paths when omitted.
    pub runtime: Option<AppRuntime>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            deploy_crontab: false,
            deploy_services: false,
            stable_branch: String::from(STABLE_BRANCH),
            git_remote: String::from(DEFAULT_GIT_REMOTE),
            render_command: Vec::new(),
            never_deploy: None,
            runtime: None,
        }
    }
}

/// One `[[services]]` entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ServiceEntry {
    /// Service name; also the template's base name.
    pub name: String,
    /// Remote directory receiving the rendered file.
    pub install_root_path: Utf8PathBuf,
    /// File extension.
    pub extension: String,
    /// Explicit kind for names that cannot be inferred.
    #[serde(default)]
    pub kind: Option<ServiceKind>,
}

impl ServiceEntry {
    fn to_spec(&self) -> Result<ServiceSpec, ServiceError> {
        match self.kind {
            Some(kind) => ServiceSpec::with_kind(
                self.name.as_str(),
                self.install_root_path.clone(),
                self.extension.as_str(),
                kind,
            ),
            None => ServiceSpec::new(
                self.name.as_str(),
                self.install_root_path.clone(),
                self.extension.as_str(),
            ),
        }
    }
}

/// One `[environments.<name>]` table.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct EnvironmentEntry {
    /// Hosts in visiting order.
    pub hosts: Vec<String>,
    /// Default branch.
    pub branch: String,
    /// Whether code and configuration go to `hosts`.
    pub deploy_to_servers: bool,
    /// Buckets receiving the static artifacts.
    pub buckets: Vec<String>,
}

/// Everything a project declares about its deployment.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ProjectManifest {
    /// `[project]` table.
    pub project: ProjectSection,
    /// `[app]` table.
    #[serde(default)]
    pub app: AppSection,
    /// `[[services]]` entries, in declared order.
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    /// `[environments.<name>]` tables.
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentEntry>,
    /// Plain template values.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ProjectManifest {
    /// Reads and validates the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the file cannot be read or parsed, or
    /// fails validation.
    pub fn load(path: &Utf8Path) -> Result<Self, ManifestError> {
        let contents = read_manifest(path)?;
        Self::parse(path, &contents)
    }

    /// Parses and validates manifest text; `path` is used in diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the text is invalid.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, ManifestError> {
        let manifest: Self = toml::from_str(contents).map_err(|err| ManifestError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks names, services, environments and never-deploy paths.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ManifestError> {
        for (value, field) in [
            (self.project.name.as_str(), "project.name"),
            (self.project.server_user.as_str(), "project.server_user"),
            (self.app.stable_branch.as_str(), "app.stable_branch"),
            (self.app.git_remote.as_str(), "app.git_remote"),
        ] {
            if value.trim().is_empty() {
                return Err(ManifestError::Blank {
                    field: field.to_owned(),
                });
            }
        }
        if let Some(never_deploy) = self.app.never_deploy.as_ref() {
            PartitionRules::new(Vec::new())
                .with_never_deploy(never_deploy.clone())
                .validate()?;
        }
        self.services()?;
        self.registry()?;
        Ok(())
    }

    /// Project identifier.
    #[must_use]
    pub fn project_name(&self) -> &str {
        &self.project.name
    }

    /// Declared services, in order.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] for blank fields, unknown kinds or duplicate
    /// names.
    pub fn services(&self) -> Result<Vec<ServiceSpec>, ServiceError> {
        let specs = self
            .services
            .iter()
            .map(ServiceEntry::to_spec)
            .collect::<Result<Vec<_>, _>>()?;
        ensure_unique(&specs)?;
        Ok(specs)
    }

    /// Registry of the declared environments.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError`] for blank names.
    pub fn registry(&self) -> Result<TargetRegistry, TargetError> {
        let mut registry = TargetRegistry::new();
        for (name, entry) in &self.environments {
            registry.register(Environment {
                name: name.clone(),
                hosts: entry.hosts.clone(),
                branch: entry.branch.clone(),
                deploy_to_servers: entry.deploy_to_servers,
                buckets: entry.buckets.clone(),
            })?;
        }
        Ok(registry)
    }

    /// Template values from `[context]` merged with `secrets`.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError`] when the provider fails.
    pub fn render_context(&self, secrets: &impl SecretsProvider) -> Result<RenderContext, SecretsError> {
        let mut context = RenderContext::new();
        for (key, value) in &self.context {
            context.insert(key.as_str(), value.as_str());
        }
        context.merge_secrets(secrets.secrets()?);
        Ok(context)
    }

    /// Application runtime files.
    #[must_use]
    pub fn runtime(&self) -> AppRuntime {
        self.app
            .runtime
            .clone()
            .unwrap_or_else(|| AppRuntime::for_project(&self.project.name))
    }

    /// Where the project lives on its hosts.
    #[must_use]
    pub fn layout(&self) -> ServerLayout {
        let mut layout = ServerLayout::for_project(
            &self.project.name,
            &self.project.server_user,
            self.project.repository_url.as_str(),
        );
        layout.repository_alt_url = self
            .project
            .repository_alt_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_owned);
        layout
    }

    /// Static render command split into program and arguments.
    #[must_use]
    pub fn render_command(&self) -> Option<(&str, &[String])> {
        self.app
            .render_command
            .split_first()
            .map(|(program, args)| (program.as_str(), args))
    }

    /// Deploy plan combining the manifest with tool settings; reads the
    /// gzip pattern list.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Artifacts`] when the pattern list cannot be
    /// read or parsed.
    pub fn plan(&self, settings: &DeploySettings) -> Result<DeployPlan, ManifestError> {
        let patterns = artifacts::load_gzip_patterns(Utf8Path::new(&settings.gzip_patterns_path))?;
        let mut rules = PartitionRules::new(patterns);
        if let Some(never_deploy) = self.app.never_deploy.clone() {
            rules = rules.with_never_deploy(never_deploy);
        }
        Ok(DeployPlan {
            deploy_crontab: self.app.deploy_crontab,
            deploy_services: self.app.deploy_services,
            stable_branch: self.app.stable_branch.clone(),
            git_remote: self.app.git_remote.clone(),
            source_root: Utf8PathBuf::from(&settings.source_root),
            build_root: Utf8PathBuf::from(&settings.build_root),
            assets_root: Utf8PathBuf::from(&settings.assets_dir),
            prefix: self
                .project
                .bucket_prefix
                .clone()
                .unwrap_or_else(|| self.project.name.clone()),
            rules,
        })
    }
}

fn read_manifest(path: &Utf8Path) -> Result<String, ManifestError> {
    let io_error = |err: std::io::Error| ManifestError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| ManifestError::Io {
        path: path.to_path_buf(),
        message: String::from("manifest path has no file name"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(io_error)?;
    dir.read_to_string(file_name).map_err(io_error)
}
