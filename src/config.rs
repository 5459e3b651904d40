//! Tool settings loaded via `ortho-config`.
//!
//! Settings merge defaults, `deckhand.toml` and `DECKHAND_*` environment
//! variables. They describe *how* the orchestrator reaches hosts, buckets and
//! local files; the project itself is described by the manifest.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::transport::SshSettings;

/// Default region passed to the storage CLI.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Tool settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DECKHAND",
    discovery(
        app_name = "deckhand",
        env_var = "DECKHAND_CONFIG_PATH",
        config_file_name = "deckhand.toml",
        dotfile_name = ".deckhand.toml",
        project_file_name = "deckhand.toml"
    )
)]
pub struct DeploySettings {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `rsync` executable used for file copies.
    #[ortho_config(default = "rsync".to_owned())]
    pub rsync_bin: String,
    /// Path to the `aws` executable used for bucket syncs.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub ssh_user: String,
    /// SSH port on every host.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Private key for remote authentication; `~/` is expanded.
    pub ssh_identity_file: Option<String>,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Region handed to the storage CLI.
    #[ortho_config(default = DEFAULT_AWS_REGION.to_owned())]
    pub aws_region: String,
    /// Project manifest describing services and environments.
    #[ortho_config(default = "deploy.toml".to_owned())]
    pub manifest_path: String,
    /// Directory holding `<service>.<extension>` templates.
    #[ortho_config(default = "confs".to_owned())]
    pub template_dir: String,
    /// Directory receiving rendered configuration.
    #[ortho_config(default = "confs/rendered".to_owned())]
    pub staging_dir: String,
    /// Line-oriented list of gzip-include patterns.
    #[ortho_config(default = "gzip_types.txt".to_owned())]
    pub gzip_patterns_path: String,
    /// Rendered static output that gets compressed.
    #[ortho_config(default = "www".to_owned())]
    pub source_root: String,
    /// Compressed copy of the static output that gets synced.
    #[ortho_config(default = ".gzip".to_owned())]
    pub build_root: String,
    /// Fingerprinted assets synced with a long cache lifetime.
    #[ortho_config(default = "www/assets".to_owned())]
    pub assets_dir: String,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl DeploySettings {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to deckhand.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads settings from defaults, configuration files, environment
    /// variables, and CLI flags.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads settings without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("deckhand")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.ssh_bin,
                FieldMetadata::new("ssh binary", "DECKHAND_SSH_BIN", "ssh_bin"),
            ),
            (
                &self.rsync_bin,
                FieldMetadata::new("rsync binary", "DECKHAND_RSYNC_BIN", "rsync_bin"),
            ),
            (
                &self.aws_bin,
                FieldMetadata::new("aws binary", "DECKHAND_AWS_BIN", "aws_bin"),
            ),
            (
                &self.ssh_user,
                FieldMetadata::new("SSH user", "DECKHAND_SSH_USER", "ssh_user"),
            ),
            (
                &self.aws_region,
                FieldMetadata::new("storage region", "DECKHAND_AWS_REGION", "aws_region"),
            ),
            (
                &self.manifest_path,
                FieldMetadata::new("manifest path", "DECKHAND_MANIFEST_PATH", "manifest_path"),
            ),
            (
                &self.template_dir,
                FieldMetadata::new("template directory", "DECKHAND_TEMPLATE_DIR", "template_dir"),
            ),
            (
                &self.staging_dir,
                FieldMetadata::new("staging directory", "DECKHAND_STAGING_DIR", "staging_dir"),
            ),
            (
                &self.source_root,
                FieldMetadata::new("static output directory", "DECKHAND_SOURCE_ROOT", "source_root"),
            ),
            (
                &self.build_root,
                FieldMetadata::new("compressed output directory", "DECKHAND_BUILD_ROOT", "build_root"),
            ),
            (
                &self.assets_dir,
                FieldMetadata::new("assets directory", "DECKHAND_ASSETS_DIR", "assets_dir"),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        if let Some(identity) = self.ssh_identity_file.as_deref() {
            Self::require_field(
                identity,
                &FieldMetadata::new(
                    "SSH identity file",
                    "DECKHAND_SSH_IDENTITY_FILE",
                    "ssh_identity_file",
                ),
            )?;
        }
        Ok(())
    }

    /// Connection settings for the SSH transport.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            ssh_bin: self.ssh_bin.clone(),
            rsync_bin: self.rsync_bin.clone(),
            user: self.ssh_user.clone(),
            port: self.ssh_port,
            identity_file: self.ssh_identity_file.clone(),
            batch_mode: self.ssh_batch_mode,
        }
    }

    /// Manifest location.
    #[must_use]
    pub fn manifest_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.manifest_path)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
