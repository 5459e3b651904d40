//! SSH and rsync backed transport.

use std::ffi::OsString;

use camino::Utf8Path;
use tracing::debug;

use super::{
    CommandRunner, ProcessCommandRunner, RemoteCommandOutput, RemoteTransport, TransportError,
    require_success,
};
use crate::command::RemoteCommand;

/// Connection settings for [`SshTransport`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `rsync` executable.
    pub rsync_bin: String,
    /// Remote user to connect as.
    pub user: String,
    /// SSH port on every host.
    pub port: u16,
    /// Optional private key; supports `~/` expansion.
    pub identity_file: Option<String>,
    /// Whether to force batch mode so SSH never prompts for passwords.
    pub batch_mode: bool,
}

impl SshSettings {
    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] naming the first blank field.
    pub fn validate(&self) -> Result<(), TransportError> {
        require_value(&self.ssh_bin, "ssh_bin")?;
        require_value(&self.rsync_bin, "rsync_bin")?;
        require_value(&self.user, "ssh_user")?;
        match self.identity_file.as_deref() {
            Some(path) => require_value(path, "ssh_identity_file"),
            None => Ok(()),
        }
    }
}

fn require_value(value: &str, field: &str) -> Result<(), TransportError> {
    if value.trim().is_empty() {
        return Err(TransportError::InvalidConfig {
            field: field.to_owned(),
        });
    }
    Ok(())
}

/// Runs remote commands through `ssh` and copies files with `rsync`.
#[derive(Clone, Debug)]
pub struct SshTransport<R: CommandRunner> {
    settings: SshSettings,
    runner: R,
}

impl SshTransport<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(settings: SshSettings) -> Result<Self, TransportError> {
        Self::new(settings, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshTransport<R> {
    /// Creates a transport using the provided runner.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] when validation fails.
    pub fn new(settings: SshSettings, runner: R) -> Result<Self, TransportError> {
        settings.validate()?;
        Ok(Self { settings, runner })
    }

    /// Returns the connection settings.
    #[must_use]
    pub const fn settings(&self) -> &SshSettings {
        &self.settings
    }

    fn common_ssh_options(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.settings.port.to_string()),
        ];

        if let Some(ref identity_file) = self.settings.identity_file {
            args.push(OsString::from("-i"));
            args.push(home_relative(identity_file, std::env::var_os("HOME")));
        }

        if self.settings.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        args
    }

    fn build_ssh_args(&self, host: &str, command: &RemoteCommand) -> Vec<OsString> {
        let mut args = self.common_ssh_options();
        args.push(OsString::from(format!("{}@{host}", self.settings.user)));
        args.push(OsString::from(command.to_shell_line()));
        args
    }

    fn build_remote_shell(&self) -> String {
        let opts = self
            .common_ssh_options()
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        format!("{} {opts}", self.settings.ssh_bin)
    }

    fn build_rsync_args(
        &self,
        host: &str,
        local: &Utf8Path,
        remote: &Utf8Path,
        privileged: bool,
    ) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-z"),
            OsString::from("--checksum"),
            OsString::from("--rsh"),
            OsString::from(self.build_remote_shell()),
        ];
        if privileged {
            args.push(OsString::from("--rsync-path"));
            args.push(OsString::from("sudo rsync"));
        }
        args.push(OsString::from(local.as_str()));
        args.push(OsString::from(format!(
            "{}@{host}:{remote}",
            self.settings.user
        )));
        args
    }
}

/// Resolves a `~` or `~/` prefixed key path against `home`. Paths are
/// passed through untouched when `home` is unknown.
fn home_relative(path: &str, home: Option<OsString>) -> OsString {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => rest,
        _ => return OsString::from(path),
    };
    let Some(mut resolved) = home else {
        return OsString::from(path);
    };
    resolved.push(rest);
    resolved
}

impl<R: CommandRunner> RemoteTransport for SshTransport<R> {
    fn run(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<RemoteCommandOutput, TransportError> {
        debug!(host, command = %command, "running remote command");
        let args = self.build_ssh_args(host, command);
        let output = self.runner.run(&self.settings.ssh_bin, &args)?;

        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn copy_to(
        &self,
        host: &str,
        local: &Utf8Path,
        remote: &Utf8Path,
        privileged: bool,
    ) -> Result<(), TransportError> {
        if !local.is_file() {
            return Err(TransportError::MissingSource {
                path: local.to_path_buf(),
            });
        }

        debug!(host, %local, %remote, privileged, "copying file to remote");
        let args = self.build_rsync_args(host, local, remote, privileged);
        let output = self.runner.run(&self.settings.rsync_bin, &args)?;
        require_success(&self.settings.rsync_bin, output).map(|_| ())
    }
}
