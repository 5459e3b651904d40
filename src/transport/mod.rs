//! Remote execution and file transfer.
//!
//! The core only ever talks to hosts through [`RemoteTransport`]: run a
//! structured command, or copy a local file to a remote path. [`SshTransport`]
//! implements it by shelling out to the system `ssh` and `rsync` binaries.

use camino::Utf8Path;

use crate::command::RemoteCommand;

mod error;
mod ssh;
mod types;

pub use error::TransportError;
pub use ssh::{SshSettings, SshTransport};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner, require_success};

/// Output captured from a command executed on a remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code returned by the remote command. `None` when the remote
    /// process terminated without reporting a status.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the remote command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Blocking access to remote hosts.
pub trait RemoteTransport {
    /// Runs `command` on `host` and returns its output, whatever the exit
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the command could not be delivered.
    fn run(&self, host: &str, command: &RemoteCommand)
    -> Result<RemoteCommandOutput, TransportError>;

    /// Copies `local` to `remote` on `host`, elevating on the remote side when
    /// `privileged` is set.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the copy fails.
    fn copy_to(
        &self,
        host: &str,
        local: &Utf8Path,
        remote: &Utf8Path,
        privileged: bool,
    ) -> Result<(), TransportError>;

    /// Runs `command` and fails unless it exits with status zero.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommandFailure`] for non-zero exits, or the
    /// delivery error from [`RemoteTransport::run`].
    fn run_checked(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<RemoteCommandOutput, TransportError> {
        let output = self.run(host, command)?;
        if output.is_success() {
            return Ok(output);
        }
        let status_text = output
            .exit_code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(TransportError::CommandFailure {
            program: command.to_shell_line(),
            status: output.exit_code,
            status_text,
            stderr: output.stderr,
        })
    }
}

impl<T: RemoteTransport + ?Sized> RemoteTransport for &T {
    fn run(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<RemoteCommandOutput, TransportError> {
        (**self).run(host, command)
    }

    fn copy_to(
        &self,
        host: &str,
        local: &Utf8Path,
        remote: &Utf8Path,
        privileged: bool,
    ) -> Result<(), TransportError> {
        (**self).copy_to(host, local, remote, privileged)
    }
}
