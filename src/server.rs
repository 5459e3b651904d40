//! Server housekeeping: first-time setup, code checkout, cron jobs and
//! running management commands on every host.

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::command::RemoteCommand;
use crate::targets::{PreconditionError, RunContext};
use crate::transport::{RemoteCommandOutput, RemoteTransport, TransportError};

/// Directory holding per-project cron files.
pub const CRON_DIR: &str = "/etc/cron.d";

/// Name of the alternate git remote added when a mirror URL is configured.
pub const ALT_REMOTE: &str = "bitbucket";

/// Script in the repository that runs management commands on a host.
pub const CAST_SCRIPT: &str = "run_on_server.sh";

/// Where a project lives on its hosts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerLayout {
    /// Project identifier used in file names.
    pub project: String,
    /// Root of the project on each host.
    pub project_path: Utf8PathBuf,
    /// Git checkout inside the project root.
    pub repository_path: Utf8PathBuf,
    /// Upload directory served by the web server.
    pub uploads_path: Utf8PathBuf,
    /// Repository cloned during setup.
    pub repository_url: String,
    /// Optional mirror added as a second remote.
    pub repository_alt_url: Option<String>,
}

impl ServerLayout {
    /// Conventional layout under `/home/<user>/apps/<project>`.
    #[must_use]
    pub fn for_project(project: &str, user: &str, repository_url: impl Into<String>) -> Self {
        let project_path = Utf8PathBuf::from(format!("/home/{user}/apps/{project}"));
        Self {
            project: project.to_owned(),
            repository_path: project_path.join("repository"),
            project_path,
            uploads_path: Utf8PathBuf::from(format!("/var/www/uploads/{project}")),
            repository_url: repository_url.into(),
            repository_alt_url: None,
        }
    }

    /// Installed crontab location.
    #[must_use]
    pub fn crontab_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(CRON_DIR).join(&self.project)
    }
}

/// Raised by [`ServerOps`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ServerError {
    /// The run context does not allow the operation.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    /// A remote command failed.
    #[error("{host}: {source}")]
    Remote {
        /// Host the command ran on.
        host: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },
}

/// Remote housekeeping for one project.
#[derive(Debug)]
pub struct ServerOps<T: RemoteTransport> {
    transport: T,
    layout: ServerLayout,
}

impl<T: RemoteTransport> ServerOps<T> {
    /// Creates housekeeping operations for `layout`.
    pub const fn new(transport: T, layout: ServerLayout) -> Self {
        Self { transport, layout }
    }

    /// The project layout.
    #[must_use]
    pub const fn layout(&self) -> &ServerLayout {
        &self.layout
    }

    fn git(&self) -> RemoteCommand {
        RemoteCommand::new("git")
            .arg("-C")
            .arg(self.layout.repository_path.as_str())
    }

    fn run_all(&self, host: &str, commands: &[RemoteCommand]) -> Result<(), ServerError> {
        for command in commands {
            self.transport
                .run_checked(host, command)
                .map_err(|source| ServerError::Remote {
                    host: host.to_owned(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Creates directories, clones the repository and checks out the
    /// selected branch on every host.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Precondition`] unless the environment deploys
    /// to servers and a branch is selected, or [`ServerError::Remote`] for
    /// the first failing command.
    pub fn setup_server(&self, run: &RunContext) -> Result<(), ServerError> {
        let environment = run.require_remote()?;
        run.require_branch()?;
        for host in &environment.hosts {
            let mut commands = vec![
                RemoteCommand::new("mkdir")
                    .arg("-p")
                    .arg(self.layout.project_path.as_str()),
                RemoteCommand::new("mkdir")
                    .arg("-p")
                    .arg(self.layout.uploads_path.as_str()),
                RemoteCommand::new("git")
                    .arg("clone")
                    .arg(&self.layout.repository_url)
                    .arg(self.layout.repository_path.as_str()),
            ];
            if let Some(alt) = self.layout.repository_alt_url.as_deref() {
                commands.push(self.git().args(["remote", "add", ALT_REMOTE, alt]));
            }
            self.run_all(host, &commands)?;
            info!(host, "server set up");
        }
        self.checkout_latest(run, "origin")
    }

    /// Fetches `remote` and checks out the latest commit of the selected
    /// branch on every host.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Precondition`] when no environment or branch is
    /// selected, or [`ServerError::Remote`] for the first failing command.
    pub fn checkout_latest(&self, run: &RunContext, remote: &str) -> Result<(), ServerError> {
        let environment = run.environment()?;
        let branch = run.require_branch()?;
        for host in &environment.hosts {
            self.run_all(
                host,
                &[
                    self.git().args(["fetch", remote]),
                    self.git().args(["checkout", branch]),
                    self.git().args(["pull", remote, branch]),
                ],
            )?;
            info!(host, branch, "checked out");
        }
        Ok(())
    }

    /// Copies the repository's crontab into the cron directory on every
    /// host.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when no environment is selected or the copy
    /// fails.
    pub fn install_crontab(&self, run: &RunContext) -> Result<(), ServerError> {
        let environment = run.environment()?;
        let command = RemoteCommand::sudo("cp")
            .arg(self.layout.repository_path.join("crontab").as_str())
            .arg(self.layout.crontab_path().as_str());
        for host in &environment.hosts {
            self.run_all(host, std::slice::from_ref(&command))?;
            info!(host, "crontab installed");
        }
        Ok(())
    }

    /// Removes the project's crontab from every host, continuing past
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError`] when no environment is selected.
    pub fn uninstall_crontab(&self, run: &RunContext) -> Result<Vec<ServerError>, PreconditionError> {
        let command = RemoteCommand::sudo("rm")
            .arg("-f")
            .arg(self.layout.crontab_path().as_str());
        self.run_everywhere(run, &command, "crontab removed")
    }

    /// Removes the project directory from every host, continuing past
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError`] when no environment is selected.
    pub fn remove_project(&self, run: &RunContext) -> Result<Vec<ServerError>, PreconditionError> {
        let command = RemoteCommand::new("rm")
            .arg("-rf")
            .arg(self.layout.project_path.as_str());
        self.run_everywhere(run, &command, "project removed")
    }

    fn run_everywhere(
        &self,
        run: &RunContext,
        command: &RemoteCommand,
        done: &str,
    ) -> Result<Vec<ServerError>, PreconditionError> {
        let environment = run.environment()?;
        let mut failures = Vec::new();
        for host in &environment.hosts {
            match self.run_all(host, std::slice::from_ref(command)) {
                Ok(()) => info!(host, "{done}"),
                Err(err) => {
                    warn!(host, error = %err, "cleanup step failed");
                    failures.push(err);
                }
            }
        }
        Ok(failures)
    }

    /// Runs a management command through the repository's cast script on
    /// every host, passing the selected branch and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Precondition`] unless the environment deploys
    /// to servers and a branch is selected, or [`ServerError::Remote`] when a
    /// host rejects the command.
    pub fn cast(
        &self,
        run: &RunContext,
        command: &[String],
    ) -> Result<Vec<(String, RemoteCommandOutput)>, ServerError> {
        let environment = run.require_remote()?;
        let branch = run.require_branch()?;
        let cast = RemoteCommand::new("bash")
            .arg(self.layout.repository_path.join(CAST_SCRIPT).as_str())
            .arg("fab")
            .arg(branch)
            .arg(environment.name.as_str())
            .args(command.iter().cloned());
        environment
            .hosts
            .iter()
            .map(|host| {
                self.transport
                    .run_checked(host, &cast)
                    .map(|output| (host.clone(), output))
                    .map_err(|source| ServerError::Remote {
                        host: host.clone(),
                        source,
                    })
            })
            .collect()
    }
}
