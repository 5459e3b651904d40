//! Declared services and the remote actions that follow an install or
//! uninstall.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

use crate::command::RemoteCommand;

const FILE_MODE: &str = "644";

/// The closed set of service classes the orchestrator knows how to manage.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Web server whose configuration is picked up by a reload.
    Nginx,
    /// Process manager unit (uwsgi) restarted after its registry reloads.
    ProcessManager,
    /// Application socket and log files that need ownership fixed up.
    AppSocket,
}

impl ServiceKind {
    /// Infers the kind from a conventional service name.
    #[must_use]
    pub fn from_service_name(name: &str) -> Option<Self> {
        match name {
            "nginx" => Some(Self::Nginx),
            "uwsgi" => Some(Self::ProcessManager),
            "app" => Some(Self::AppSocket),
            _ => None,
        }
    }

    /// What happens after a successful install.
    #[must_use]
    pub const fn action(self) -> ServiceAction {
        match self {
            Self::Nginx => ServiceAction::Reload,
            Self::ProcessManager | Self::AppSocket => ServiceAction::RestartAndRechown,
        }
    }
}

/// Post-install behaviour class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceAction {
    /// Signal the running process to re-read its configuration.
    Reload,
    /// Restart the unit or re-establish file ownership.
    RestartAndRechown,
}

/// Errors raised while declaring services.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ServiceError {
    /// Raised when the kind cannot be inferred and was not given.
    #[error("cannot infer the kind of service {name}; set `kind` explicitly")]
    UnknownKind {
        /// Offending service name.
        name: String,
    },
    /// Raised when two services share a name.
    #[error("service {name} is declared more than once")]
    Duplicate {
        /// Duplicated service name.
        name: String,
    },
    /// Raised when a required field is blank.
    #[error("service field {field} must not be empty")]
    Blank {
        /// Name of the blank field.
        field: String,
    },
}

/// One configuration file to render and install.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceSpec {
    /// Service name, unique within a project.
    pub service_name: String,
    /// Remote directory the rendered file is installed into.
    pub install_root_path: Utf8PathBuf,
    /// File extension shared by template, rendered and installed file.
    pub file_extension: String,
    /// Service class that selects the post-install action.
    pub kind: ServiceKind,
}

impl ServiceSpec {
    /// Declares a service, inferring its kind from the name.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] for blank fields or an unrecognised name.
    pub fn new(
        service_name: impl Into<String>,
        install_root_path: impl Into<Utf8PathBuf>,
        file_extension: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let name = service_name.into();
        let kind = ServiceKind::from_service_name(&name)
            .ok_or_else(|| ServiceError::UnknownKind { name: name.clone() })?;
        Self::with_kind(name, install_root_path, file_extension, kind)
    }

    /// Declares a service with an explicit kind.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Blank`] when any field is empty.
    pub fn with_kind(
        service_name: impl Into<String>,
        install_root_path: impl Into<Utf8PathBuf>,
        file_extension: impl Into<String>,
        kind: ServiceKind,
    ) -> Result<Self, ServiceError> {
        let spec = Self {
            service_name: service_name.into(),
            install_root_path: install_root_path.into(),
            file_extension: file_extension.into(),
            kind,
        };
        for (value, field) in [
            (spec.service_name.as_str(), "service_name"),
            (spec.install_root_path.as_str(), "install_root_path"),
            (spec.file_extension.as_str(), "file_extension"),
        ] {
            if value.trim().is_empty() {
                return Err(ServiceError::Blank {
                    field: field.to_owned(),
                });
            }
        }
        Ok(spec)
    }

    /// Template file name, `<service>.<extension>`.
    #[must_use]
    pub fn template_file_name(&self) -> String {
        format!("{}.{}", self.service_name, self.file_extension)
    }

    /// Rendered and installed file name, `<project>.<service>.<extension>`.
    #[must_use]
    pub fn rendered_file_name(&self, project: &str) -> String {
        format!("{project}.{}.{}", self.service_name, self.file_extension)
    }

    /// Remote path the rendered file is installed at.
    #[must_use]
    pub fn installed_path(&self, project: &str) -> Utf8PathBuf {
        self.install_root_path.join(self.rendered_file_name(project))
    }

    /// Name of the init unit for this service, `<project>.<service>`.
    #[must_use]
    pub fn unit_name(&self, project: &str) -> String {
        format!("{project}.{}", self.service_name)
    }
}

/// Checks that no two services share a name.
///
/// # Errors
///
/// Returns [`ServiceError::Duplicate`] naming the first repeated service.
pub fn ensure_unique(specs: &[ServiceSpec]) -> Result<(), ServiceError> {
    let mut seen = BTreeSet::new();
    for spec in specs {
        if !seen.insert(spec.service_name.as_str()) {
            return Err(ServiceError::Duplicate {
                name: spec.service_name.clone(),
            });
        }
    }
    Ok(())
}

/// Runtime files owned by the application process.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct AppRuntime {
    /// Socket shared between the process manager and the web server.
    pub socket_path: Utf8PathBuf,
    /// `user:group` owning the socket.
    #[serde(default = "default_socket_owner")]
    pub socket_owner: String,
    /// Log files written by the process manager and the application.
    #[serde(default)]
    pub log_paths: Vec<Utf8PathBuf>,
    /// `user:group` owning the log files.
    #[serde(default = "default_log_owner")]
    pub log_owner: String,
}

fn default_socket_owner() -> String {
    String::from("www-data:www-data")
}

fn default_log_owner() -> String {
    String::from("ubuntu:ubuntu")
}

impl AppRuntime {
    /// Runtime files at the conventional per-project locations.
    #[must_use]
    pub fn for_project(project: &str) -> Self {
        Self {
            socket_path: Utf8PathBuf::from(format!("/tmp/{project}.uwsgi.sock")),
            socket_owner: default_socket_owner(),
            log_paths: vec![
                Utf8PathBuf::from(format!("/var/log/{project}.uwsgi.log")),
                Utf8PathBuf::from(format!("/var/log/{project}.app.log")),
            ],
            log_owner: default_log_owner(),
        }
    }
}

fn claim_file(path: &Utf8Path, owner: &str, touch: RemoteCommand) -> [RemoteCommand; 3] {
    [
        touch.arg(path.as_str()),
        RemoteCommand::sudo("chmod").arg(FILE_MODE).arg(path.as_str()),
        RemoteCommand::sudo("chown").arg(owner).arg(path.as_str()),
    ]
}

/// Commands run after installing `spec`, in order.
#[must_use]
pub fn post_install_commands(
    spec: &ServiceSpec,
    project: &str,
    runtime: &AppRuntime,
) -> Vec<RemoteCommand> {
    match spec.kind {
        ServiceKind::Nginx => vec![RemoteCommand::sudo("service").args(["nginx", "reload"])],
        ServiceKind::ProcessManager => vec![
            RemoteCommand::sudo("initctl").arg("reload-configuration"),
            RemoteCommand::sudo("service")
                .arg(spec.unit_name(project))
                .arg("restart"),
        ],
        ServiceKind::AppSocket => {
            let mut commands = Vec::from(claim_file(
                &runtime.socket_path,
                &runtime.socket_owner,
                RemoteCommand::new("touch"),
            ));
            for log in &runtime.log_paths {
                commands.extend(claim_file(
                    log,
                    &runtime.log_owner,
                    RemoteCommand::sudo("touch"),
                ));
            }
            commands
        }
    }
}

/// Commands that remove `spec` from a host and stop what depended on it.
#[must_use]
pub fn uninstall_commands(
    spec: &ServiceSpec,
    project: &str,
    runtime: &AppRuntime,
) -> Vec<RemoteCommand> {
    let mut commands = vec![
        RemoteCommand::sudo("rm")
            .arg("-f")
            .arg(spec.installed_path(project).as_str()),
    ];
    match spec.kind {
        ServiceKind::Nginx => {
            commands.push(RemoteCommand::sudo("service").args(["nginx", "reload"]));
        }
        ServiceKind::ProcessManager => {
            commands.push(
                RemoteCommand::sudo("service")
                    .arg(spec.unit_name(project))
                    .arg("stop"),
            );
            commands.push(RemoteCommand::sudo("initctl").arg("reload-configuration"));
        }
        ServiceKind::AppSocket => {
            commands.push(
                RemoteCommand::sudo("rm")
                    .arg("-f")
                    .arg(runtime.socket_path.as_str()),
            );
            for log in &runtime.log_paths {
                commands.push(RemoteCommand::sudo("rm").arg("-f").arg(log.as_str()));
            }
        }
    }
    commands
}
