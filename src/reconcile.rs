//! Installing rendered configuration on hosts, but only when it changed.
//!
//! For every host of the selected environment, and every declared service on
//! that host, the reconciler renders the template, compares its SHA-256 with
//! the installed file, and on a mismatch copies the file with elevated
//! privileges before running the service's post-install commands. Failures
//! are recorded per service and host; the batch always runs to the end.

use camino::Utf8Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::command::RemoteCommand;
use crate::fingerprint::{self, ContentHash, Fingerprint, FingerprintUnavailable};
use crate::render::{ConfRenderer, RenderContext, RenderError, TemplateEngine};
use crate::service::{self, AppRuntime, ServiceError, ServiceSpec};
use crate::targets::{PreconditionError, RunContext};
use crate::transport::{RemoteTransport, TransportError};

/// Context key carrying the selected environment's name.
pub const DEPLOYMENT_TARGET_KEY: &str = "DEPLOYMENT_TARGET";

/// Why a service could not be reconciled on a host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReconcileError {
    /// The template could not be rendered.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// Copying the file or running a follow-up command failed.
    #[error("remote step `{step}` failed: {source}")]
    RemoteMutation {
        /// The copy or command that failed.
        step: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },
}

/// What happened to one service on one host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReconcileOutcome {
    /// The file differed or was missing and has been installed.
    Installed,
    /// The installed file already matched.
    Unchanged,
    /// Rendering, copying or a follow-up command failed.
    Failed(ReconcileError),
}

/// Result for one service on one host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconcileResult {
    /// Host the service was reconciled on.
    pub host: String,
    /// Service name.
    pub service_name: String,
    /// Outcome.
    pub outcome: ReconcileOutcome,
    /// Set when the installed fingerprint could not be read and the file was
    /// treated as changed.
    pub fingerprint_warning: Option<FingerprintUnavailable>,
}

impl ReconcileResult {
    /// Returns `true` when the file was installed.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        matches!(self.outcome, ReconcileOutcome::Installed)
    }

    /// Returns `true` when reconciliation failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.outcome, ReconcileOutcome::Failed(_))
    }
}

/// Result of removing one service from one host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UninstallResult {
    /// Host the service was removed from.
    pub host: String,
    /// Service name.
    pub service_name: String,
    /// Commands that failed; the remaining commands still ran.
    pub errors: Vec<TransportError>,
}

impl UninstallResult {
    /// Returns `true` when every command succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Renders, diffs and installs service configuration.
#[derive(Debug)]
pub struct ConfReconciler<E: TemplateEngine, T: RemoteTransport> {
    renderer: ConfRenderer<E>,
    transport: T,
    services: Vec<ServiceSpec>,
    runtime: AppRuntime,
    context: RenderContext,
}

impl<E: TemplateEngine, T: RemoteTransport> ConfReconciler<E, T> {
    /// Creates a reconciler for `services`, in declared order.
    ///
    /// `context` holds every template value except the deployment target,
    /// which is set from the run context on each call.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Duplicate`] when two services share a name.
    pub fn new(
        renderer: ConfRenderer<E>,
        transport: T,
        services: Vec<ServiceSpec>,
        runtime: AppRuntime,
        context: RenderContext,
    ) -> Result<Self, ServiceError> {
        service::ensure_unique(&services)?;
        Ok(Self {
            renderer,
            transport,
            services,
            runtime,
            context,
        })
    }

    /// Declared services.
    #[must_use]
    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    /// Transport used for every remote call.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn run_context(&self, environment: &str) -> RenderContext {
        let mut context = self.context.clone();
        context.insert(DEPLOYMENT_TARGET_KEY, environment);
        context
    }

    /// Brings every host of the selected environment in line with the
    /// rendered templates.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError`] when no environment is selected.
    pub fn reconcile(&self, run: &RunContext) -> Result<Vec<ReconcileResult>, PreconditionError> {
        let environment = run.environment()?;
        let context = self.run_context(&environment.name);
        let mut results = Vec::with_capacity(environment.hosts.len() * self.services.len());
        for host in &environment.hosts {
            for spec in &self.services {
                results.push(self.reconcile_one(host, spec, &context));
            }
        }
        Ok(results)
    }

    fn reconcile_one(&self, host: &str, spec: &ServiceSpec, context: &RenderContext) -> ReconcileResult {
        let mut result = ReconcileResult {
            host: host.to_owned(),
            service_name: spec.service_name.clone(),
            outcome: ReconcileOutcome::Unchanged,
            fingerprint_warning: None,
        };

        let rendered = match self.renderer.render(spec, context) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(host, service = %spec.service_name, error = %err, "render failed");
                result.outcome = ReconcileOutcome::Failed(err.into());
                return result;
            }
        };

        let local = ContentHash::of(&rendered.content);
        let installed_path = spec.installed_path(self.renderer.project());
        let remote = match fingerprint::fetch_remote(&self.transport, host, &installed_path) {
            Ok(remote) => remote,
            Err(unavailable) => {
                warn!(host, service = %spec.service_name, error = %unavailable, "installed fingerprint unavailable; reinstalling");
                result.fingerprint_warning = Some(unavailable);
                Fingerprint::Absent
            }
        };

        if remote.matches(&local) {
            info!(host, service = %spec.service_name, "unchanged");
            return result;
        }

        result.outcome = match self.install(host, spec, &rendered.local_path, &installed_path) {
            Ok(()) => {
                info!(host, service = %spec.service_name, path = %installed_path, "installed");
                ReconcileOutcome::Installed
            }
            Err(err) => {
                warn!(host, service = %spec.service_name, error = %err, "install failed");
                ReconcileOutcome::Failed(err)
            }
        };
        result
    }

    fn install(
        &self,
        host: &str,
        spec: &ServiceSpec,
        local: &Utf8Path,
        installed_path: &Utf8Path,
    ) -> Result<(), ReconcileError> {
        self.transport
            .copy_to(host, local, installed_path, true)
            .map_err(|source| ReconcileError::RemoteMutation {
                step: format!("copy {local} to {installed_path}"),
                source,
            })?;
        for command in service::post_install_commands(spec, self.renderer.project(), &self.runtime) {
            self.run_step(host, &command)?;
        }
        Ok(())
    }

    fn run_step(&self, host: &str, command: &RemoteCommand) -> Result<(), ReconcileError> {
        self.transport
            .run_checked(host, command)
            .map(|_| ())
            .map_err(|source| ReconcileError::RemoteMutation {
                step: command.to_string(),
                source,
            })
    }

    /// Removes every declared service from every host of the selected
    /// environment, continuing past failures.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError`] when no environment is selected.
    pub fn uninstall(&self, run: &RunContext) -> Result<Vec<UninstallResult>, PreconditionError> {
        let environment = run.environment()?;
        let mut results = Vec::with_capacity(environment.hosts.len() * self.services.len());
        for host in &environment.hosts {
            for spec in &self.services {
                let errors: Vec<TransportError> =
                    service::uninstall_commands(spec, self.renderer.project(), &self.runtime)
                        .iter()
                        .filter_map(|command| self.transport.run_checked(host, command).err())
                        .collect();
                for error in &errors {
                    warn!(host, service = %spec.service_name, error = %error, "uninstall step failed");
                }
                info!(host, service = %spec.service_name, "uninstalled");
                results.push(UninstallResult {
                    host: host.clone(),
                    service_name: spec.service_name.clone(),
                    errors,
                });
            }
        }
        Ok(results)
    }
}
