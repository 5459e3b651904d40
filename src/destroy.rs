//! Removing everything a project deployed to an environment.
//!
//! The operator must confirm before anything happens. After that every step
//! is best effort: a resource that is already gone must not stop the rest of
//! the cleanup.

use tracing::{info, warn};

use crate::artifacts::{ArtifactSync, PurgeReport, StorageSync};
use crate::confirm::{Confirmer, confirm};
use crate::deploy::{AbortReason, DeployPlan};
use crate::reconcile::{ConfReconciler, UninstallResult};
use crate::render::TemplateEngine;
use crate::server::{ServerError, ServerOps};
use crate::targets::RunContext;
use crate::transport::RemoteTransport;

/// Everything destruction attempted.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DestroyReport {
    /// Environment that was destroyed.
    pub environment: String,
    /// Bucket prefixes removed or left behind.
    pub purge: PurgeReport,
    /// Host-level failures from project and crontab removal.
    pub server_failures: Vec<ServerError>,
    /// Per-host, per-service configuration removal.
    pub uninstall: Vec<UninstallResult>,
}

impl DestroyReport {
    /// Returns `true` when every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.purge.is_success()
            && self.server_failures.is_empty()
            && self.uninstall.iter().all(UninstallResult::is_clean)
    }
}

/// Result of [`DestructionSequencer::destroy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DestroyOutcome {
    /// Cleanup ran; failures are listed in the report.
    Completed(DestroyReport),
    /// Nothing was changed.
    Aborted(AbortReason),
}

/// Runs the destruction sequence.
#[derive(Debug)]
pub struct DestructionSequencer<E, T, S, K>
where
    E: TemplateEngine,
    T: RemoteTransport,
    S: StorageSync,
    K: Confirmer,
{
    plan: DeployPlan,
    server: ServerOps<T>,
    reconciler: ConfReconciler<E, T>,
    artifacts: ArtifactSync<S>,
    confirmer: K,
}

impl<E, T, S, K> DestructionSequencer<E, T, S, K>
where
    E: TemplateEngine,
    T: RemoteTransport,
    S: StorageSync,
    K: Confirmer,
{
    /// Wires the collaborators together.
    pub const fn new(
        plan: DeployPlan,
        server: ServerOps<T>,
        reconciler: ConfReconciler<E, T>,
        artifacts: ArtifactSync<S>,
        confirmer: K,
    ) -> Self {
        Self {
            plan,
            server,
            reconciler,
            artifacts,
            confirmer,
        }
    }

    /// Destroys the selected environment after confirmation.
    pub fn destroy(&self, run: &RunContext) -> DestroyOutcome {
        let environment = match run.environment() {
            Ok(environment) => environment,
            Err(err) => return DestroyOutcome::Aborted(AbortReason::Precondition(err)),
        };

        let message = format!(
            "You are about to destroy everything deployed to {} for this project.\n\
             Do you know what you're doing?",
            environment.name
        );
        if !confirm(&self.confirmer, &message) {
            warn!(environment = %environment.name, "destruction declined");
            return DestroyOutcome::Aborted(AbortReason::ConfirmationDeclined);
        }

        let mut report = DestroyReport {
            environment: environment.name.clone(),
            purge: self.artifacts.purge(&environment.buckets, &self.plan.prefix),
            ..DestroyReport::default()
        };

        if environment.deploy_to_servers {
            let mut collect = |result: Result<Vec<ServerError>, _>| match result {
                Ok(failures) => report.server_failures.extend(failures),
                Err(err) => report.server_failures.push(ServerError::Precondition(err)),
            };
            collect(self.server.remove_project(run));
            if self.plan.deploy_crontab {
                collect(self.server.uninstall_crontab(run));
            }
            if self.plan.deploy_services {
                match self.reconciler.uninstall(run) {
                    Ok(results) => report.uninstall = results,
                    Err(err) => report.server_failures.push(ServerError::Precondition(err)),
                }
            }
        }

        info!(environment = %report.environment, clean = report.is_clean(), "destruction finished");
        DestroyOutcome::Completed(report)
    }
}
