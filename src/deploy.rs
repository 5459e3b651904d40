//! The deployment sequence.
//!
//! ```text
//! SelectEnvironment -> SelectBranch (remote only) -> ConfirmRiskyBranch
//!   -> [RemoteCheckout -> InstallCrontab? -> ReconcileConfs?] (remote only)
//!   -> RenderStaticOutput -> Compress -> SyncArtifacts
//! ```
//!
//! Nothing touches a host, the local tree, or storage before the risky-branch
//! confirmation has been answered.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::artifacts::{
    ArtifactError, ArtifactSync, CompressSummary, Compressor, PartitionRules, StorageSync,
    SyncReport, SyncRequest,
};
use crate::confirm::{Confirmer, confirm};
use crate::reconcile::{ConfReconciler, ReconcileResult};
use crate::render::TemplateEngine;
use crate::server::{ServerError, ServerOps};
use crate::targets::{Environment, PreconditionError, RunContext};
use crate::transport::{
    CommandRunner, ProcessCommandRunner, RemoteTransport, TransportError, require_success,
};

/// Branch that production is expected to run.
pub const STABLE_BRANCH: &str = "stable";

/// Git remote pulled from during checkout.
pub const DEFAULT_GIT_REMOTE: &str = "origin";

/// Raised by a [`StaticRenderer`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StaticRenderError {
    /// The render command could not run or exited unsuccessfully.
    #[error(transparent)]
    Command(#[from] TransportError),
    /// The renderer reported a failure.
    #[error("static render failed: {message}")]
    Failed {
        /// Renderer diagnostic.
        message: String,
    },
}

/// Produces the static site for an environment.
pub trait StaticRenderer {
    /// Renders the static output for `environment`.
    ///
    /// # Errors
    ///
    /// Returns [`StaticRenderError`] when rendering fails.
    fn render_static(&self, environment: &Environment) -> Result<(), StaticRenderError>;
}

impl<T: StaticRenderer + ?Sized> StaticRenderer for &T {
    fn render_static(&self, environment: &Environment) -> Result<(), StaticRenderError> {
        (**self).render_static(environment)
    }
}

/// Runs a configured local command with the environment name appended.
#[derive(Clone, Debug)]
pub struct CommandStaticRenderer<R: CommandRunner> {
    program: String,
    args: Vec<String>,
    runner: R,
}

impl CommandStaticRenderer<ProcessCommandRunner> {
    /// Uses the real process runner.
    #[must_use]
    pub fn with_process_runner(program: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(program, args, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> CommandStaticRenderer<R> {
    /// Creates a renderer running `program args... <environment>`.
    pub fn new(program: impl Into<String>, args: Vec<String>, runner: R) -> Self {
        Self {
            program: program.into(),
            args,
            runner,
        }
    }
}

impl<R: CommandRunner> StaticRenderer for CommandStaticRenderer<R> {
    fn render_static(&self, environment: &Environment) -> Result<(), StaticRenderError> {
        let args: Vec<OsString> = self
            .args
            .iter()
            .map(OsString::from)
            .chain(std::iter::once(OsString::from(&environment.name)))
            .collect();
        let output = self.runner.run(&self.program, &args)?;
        require_success(&self.program, output)?;
        Ok(())
    }
}

/// The local half of a deploy: render then compress.
#[derive(Clone, Debug)]
pub struct StaticPipeline<R: StaticRenderer, C: Compressor> {
    /// Static site renderer.
    pub renderer: R,
    /// Gzip staging builder.
    pub compressor: C,
}

/// Project-wide deploy settings shared by deploy and destroy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployPlan {
    /// Install the repository crontab on remote deploys.
    pub deploy_crontab: bool,
    /// Reconcile service configuration on remote deploys.
    pub deploy_services: bool,
    /// Branch production may receive without confirmation.
    pub stable_branch: String,
    /// Git remote pulled during checkout.
    pub git_remote: String,
    /// Rendered static output.
    pub source_root: Utf8PathBuf,
    /// Compressed copy that gets synced.
    pub build_root: Utf8PathBuf,
    /// Fingerprinted assets.
    pub assets_root: Utf8PathBuf,
    /// Project prefix inside each bucket.
    pub prefix: String,
    /// Partition rules for the build root.
    pub rules: PartitionRules,
}

impl DeployPlan {
    /// Sync request targeting `buckets`.
    #[must_use]
    pub fn sync_request(&self, buckets: &[String]) -> SyncRequest {
        SyncRequest {
            build_root: self.build_root.clone(),
            assets_root: self.assets_root.clone(),
            buckets: buckets.to_vec(),
            prefix: self.prefix.clone(),
            rules: self.rules.clone(),
        }
    }

    /// Returns `true` when deploying `branch` to `environment` needs an
    /// explicit confirmation.
    #[must_use]
    pub fn is_risky(&self, environment: &Environment, branch: Option<&str>) -> bool {
        environment.is_production() && branch.is_some_and(|name| name != self.stable_branch)
    }
}

/// Steps of the deployment sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeployStep {
    /// An environment was selected.
    SelectEnvironment,
    /// A branch was selected for remote work.
    SelectBranch,
    /// The operator confirmed a non-stable production deploy.
    ConfirmRiskyBranch,
    /// Hosts checked out the branch.
    RemoteCheckout,
    /// The crontab was installed.
    InstallCrontab,
    /// Service configuration was reconciled.
    ReconcileConfs,
    /// The static site was rendered.
    RenderStaticOutput,
    /// The gzip staging tree was built.
    Compress,
    /// Artifacts were synced to storage.
    SyncArtifacts,
}

/// Why a deploy stopped before doing anything.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AbortReason {
    /// Required selections were missing.
    Precondition(PreconditionError),
    /// The operator declined, or could not answer, the confirmation.
    ConfirmationDeclined,
}

/// Failure of a step that stops the sequence.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeployError {
    /// The run context no longer satisfied a step.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    /// A server housekeeping command failed.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// Static rendering failed.
    #[error(transparent)]
    StaticRender(#[from] StaticRenderError),
    /// Local artifact preparation failed.
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
}

/// What a completed deploy did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeploySummary {
    /// Environment deployed to.
    pub environment: String,
    /// Effective branch, if any.
    pub branch: Option<String>,
    /// Steps that ran, in order.
    pub steps: Vec<DeployStep>,
    /// Per-host, per-service configuration results.
    pub conf_results: Vec<ReconcileResult>,
    /// Compression counts.
    pub compress: CompressSummary,
    /// Storage sync results.
    pub sync: SyncReport,
}

impl DeploySummary {
    /// Configuration results that failed.
    pub fn conf_failures(&self) -> impl Iterator<Item = &ReconcileResult> {
        self.conf_results.iter().filter(|result| result.is_failed())
    }

    /// Returns `true` when no configuration or sync pass failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conf_failures().next().is_none() && self.sync.is_success()
    }
}

/// Result of [`DeploymentSequencer::deploy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeployOutcome {
    /// Every step ran; partial failures are in the summary.
    Completed(DeploySummary),
    /// Nothing was changed.
    Aborted(AbortReason),
    /// A step failed and the sequence stopped; artifacts were not synced.
    Failed {
        /// Step that failed.
        step: DeployStep,
        /// Failure.
        error: DeployError,
    },
}

fn failed_at<E: Into<DeployError>>(step: DeployStep) -> impl FnOnce(E) -> (DeployStep, DeployError) {
    move |err| (step, err.into())
}

/// Runs the deployment sequence.
#[derive(Debug)]
pub struct DeploymentSequencer<E, T, S, R, C, K>
where
    E: TemplateEngine,
    T: RemoteTransport,
    S: StorageSync,
    R: StaticRenderer,
    C: Compressor,
    K: Confirmer,
{
    plan: DeployPlan,
    server: ServerOps<T>,
    reconciler: ConfReconciler<E, T>,
    artifacts: ArtifactSync<S>,
    pipeline: StaticPipeline<R, C>,
    confirmer: K,
}

impl<E, T, S, R, C, K> DeploymentSequencer<E, T, S, R, C, K>
where
    E: TemplateEngine,
    T: RemoteTransport,
    S: StorageSync,
    R: StaticRenderer,
    C: Compressor,
    K: Confirmer,
{
    /// Wires the collaborators together.
    pub const fn new(
        plan: DeployPlan,
        server: ServerOps<T>,
        reconciler: ConfReconciler<E, T>,
        artifacts: ArtifactSync<S>,
        pipeline: StaticPipeline<R, C>,
        confirmer: K,
    ) -> Self {
        Self {
            plan,
            server,
            reconciler,
            artifacts,
            pipeline,
            confirmer,
        }
    }

    /// Deploys the selected environment.
    pub fn deploy(&self, run: &RunContext) -> DeployOutcome {
        let environment = match run.environment() {
            Ok(environment) => environment,
            Err(err) => return DeployOutcome::Aborted(AbortReason::Precondition(err)),
        };
        let mut summary = DeploySummary {
            environment: environment.name.clone(),
            branch: run.branch().map(str::to_owned),
            steps: vec![DeployStep::SelectEnvironment],
            ..DeploySummary::default()
        };

        if environment.deploy_to_servers {
            if let Err(err) = run.require_branch() {
                return DeployOutcome::Aborted(AbortReason::Precondition(err));
            }
            summary.steps.push(DeployStep::SelectBranch);
        }

        if self.plan.is_risky(environment, run.branch()) {
            let branch = run.branch().unwrap_or_default();
            let message = format!(
                "You are trying to deploy the '{branch}' branch to production.\n\
                 You should really only deploy a stable branch.\n\
                 Do you know what you're doing?"
            );
            if !confirm(&self.confirmer, &message) {
                warn!(environment = %environment.name, branch, "deploy declined");
                return DeployOutcome::Aborted(AbortReason::ConfirmationDeclined);
            }
            summary.steps.push(DeployStep::ConfirmRiskyBranch);
        }

        match self.run_steps(run, environment, summary) {
            Ok(summary) => {
                info!(environment = %summary.environment, clean = summary.is_clean(), "deploy completed");
                DeployOutcome::Completed(summary)
            }
            Err((step, error)) => {
                warn!(?step, error = %error, "deploy failed");
                DeployOutcome::Failed { step, error }
            }
        }
    }

    fn run_steps(
        &self,
        run: &RunContext,
        environment: &Environment,
        mut summary: DeploySummary,
    ) -> Result<DeploySummary, (DeployStep, DeployError)> {
        if environment.deploy_to_servers {
            self.server
                .checkout_latest(run, &self.plan.git_remote)
                .map_err(failed_at(DeployStep::RemoteCheckout))?;
            summary.steps.push(DeployStep::RemoteCheckout);

            if self.plan.deploy_crontab {
                self.server
                    .install_crontab(run)
                    .map_err(failed_at(DeployStep::InstallCrontab))?;
                summary.steps.push(DeployStep::InstallCrontab);
            }

            if self.plan.deploy_services {
                summary.conf_results = self
                    .reconciler
                    .reconcile(run)
                    .map_err(failed_at(DeployStep::ReconcileConfs))?;
                summary.steps.push(DeployStep::ReconcileConfs);
            }
        }

        self.pipeline
            .renderer
            .render_static(environment)
            .map_err(failed_at(DeployStep::RenderStaticOutput))?;
        summary.steps.push(DeployStep::RenderStaticOutput);

        summary.compress = self
            .pipeline
            .compressor
            .compress(&self.plan.source_root, &self.plan.build_root)
            .map_err(failed_at(DeployStep::Compress))?;
        summary.steps.push(DeployStep::Compress);

        summary.sync = self
            .artifacts
            .sync(&self.plan.sync_request(&environment.buckets))
            .map_err(failed_at(DeployStep::SyncArtifacts))?;
        summary.steps.push(DeployStep::SyncArtifacts);

        Ok(summary)
    }
}
