//! Core library for the Deckhand deploy orchestrator.
//!
//! Deckhand ships a small web property: it renders per-service configuration
//! from templates and installs it on hosts only when the content changed,
//! checks out code and cron jobs on those hosts, and mirrors the compressed
//! static build into object storage in three cache-tuned passes. Destructive
//! or risky runs (tearing an environment down, deploying a non-stable branch
//! to production) wait for an operator confirmation before anything happens.
//!
//! Every side effect goes through a trait seam ([`RemoteTransport`],
//! [`StorageSync`], [`Confirmer`], [`StaticRenderer`], [`Compressor`]) so the
//! sequencers can be driven by the recording fakes in [`test_support`].

pub mod artifacts;
pub mod command;
pub mod config;
pub mod confirm;
pub mod deploy;
pub mod destroy;
pub mod fingerprint;
pub mod manifest;
pub mod reconcile;
pub mod render;
pub mod secrets;
pub mod server;
pub mod service;
pub mod targets;
pub mod telemetry;
pub mod test_support;
pub mod transport;

pub use artifacts::{
    ArtifactClass, ArtifactError, ArtifactPartition, ArtifactSync, AwsCliStorage, Compressor,
    GzipCompressor, PartitionRules, PassKind, StorageError, StorageSync, SyncReport, SyncRequest,
};
pub use command::RemoteCommand;
pub use config::{ConfigError, DeploySettings};
pub use confirm::{Confirmer, TerminalConfirmer};
pub use deploy::{
    AbortReason, CommandStaticRenderer, DeployError, DeployOutcome, DeployPlan, DeployStep,
    DeploySummary, DeploymentSequencer, StaticPipeline, StaticRenderer,
};
pub use destroy::{DestroyOutcome, DestroyReport, DestructionSequencer};
pub use fingerprint::{ContentHash, Fingerprint, FingerprintUnavailable};
pub use manifest::{ManifestError, ProjectManifest};
pub use reconcile::{ConfReconciler, ReconcileError, ReconcileOutcome, ReconcileResult};
pub use render::{ConfRenderer, JinjaEngine, RenderContext, RenderError, TemplateEngine};
pub use secrets::{EnvSecrets, Secret, SecretsProvider};
pub use server::{ServerError, ServerLayout, ServerOps};
pub use service::{AppRuntime, ServiceKind, ServiceSpec};
pub use targets::{Environment, PreconditionError, RunContext, TargetRegistry};
pub use transport::{RemoteTransport, SshSettings, SshTransport, TransportError};
