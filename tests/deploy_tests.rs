//! Behavioural coverage for the deployment sequence.

#[path = "common/project.rs"]
mod project;

use deckhand::test_support::{
    FakeRemote, RecordingCompressor, RecordingStaticRenderer, RecordingStorage, ScriptedConfirmer,
};
use deckhand::{
    AbortReason, ArtifactSync, DeployError, DeployOutcome, DeployPlan, DeployStep,
    DeploySummary, DeploymentSequencer, JinjaEngine, PreconditionError, RunContext, ServerError,
    ServerOps, StaticPipeline,
};
use project::{NGINX_PATH, ProjectDir, environment, layout};
use rstest::{fixture, rstest};

type Sequencer = DeploymentSequencer<
    JinjaEngine,
    FakeRemote,
    RecordingStorage,
    RecordingStaticRenderer,
    RecordingCompressor,
    ScriptedConfirmer,
>;

struct Harness {
    project: ProjectDir,
    remote: FakeRemote,
    storage: RecordingStorage,
    renderer: RecordingStaticRenderer,
    compressor: RecordingCompressor,
    confirmer: ScriptedConfirmer,
}

impl Harness {
    fn sequencer(&self) -> Sequencer {
        self.sequencer_with(self.project.plan())
    }

    fn sequencer_with(&self, plan: DeployPlan) -> Sequencer {
        DeploymentSequencer::new(
            plan,
            ServerOps::new(self.remote.clone(), layout()),
            self.project.reconciler(self.remote.clone()),
            ArtifactSync::new(self.storage.clone()),
            StaticPipeline {
                renderer: self.renderer.clone(),
                compressor: self.compressor.clone(),
            },
            self.confirmer.clone(),
        )
    }

    fn assert_untouched(&self) {
        assert!(self.remote.calls().is_empty(), "remote: {:?}", self.remote.calls());
        assert!(self.storage.calls().is_empty(), "storage: {:?}", self.storage.calls());
        assert!(self.renderer.rendered().is_empty());
        assert!(self.compressor.requests().is_empty());
    }
}

#[fixture]
fn harness() -> Harness {
    let project = ProjectDir::new();
    project.write_build();
    Harness {
        project,
        remote: FakeRemote::new(),
        storage: RecordingStorage::new(),
        renderer: RecordingStaticRenderer::new(),
        compressor: RecordingCompressor::new(),
        confirmer: ScriptedConfirmer::failing(),
    }
}

fn completed(outcome: DeployOutcome) -> DeploySummary {
    match outcome {
        DeployOutcome::Completed(summary) => summary,
        other => panic!("expected a completed deploy, got {other:?}"),
    }
}

fn production(branch: &str) -> RunContext {
    RunContext::for_environment(environment("production", &["web1", "web2"], true, "stable"))
        .with_branch(branch)
}

#[rstest]
fn remote_deploy_runs_every_step_in_order(harness: Harness) {
    let run = RunContext::for_environment(environment("staging", &["web1"], true, "master"));

    let summary = completed(harness.sequencer().deploy(&run));

    assert_eq!(
        summary.steps,
        vec![
            DeployStep::SelectEnvironment,
            DeployStep::SelectBranch,
            DeployStep::RemoteCheckout,
            DeployStep::InstallCrontab,
            DeployStep::ReconcileConfs,
            DeployStep::RenderStaticOutput,
            DeployStep::Compress,
            DeployStep::SyncArtifacts,
        ]
    );
    assert!(summary.is_clean());
    assert_eq!(summary.branch.as_deref(), Some("master"));
    assert!(harness.confirmer.prompts().is_empty());
    assert_eq!(harness.renderer.rendered(), vec![String::from("staging")]);
    assert_eq!(
        harness.compressor.requests(),
        vec![(harness.project.path("www"), harness.project.path(".gzip"))]
    );
    assert_eq!(harness.storage.passes().len(), 3);
    assert!(harness.remote.file("web1", NGINX_PATH).is_some());
    let commands = harness.remote.commands_on("web1");
    let checkout = commands
        .iter()
        .position(|line| line.ends_with("checkout master"))
        .expect("checkout ran");
    let crontab = commands
        .iter()
        .position(|line| line.contains("/etc/cron.d/lookup"))
        .expect("crontab installed");
    assert!(checkout < crontab);
}

#[rstest]
fn declining_a_risky_branch_touches_nothing(harness: Harness) {
    harness.confirmer.push_answer("no");

    let outcome = harness.sequencer().deploy(&production("master"));

    assert_eq!(outcome, DeployOutcome::Aborted(AbortReason::ConfirmationDeclined));
    harness.assert_untouched();
    let prompts = harness.confirmer.prompts();
    let [prompt] = prompts.as_slice() else {
        panic!("expected one prompt, got {prompts:?}");
    };
    assert!(prompt.contains("deploy the 'master' branch to production"));
}

#[rstest]
fn an_unanswerable_prompt_counts_as_declined(harness: Harness) {
    let outcome = harness.sequencer().deploy(&production("feature/maps"));

    assert_eq!(outcome, DeployOutcome::Aborted(AbortReason::ConfirmationDeclined));
    harness.assert_untouched();
}

#[rstest]
#[case("y")]
#[case("YES")]
#[case("  Buzz Off ")]
#[case("screw you")]
fn accepted_answers_let_a_risky_deploy_proceed(harness: Harness, #[case] answer: &str) {
    harness.confirmer.push_answer(answer);

    let summary = completed(harness.sequencer().deploy(&production("master")));

    assert!(summary.steps.contains(&DeployStep::ConfirmRiskyBranch));
    assert_eq!(harness.renderer.rendered(), vec![String::from("production")]);
}

#[rstest]
fn the_stable_branch_needs_no_confirmation(harness: Harness) {
    let run = RunContext::for_environment(environment("production", &["web1"], true, "stable"));

    let summary = completed(harness.sequencer().deploy(&run));

    assert!(harness.confirmer.prompts().is_empty());
    assert!(!summary.steps.contains(&DeployStep::ConfirmRiskyBranch));
}

#[rstest]
fn remote_deploys_need_a_branch(harness: Harness) {
    let run = RunContext::for_environment(environment("staging", &["web1"], true, ""));

    let outcome = harness.sequencer().deploy(&run);

    assert!(matches!(
        outcome,
        DeployOutcome::Aborted(AbortReason::Precondition(PreconditionError::BranchNotSelected { .. }))
    ));
    harness.assert_untouched();
}

#[rstest]
fn nothing_runs_without_an_environment(harness: Harness) {
    let outcome = harness.sequencer().deploy(&RunContext::unselected());

    assert_eq!(
        outcome,
        DeployOutcome::Aborted(AbortReason::Precondition(
            PreconditionError::EnvironmentNotSelected
        ))
    );
    harness.assert_untouched();
}

#[rstest]
fn static_only_environments_skip_the_hosts(harness: Harness) {
    let run = RunContext::for_environment(environment("preview", &["web1"], false, ""));

    let summary = completed(harness.sequencer().deploy(&run));

    assert_eq!(
        summary.steps,
        vec![
            DeployStep::SelectEnvironment,
            DeployStep::RenderStaticOutput,
            DeployStep::Compress,
            DeployStep::SyncArtifacts,
        ]
    );
    assert!(harness.remote.calls().is_empty());
    assert_eq!(harness.storage.passes().len(), 3);
}

#[rstest]
fn disabled_crontab_and_services_are_skipped(harness: Harness) {
    let plan = DeployPlan {
        deploy_crontab: false,
        deploy_services: false,
        ..harness.project.plan()
    };
    let run = RunContext::for_environment(environment("staging", &["web1"], true, "master"));

    let summary = completed(harness.sequencer_with(plan).deploy(&run));

    assert!(!summary.steps.contains(&DeployStep::InstallCrontab));
    assert!(!summary.steps.contains(&DeployStep::ReconcileConfs));
    assert!(harness.remote.copies().is_empty());
}

#[rstest]
fn a_failed_checkout_stops_before_anything_local(harness: Harness) {
    harness.remote.fail_commands_containing("pull origin");
    let run = RunContext::for_environment(environment("staging", &["web1"], true, "master"));

    let outcome = harness.sequencer().deploy(&run);

    assert!(matches!(
        outcome,
        DeployOutcome::Failed {
            step: DeployStep::RemoteCheckout,
            error: DeployError::Server(ServerError::Remote { .. }),
        }
    ));
    assert!(harness.renderer.rendered().is_empty());
    assert!(harness.storage.calls().is_empty());
}

#[rstest]
fn a_failed_static_render_stops_before_syncing() {
    let project = ProjectDir::new();
    let harness = Harness {
        project,
        remote: FakeRemote::new(),
        storage: RecordingStorage::new(),
        renderer: RecordingStaticRenderer::failing(),
        compressor: RecordingCompressor::new(),
        confirmer: ScriptedConfirmer::failing(),
    };
    let run = RunContext::for_environment(environment("preview", &[], false, ""));

    let outcome = harness.sequencer().deploy(&run);

    assert!(matches!(
        outcome,
        DeployOutcome::Failed {
            step: DeployStep::RenderStaticOutput,
            error: DeployError::StaticRender(_),
        }
    ));
    assert!(harness.compressor.requests().is_empty());
    assert!(harness.storage.calls().is_empty());
}

#[rstest]
fn configuration_failures_are_reported_without_stopping_the_deploy(harness: Harness) {
    harness.remote.fail_copies_to("nginx");
    let run = RunContext::for_environment(environment("staging", &["web1"], true, "master"));

    let summary = completed(harness.sequencer().deploy(&run));

    assert!(!summary.is_clean());
    let failed: Vec<&str> = summary
        .conf_failures()
        .map(|result| result.service_name.as_str())
        .collect();
    assert_eq!(failed, vec!["nginx"]);
    assert_eq!(harness.storage.passes().len(), 3);
}
