//! Behavioural coverage for tearing an environment down.

#[path = "common/project.rs"]
mod project;

use deckhand::test_support::{FakeRemote, RecordingStorage, ScriptedConfirmer};
use deckhand::{
    AbortReason, ArtifactSync, DeployPlan, DestroyOutcome, DestroyReport, DestructionSequencer,
    JinjaEngine, PreconditionError, RunContext, ServerOps,
};
use project::{NGINX_PATH, ProjectDir, UWSGI_PATH, environment, layout};
use rstest::{fixture, rstest};

struct Harness {
    project: ProjectDir,
    remote: FakeRemote,
    storage: RecordingStorage,
    confirmer: ScriptedConfirmer,
}

impl Harness {
    fn sequencer(
        &self,
        plan: DeployPlan,
    ) -> DestructionSequencer<JinjaEngine, FakeRemote, RecordingStorage, ScriptedConfirmer> {
        DestructionSequencer::new(
            plan,
            ServerOps::new(self.remote.clone(), layout()),
            self.project.reconciler(self.remote.clone()),
            ArtifactSync::new(self.storage.clone()),
            self.confirmer.clone(),
        )
    }

    /// Installs configuration and a project checkout the way a deploy would.
    fn seed(&self, hosts: &[&str]) {
        let run = RunContext::for_environment(environment("staging", hosts, true, "master"));
        self.project
            .reconciler(self.remote.clone())
            .reconcile(&run)
            .expect("install configuration");
        for host in hosts {
            self.remote
                .put_file(host, "/home/ubuntu/apps/lookup/repository/crontab", b"* * * * * true");
            self.remote.put_file(host, "/etc/cron.d/lookup", b"* * * * * true");
        }
        self.remote.clear_calls();
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        project: ProjectDir::new(),
        remote: FakeRemote::new(),
        storage: RecordingStorage::new(),
        confirmer: ScriptedConfirmer::failing(),
    }
}

fn staging(hosts: &[&str]) -> RunContext {
    RunContext::for_environment(environment("staging", hosts, true, "master"))
}

fn completed(outcome: DestroyOutcome) -> DestroyReport {
    match outcome {
        DestroyOutcome::Completed(report) => report,
        DestroyOutcome::Aborted(reason) => panic!("destruction aborted: {reason:?}"),
    }
}

#[rstest]
#[case("n")]
#[case("Not at all")]
#[case("")]
fn anything_but_an_accepted_answer_aborts(harness: Harness, #[case] answer: &str) {
    harness.seed(&["web1"]);
    harness.confirmer.push_answer(answer);

    let outcome = harness.sequencer(harness.project.plan()).destroy(&staging(&["web1"]));

    assert_eq!(outcome, DestroyOutcome::Aborted(AbortReason::ConfirmationDeclined));
    assert!(harness.remote.calls().is_empty());
    assert!(harness.storage.calls().is_empty());
    assert!(harness.remote.file("web1", NGINX_PATH).is_some());
}

#[rstest]
fn the_prompt_names_the_environment(harness: Harness) {
    let outcome = harness.sequencer(harness.project.plan()).destroy(&staging(&["web1"]));

    assert_eq!(outcome, DestroyOutcome::Aborted(AbortReason::ConfirmationDeclined));
    assert_eq!(
        harness.confirmer.prompts(),
        vec![String::from(
            "You are about to destroy everything deployed to staging for this project.\n\
             Do you know what you're doing?"
        )]
    );
}

#[rstest]
fn nothing_is_asked_without_an_environment(harness: Harness) {
    let outcome = harness
        .sequencer(harness.project.plan())
        .destroy(&RunContext::unselected());

    assert_eq!(
        outcome,
        DestroyOutcome::Aborted(AbortReason::Precondition(
            PreconditionError::EnvironmentNotSelected
        ))
    );
    assert!(harness.confirmer.prompts().is_empty());
}

#[rstest]
fn confirmed_destruction_removes_everything(harness: Harness) {
    harness.seed(&["web1", "web2"]);
    harness.confirmer.push_answer("yes");

    let report = completed(
        harness
            .sequencer(harness.project.plan())
            .destroy(&staging(&["web1", "web2"])),
    );

    assert!(report.is_clean(), "{report:?}");
    assert_eq!(
        harness.storage.purged(),
        vec![String::from("s3://staging.example.org/lookup/")]
    );
    for host in ["web1", "web2"] {
        assert!(harness.remote.file(host, NGINX_PATH).is_none());
        assert!(harness.remote.file(host, UWSGI_PATH).is_none());
        assert!(harness.remote.file(host, "/etc/cron.d/lookup").is_none());
        assert!(
            harness
                .remote
                .file(host, "/home/ubuntu/apps/lookup/repository/crontab")
                .is_none()
        );
    }
    assert_eq!(report.uninstall.len(), 4);
}

#[rstest]
fn static_only_environments_only_purge_buckets(harness: Harness) {
    harness.confirmer.push_answer("y");
    let run = RunContext::for_environment(environment("preview", &["web1"], false, ""));

    let report = completed(harness.sequencer(harness.project.plan()).destroy(&run));

    assert_eq!(report.purge.purged.len(), 1);
    assert!(report.uninstall.is_empty());
    assert!(harness.remote.calls().is_empty());
}

#[rstest]
fn failures_are_collected_and_cleanup_continues(harness: Harness) {
    harness.seed(&["web1", "web2"]);
    harness.confirmer.push_answer("buzz off");
    harness.storage.fail_destinations_containing("staging.example.org");
    harness.remote.drop_commands_containing("rm -rf");

    let report = completed(
        harness
            .sequencer(harness.project.plan())
            .destroy(&staging(&["web1", "web2"])),
    );

    assert!(!report.is_clean());
    assert_eq!(report.purge.failures.len(), 1);
    assert_eq!(report.server_failures.len(), 2);
    assert!(harness.remote.file("web2", "/etc/cron.d/lookup").is_none());
    assert!(harness.remote.file("web2", NGINX_PATH).is_none());
}

#[rstest]
fn disabled_services_and_crontab_are_left_alone(harness: Harness) {
    harness.seed(&["web1"]);
    harness.confirmer.push_answer("y");
    let plan = DeployPlan {
        deploy_crontab: false,
        deploy_services: false,
        ..harness.project.plan()
    };

    let report = completed(harness.sequencer(plan).destroy(&staging(&["web1"])));

    assert!(report.uninstall.is_empty());
    assert!(harness.remote.file("web1", "/etc/cron.d/lookup").is_some());
    assert!(harness.remote.file("web1", NGINX_PATH).is_some());
    assert_eq!(
        harness.remote.commands_on("web1"),
        vec![String::from("rm -rf /home/ubuntu/apps/lookup")]
    );
}
