//! Behavioural coverage for configuration reconciliation across hosts.

#[path = "common/project.rs"]
mod project;

use deckhand::reconcile::{ReconcileError, ReconcileOutcome};
use deckhand::test_support::{FakeRemote, RemoteCall};
use deckhand::{RenderError, RunContext};
use project::{NGINX_PATH, ProjectDir, UWSGI_PATH, environment};
use rstest::{fixture, rstest};

#[fixture]
fn project_dir() -> ProjectDir {
    ProjectDir::new()
}

fn staging(hosts: &[&str]) -> RunContext {
    RunContext::for_environment(environment("staging", hosts, true, "master"))
}

fn outcomes(results: &[deckhand::ReconcileResult]) -> Vec<(String, String, bool)> {
    results
        .iter()
        .map(|result| {
            (
                result.host.clone(),
                result.service_name.clone(),
                result.is_installed(),
            )
        })
        .collect()
}

fn mutating_commands(remote: &FakeRemote, host: &str) -> Vec<String> {
    remote
        .calls()
        .into_iter()
        .filter(RemoteCall::is_mutation)
        .filter_map(|call| match call {
            RemoteCall::Run { host: call_host, command } if call_host == host => {
                Some(command.argv().join(" "))
            }
            _ => None,
        })
        .collect()
}

#[rstest]
fn first_run_installs_and_second_run_changes_nothing(project_dir: ProjectDir) {
    let remote = FakeRemote::new();
    let reconciler = project_dir.reconciler(remote.clone());
    let run = staging(&["web1", "web2"]);

    let first = reconciler.reconcile(&run).expect("first run");
    assert_eq!(
        outcomes(&first),
        vec![
            (String::from("web1"), String::from("nginx"), true),
            (String::from("web1"), String::from("uwsgi"), true),
            (String::from("web2"), String::from("nginx"), true),
            (String::from("web2"), String::from("uwsgi"), true),
        ]
    );

    remote.clear_calls();
    let second = reconciler.reconcile(&run).expect("second run");

    assert!(
        second
            .iter()
            .all(|result| result.outcome == ReconcileOutcome::Unchanged),
        "second run: {second:?}"
    );
    assert_eq!(remote.mutation_count(), 0);
}

#[rstest]
fn installed_files_are_privileged_copies_of_the_rendering(project_dir: ProjectDir) {
    let remote = FakeRemote::new();
    let reconciler = project_dir.reconciler(remote.clone());

    reconciler.reconcile(&staging(&["web1"])).expect("reconcile");

    assert!(remote.copies().iter().all(|copy| copy.privileged));
    let installed = remote.file("web1", NGINX_PATH).expect("nginx installed");
    assert_eq!(
        String::from_utf8(installed).expect("utf8"),
        project_dir.rendered("lookup.nginx.conf")
    );
    assert!(project_dir.rendered("lookup.nginx.conf").contains("# staging"));
}

#[rstest]
fn a_missing_remote_file_is_always_installed(project_dir: ProjectDir) {
    let remote = FakeRemote::new();
    remote.put_file("web1", "/etc/nginx/locations-enabled/other.nginx.conf", b"");
    let reconciler = project_dir.reconciler(remote.clone());

    let results = reconciler.reconcile(&staging(&["web1"])).expect("reconcile");

    assert!(results.iter().all(deckhand::ReconcileResult::is_installed));
    assert!(results.iter().all(|result| result.fingerprint_warning.is_none()));
}

#[rstest]
fn changed_nginx_conf_is_copied_once_and_reloaded_once(project_dir: ProjectDir) {
    let remote = FakeRemote::new();
    let reconciler = project_dir.reconciler(remote.clone());
    let run = staging(&["web1"]);
    reconciler.reconcile(&run).expect("initial install");
    remote.put_file("web1", NGINX_PATH, b"stale");
    remote.clear_calls();

    let results = reconciler.reconcile(&run).expect("reconcile");

    assert_eq!(
        outcomes(&results),
        vec![
            (String::from("web1"), String::from("nginx"), true),
            (String::from("web1"), String::from("uwsgi"), false),
        ]
    );
    let copies = remote.copies();
    assert_eq!(copies.len(), 1);
    assert!(copies.iter().all(|copy| copy.remote == NGINX_PATH));
    assert_eq!(
        mutating_commands(&remote, "web1"),
        vec![String::from("sudo -- service nginx reload")]
    );
    assert_eq!(remote.mutation_count(), 2);
}

#[rstest]
fn changed_uwsgi_conf_reloads_the_registry_and_restarts_the_unit(project_dir: ProjectDir) {
    let remote = FakeRemote::new();
    let reconciler = project_dir.reconciler(remote.clone());
    let run = staging(&["web1"]);
    reconciler.reconcile(&run).expect("initial install");
    remote.put_file("web1", UWSGI_PATH, b"stale");
    remote.clear_calls();

    reconciler.reconcile(&run).expect("reconcile");

    let copies = remote.copies();
    assert_eq!(copies.len(), 1);
    assert!(copies.iter().all(|copy| copy.remote == UWSGI_PATH));
    assert_eq!(
        mutating_commands(&remote, "web1"),
        vec![
            String::from("sudo -- initctl reload-configuration"),
            String::from("sudo -- service lookup.uwsgi restart"),
        ]
    );
}

#[rstest]
fn one_failing_service_does_not_stop_the_batch(project_dir: ProjectDir) {
    let remote = FakeRemote::new();
    remote.fail_copies_to("nginx");
    let reconciler = project_dir.reconciler(remote.clone());

    let results = reconciler
        .reconcile(&staging(&["web1", "web2"]))
        .expect("reconcile");

    assert_eq!(results.len(), 4);
    for result in &results {
        match result.service_name.as_str() {
            "nginx" => assert!(matches!(
                result.outcome,
                ReconcileOutcome::Failed(ReconcileError::RemoteMutation { .. })
            )),
            _ => assert!(result.is_installed(), "{result:?}"),
        }
    }
    assert!(remote.file("web2", UWSGI_PATH).is_some());
    assert!(
        !remote
            .commands_on("web1")
            .contains(&String::from("sudo -- service nginx reload")),
        "reload must not follow a failed copy"
    );
}

#[rstest]
fn a_broken_template_is_reported_per_host(project_dir: ProjectDir) {
    project_dir.write("confs/uwsgi.conf", "{{ UNDEFINED_VALUE }}");
    let remote = FakeRemote::new();
    let reconciler = project_dir.reconciler(remote.clone());

    let results = reconciler
        .reconcile(&staging(&["web1", "web2"]))
        .expect("reconcile");

    let failures: Vec<&str> = results
        .iter()
        .filter(|result| result.is_failed())
        .map(|result| result.host.as_str())
        .collect();
    assert_eq!(failures, vec!["web1", "web2"]);
    assert!(results.iter().any(|result| matches!(
        &result.outcome,
        ReconcileOutcome::Failed(ReconcileError::Render(err)) if err.is_missing_context_key()
    )));
    assert!(remote.file("web1", NGINX_PATH).is_some());
}

#[rstest]
fn a_missing_template_fails_only_that_service(project_dir: ProjectDir) {
    std::fs::remove_file(project_dir.path("confs/uwsgi.conf")).expect("remove template");
    let remote = FakeRemote::new();
    let reconciler = project_dir.reconciler(remote.clone());

    let results = reconciler.reconcile(&staging(&["web1"])).expect("reconcile");

    assert!(matches!(
        results.iter().find(|result| result.service_name == "uwsgi").map(|result| &result.outcome),
        Some(ReconcileOutcome::Failed(ReconcileError::Render(RenderError::Io { .. })))
    ));
    assert!(remote.file("web1", NGINX_PATH).is_some());
}

#[rstest]
fn uninstall_keeps_going_after_a_failed_reload(project_dir: ProjectDir) {
    let remote = FakeRemote::new();
    let reconciler = project_dir.reconciler(remote.clone());
    let run = staging(&["web1"]);
    reconciler.reconcile(&run).expect("install");
    remote.fail_commands_containing("service nginx reload");

    let results = reconciler.uninstall(&run).expect("uninstall");

    let clean: Vec<(&str, bool)> = results
        .iter()
        .map(|result| (result.service_name.as_str(), result.is_clean()))
        .collect();
    assert_eq!(clean, vec![("nginx", false), ("uwsgi", true)]);
    assert!(remote.file("web1", NGINX_PATH).is_none());
    assert!(remote.file("web1", UWSGI_PATH).is_none());
    assert!(
        remote
            .commands_on("web1")
            .contains(&String::from("sudo -- service lookup.uwsgi stop"))
    );
}
