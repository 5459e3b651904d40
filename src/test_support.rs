//! Test support utilities shared across unit and integration tests.
//!
//! Every fake records what it was asked to do so tests can assert on side
//! effects without spawning processes or touching real hosts.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::artifacts::{
    ArtifactError, CompressSummary, Compressor, PassKind, StorageError, StorageSync, SyncPass,
};
use crate::command::RemoteCommand;
use crate::config::{DEFAULT_AWS_REGION, DeploySettings};
use crate::confirm::{ConfirmError, Confirmer};
use crate::deploy::{StaticRenderError, StaticRenderer};
use crate::fingerprint::ContentHash;
use crate::secrets::{Secret, SecretsError, SecretsProvider};
use crate::targets::Environment;
use crate::transport::{
    CommandOutput, CommandRunner, RemoteCommandOutput, RemoteTransport, TransportError,
};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, TransportError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| TransportError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// A file copy observed by [`FakeRemote`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopyRecord {
    /// Target host.
    pub host: String,
    /// Local source.
    pub local: Utf8PathBuf,
    /// Remote destination.
    pub remote: Utf8PathBuf,
    /// Whether the copy was elevated.
    pub privileged: bool,
}

/// A call observed by [`FakeRemote`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteCall {
    /// A command execution.
    Run {
        /// Target host.
        host: String,
        /// Command as requested.
        command: RemoteCommand,
    },
    /// A file copy.
    Copy(CopyRecord),
}

impl RemoteCall {
    /// Returns `false` for the read-only existence and hash probes.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        match self {
            Self::Run { command, .. } => !matches!(command.program(), "test" | "sha256sum"),
            Self::Copy(_) => true,
        }
    }
}

#[derive(Debug, Default)]
struct FakeRemoteState {
    files: BTreeMap<(String, String), Vec<u8>>,
    calls: Vec<RemoteCall>,
    failing: Vec<String>,
    undeliverable: Vec<String>,
    failing_copies: Vec<String>,
}

impl FakeRemoteState {
    fn exists(&self, host: &str, path: &str) -> bool {
        let dir_prefix = format!("{}/", path.trim_end_matches('/'));
        self.files
            .keys()
            .any(|(file_host, file)| file_host == host && (file == path || file.starts_with(&dir_prefix)))
    }

    fn remove(&mut self, host: &str, path: &str) {
        let dir_prefix = format!("{}/", path.trim_end_matches('/'));
        self.files.retain(|(file_host, file), _| {
            file_host != host || (file != path && !file.starts_with(&dir_prefix))
        });
    }

    fn execute(&mut self, host: &str, command: &RemoteCommand) -> RemoteCommandOutput {
        let args = command.arguments();
        let operands = || args.iter().filter(|arg| !arg.starts_with('-'));
        match command.program() {
            "test" => {
                let found = operands().all(|path| self.exists(host, path));
                exit(if found { 0 } else { 1 }, String::new(), String::new())
            }
            "sha256sum" => {
                let mut stdout = String::new();
                for path in operands() {
                    let Some(content) = self.files.get(&(host.to_owned(), path.clone())) else {
                        return exit(1, String::new(), format!("sha256sum: {path}: No such file or directory"));
                    };
                    stdout.push_str(&format!("{}  {path}\n", ContentHash::of(content).as_str()));
                }
                exit(0, stdout, String::new())
            }
            "rm" => {
                let targets: Vec<String> = operands().cloned().collect();
                for path in targets {
                    self.remove(host, &path);
                }
                exit(0, String::new(), String::new())
            }
            "touch" => {
                let targets: Vec<String> = operands().cloned().collect();
                for path in targets {
                    self.files.entry((host.to_owned(), path)).or_default();
                }
                exit(0, String::new(), String::new())
            }
            _ => exit(0, String::new(), String::new()),
        }
    }
}

const fn exit(code: i32, stdout: String, stderr: String) -> RemoteCommandOutput {
    RemoteCommandOutput {
        exit_code: Some(code),
        stdout,
        stderr,
    }
}

/// In-memory stand-in for a fleet of hosts.
///
/// Files live in a per-host map. `test -e`, `sha256sum`, `rm` and `touch`
/// act on that map; every other command succeeds without effect. Copies read
/// the local file from disk.
#[derive(Clone, Debug, Default)]
pub struct FakeRemote {
    state: Rc<RefCell<FakeRemoteState>>,
}

impl FakeRemote {
    /// Creates a fleet with no files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file on `host`.
    pub fn put_file(&self, host: &str, path: &str, content: &[u8]) {
        self.state
            .borrow_mut()
            .files
            .insert((host.to_owned(), path.to_owned()), content.to_vec());
    }

    /// Current content of `path` on `host`.
    #[must_use]
    pub fn file(&self, host: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .files
            .get(&(host.to_owned(), path.to_owned()))
            .cloned()
    }

    /// Makes commands whose shell line contains `needle` exit with status 1.
    pub fn fail_commands_containing(&self, needle: &str) {
        self.state.borrow_mut().failing.push(needle.to_owned());
    }

    /// Makes commands whose shell line contains `needle` fail to reach the
    /// host at all.
    pub fn drop_commands_containing(&self, needle: &str) {
        self.state.borrow_mut().undeliverable.push(needle.to_owned());
    }

    /// Makes copies whose remote path contains `needle` fail.
    pub fn fail_copies_to(&self, needle: &str) {
        self.state.borrow_mut().failing_copies.push(needle.to_owned());
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.borrow().calls.clone()
    }

    /// Forgets recorded calls but keeps files and failure rules.
    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Shell lines of every command run on `host`, in order.
    #[must_use]
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Run { host: call_host, command } if call_host == host => {
                    Some(command.argv().join(" "))
                }
                _ => None,
            })
            .collect()
    }

    /// Every copy so far, in order.
    #[must_use]
    pub fn copies(&self) -> Vec<CopyRecord> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Copy(record) => Some(record.clone()),
                RemoteCall::Run { .. } => None,
            })
            .collect()
    }

    /// Number of calls that could change a host.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .count()
    }
}

impl RemoteTransport for FakeRemote {
    fn run(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<RemoteCommandOutput, TransportError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(RemoteCall::Run {
            host: host.to_owned(),
            command: command.clone(),
        });
        let line = command.argv().join(" ");
        if state.undeliverable.iter().any(|needle| line.contains(needle.as_str())) {
            return Err(TransportError::Spawn {
                program: String::from("ssh"),
                message: format!("connection to {host} refused"),
            });
        }
        if state.failing.iter().any(|needle| line.contains(needle.as_str())) {
            return Ok(exit(1, String::new(), String::from("simulated failure")));
        }
        Ok(state.execute(host, command))
    }

    fn copy_to(
        &self,
        host: &str,
        local: &Utf8Path,
        remote: &Utf8Path,
        privileged: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(RemoteCall::Copy(CopyRecord {
            host: host.to_owned(),
            local: local.to_path_buf(),
            remote: remote.to_path_buf(),
            privileged,
        }));
        if state
            .failing_copies
            .iter()
            .any(|needle| remote.as_str().contains(needle.as_str()))
        {
            return Err(TransportError::CommandFailure {
                program: String::from("rsync"),
                status: Some(23),
                status_text: String::from("23"),
                stderr: String::from("simulated failure"),
            });
        }
        let content = fs::read(local).map_err(|_| TransportError::MissingSource {
            path: local.to_path_buf(),
        })?;
        state
            .files
            .insert((host.to_owned(), remote.to_string()), content);
        Ok(())
    }
}

/// A storage request observed by [`RecordingStorage`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StorageCall {
    /// A directory sync, with the files its filters let through at the time.
    Sync {
        /// The pass as requested.
        pass: SyncPass,
        /// Files the pass would transmit, relative to its source.
        transmitted: Vec<Utf8PathBuf>,
    },
    /// A recursive delete.
    Purge(String),
}

#[derive(Debug, Default)]
struct StorageState {
    calls: Vec<StorageCall>,
    failing_kinds: BTreeSet<String>,
    failing_destinations: Vec<String>,
}

/// Storage backend that records requests and evaluates pass filters locally.
#[derive(Clone, Debug, Default)]
pub struct RecordingStorage {
    state: Rc<RefCell<StorageState>>,
}

impl RecordingStorage {
    /// Creates a backend that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every pass of `kind`.
    pub fn fail_pass(&self, kind: PassKind) {
        self.state.borrow_mut().failing_kinds.insert(kind.to_string());
    }

    /// Rejects syncs and purges whose destination contains `needle`.
    pub fn fail_destinations_containing(&self, needle: &str) {
        self.state
            .borrow_mut()
            .failing_destinations
            .push(needle.to_owned());
    }

    /// Every request so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<StorageCall> {
        self.state.borrow().calls.clone()
    }

    /// Sync passes requested so far.
    #[must_use]
    pub fn passes(&self) -> Vec<SyncPass> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                StorageCall::Sync { pass, .. } => Some(pass.clone()),
                StorageCall::Purge(_) => None,
            })
            .collect()
    }

    /// `(destination, file)` pairs the passes would have transmitted.
    #[must_use]
    pub fn transmitted(&self) -> Vec<(String, Utf8PathBuf)> {
        self.state
            .borrow()
            .calls
            .iter()
            .flat_map(|call| match call {
                StorageCall::Sync { pass, transmitted } => transmitted
                    .iter()
                    .map(|file| (pass.destination.clone(), file.clone()))
                    .collect(),
                StorageCall::Purge(_) => Vec::new(),
            })
            .collect()
    }

    /// Destinations purged so far.
    #[must_use]
    pub fn purged(&self) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                StorageCall::Purge(destination) => Some(destination.clone()),
                StorageCall::Sync { .. } => None,
            })
            .collect()
    }

    fn rejection(&self, destination: &str, kind: Option<PassKind>) -> Option<StorageError> {
        let state = self.state.borrow();
        let kind_fails = kind.is_some_and(|pass| state.failing_kinds.contains(&pass.to_string()));
        let destination_fails = state
            .failing_destinations
            .iter()
            .any(|needle| destination.contains(needle.as_str()));
        (kind_fails || destination_fails).then(|| StorageError::Rejected {
            destination: destination.to_owned(),
            reason: String::from("simulated failure"),
        })
    }
}

impl StorageSync for RecordingStorage {
    fn sync_directory(&self, pass: &SyncPass) -> Result<(), StorageError> {
        let transmitted = pass.selected_files().unwrap_or_default();
        self.state.borrow_mut().calls.push(StorageCall::Sync {
            pass: pass.clone(),
            transmitted,
        });
        self.rejection(&pass.destination, Some(pass.kind))
            .map_or(Ok(()), Err)
    }

    fn purge(&self, destination: &str) -> Result<(), StorageError> {
        self.state
            .borrow_mut()
            .calls
            .push(StorageCall::Purge(destination.to_owned()));
        self.rejection(destination, None).map_or(Ok(()), Err)
    }
}

/// Confirmer that replays scripted answers and records prompts.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConfirmer {
    answers: Rc<RefCell<VecDeque<Result<String, ConfirmError>>>>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedConfirmer {
    /// Replies `answer` to the first prompt.
    #[must_use]
    pub fn answering(answer: &str) -> Self {
        let confirmer = Self::default();
        confirmer.push_answer(answer);
        confirmer
    }

    /// Fails every prompt.
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }

    /// Queues another answer.
    pub fn push_answer(&self, answer: &str) {
        self.answers.borrow_mut().push_back(Ok(answer.to_owned()));
    }

    /// Prompts shown so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn ask(&self, message: &str) -> Result<String, ConfirmError> {
        self.prompts.borrow_mut().push(message.to_owned());
        self.answers
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ConfirmError::Prompt(String::from("no terminal attached"))))
    }
}

/// Static renderer that records the environments it was asked to render.
#[derive(Clone, Debug, Default)]
pub struct RecordingStaticRenderer {
    rendered: Rc<RefCell<Vec<String>>>,
    fail: bool,
}

impl RecordingStaticRenderer {
    /// Succeeds on every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails on every call.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Environment names rendered so far.
    #[must_use]
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.borrow().clone()
    }
}

impl StaticRenderer for RecordingStaticRenderer {
    fn render_static(&self, environment: &Environment) -> Result<(), StaticRenderError> {
        self.rendered.borrow_mut().push(environment.name.clone());
        if self.fail {
            return Err(StaticRenderError::Failed {
                message: String::from("simulated failure"),
            });
        }
        Ok(())
    }
}

/// Compressor that records requests without touching the filesystem.
#[derive(Clone, Debug, Default)]
pub struct RecordingCompressor {
    requests: Rc<RefCell<Vec<(Utf8PathBuf, Utf8PathBuf)>>>,
    fail: bool,
}

impl RecordingCompressor {
    /// Succeeds on every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails on every call.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(source, destination)` pairs requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<(Utf8PathBuf, Utf8PathBuf)> {
        self.requests.borrow().clone()
    }
}

impl Compressor for RecordingCompressor {
    fn compress(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<CompressSummary, ArtifactError> {
        self.requests
            .borrow_mut()
            .push((source.to_path_buf(), destination.to_path_buf()));
        if self.fail {
            return Err(ArtifactError::Io {
                path: source.to_path_buf(),
                message: String::from("simulated failure"),
            });
        }
        Ok(CompressSummary::default())
    }
}

/// Secrets provider backed by a fixed map.
#[derive(Clone, Debug, Default)]
pub struct StaticSecrets {
    values: BTreeMap<String, String>,
    fail: bool,
}

impl StaticSecrets {
    /// Provides `pairs`.
    #[must_use]
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                .collect(),
            fail: false,
        }
    }

    /// Fails every request.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl SecretsProvider for StaticSecrets {
    fn secrets(&self) -> Result<BTreeMap<String, Secret>, SecretsError> {
        if self.fail {
            return Err(SecretsError::Unavailable(String::from("simulated failure")));
        }
        Ok(self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), Secret::new(value.as_str())))
            .collect())
    }
}

/// Settings equal to the built-in defaults, without reading any source.
#[must_use]
pub fn default_settings() -> DeploySettings {
    DeploySettings {
        ssh_bin: String::from("ssh"),
        rsync_bin: String::from("rsync"),
        aws_bin: String::from("aws"),
        ssh_user: String::from("ubuntu"),
        ssh_port: 22,
        ssh_identity_file: None,
        ssh_batch_mode: true,
        aws_region: String::from(DEFAULT_AWS_REGION),
        manifest_path: String::from("deploy.toml"),
        template_dir: String::from("confs"),
        staging_dir: String::from("confs/rendered"),
        gzip_patterns_path: String::from("gzip_types.txt"),
        source_root: String::from("www"),
        build_root: String::from(".gzip"),
        assets_dir: String::from("www/assets"),
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    #[must_use]
    pub fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
