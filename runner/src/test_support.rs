//! Test-only doubles: a scripted invoker, an in-memory VCS, a temporary git
//! repository and a fake `claude` executable.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::error::RunError;
use crate::events::{Emitter, Event, EventBus, EventKind, EventPayload, EventStream};
use crate::io::claude::{Invoker, PromptOptions};
use crate::io::git::Vcs;
use crate::io::signals::InterruptTrigger;

/// Capacity large enough that no test blocks on a full bus.
pub const TEST_BUS_CAPACITY: usize = 4096;

/// A bus plus its stream, sized so emitters never wait.
pub fn recording_bus() -> (EventBus, EventStream) {
    let bus = EventBus::new(TEST_BUS_CAPACITY);
    let stream = bus.subscribe().expect("fresh bus has a stream");
    (bus, stream)
}

/// Close the bus and collect everything that was buffered.
pub fn drain(bus: &EventBus, stream: &mut EventStream) -> Vec<Event> {
    bus.close();
    let mut events = Vec::new();
    while let Some(event) = stream.try_next() {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|event| event.kind).collect()
}

pub fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|event| event.kind == kind).count()
}

/// One queued answer for [`ScriptedInvoker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    ChildFailure(i32),
    Protocol(String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }
}

/// Invoker that replays queued replies and records every call.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<PromptOptions>>,
    emitter: Option<Emitter>,
    trigger: Option<(usize, InterruptTrigger)>,
}

impl ScriptedInvoker {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// Emit `run-started` and `assistant-text` per call, like the real invoker.
    pub fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Fire `trigger` once the `after`-th call has returned.
    pub fn with_trigger(mut self, after: usize, trigger: InterruptTrigger) -> Self {
        self.trigger = Some((after, trigger));
        self
    }

    pub fn calls(&self) -> Vec<PromptOptions> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.prompt).collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("replies lock").len()
    }
}

impl Invoker for ScriptedInvoker {
    async fn run(&self, options: &PromptOptions) -> Result<String> {
        let call_number = {
            let mut calls = self.calls.lock().expect("calls lock");
            calls.push(options.clone());
            calls.len()
        };
        let reply = self
            .replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted invoker exhausted at call {call_number}"))?;

        if let Some(emitter) = &self.emitter {
            emitter
                .emit(EventPayload::RunStarted {
                    prompt: options.prompt.clone(),
                    working_dir: ".".to_string(),
                    base_url: None,
                    files: Vec::new(),
                })
                .await;
            if let ScriptedReply::Text(text) = &reply {
                emitter
                    .emit(EventPayload::AssistantText { text: text.clone() })
                    .await;
            }
        }

        if let Some((after, trigger)) = &self.trigger {
            if call_number == *after {
                trigger.trigger();
            }
        }

        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::ChildFailure(code) => {
                Err(RunError::ChildFailure { code: Some(code) }.into())
            }
            ScriptedReply::Protocol(message) => Err(RunError::Protocol { message }.into()),
        }
    }
}

#[derive(Debug)]
struct FakeRepo {
    current: String,
    branches: BTreeSet<String>,
    ops: Vec<String>,
    calls: HashMap<&'static str, usize>,
    fail_on: Option<(&'static str, usize)>,
    squashes: Vec<Squash>,
}

/// A recorded `squash_since` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Squash {
    pub branch: String,
    pub base: String,
    pub message: String,
}

/// In-memory VCS that mirrors git's branch rules and emits the same events.
#[derive(Debug)]
pub struct FakeVcs {
    repo: Mutex<FakeRepo>,
    emitter: Emitter,
}

impl FakeVcs {
    /// Start on `original`, the only branch.
    pub fn new(original: &str, emitter: Emitter) -> Self {
        Self {
            repo: Mutex::new(FakeRepo {
                current: original.to_string(),
                branches: BTreeSet::from([original.to_string()]),
                ops: Vec::new(),
                calls: HashMap::new(),
                fail_on: None,
                squashes: Vec::new(),
            }),
            emitter,
        }
    }

    /// Make the `nth` (1-based) call of `op` fail with a VCS error.
    ///
    /// `op` is one of the trait method names, e.g. `"squash_since"`.
    pub fn fail_on(self, op: &'static str, nth: usize) -> Self {
        self.lock().fail_on = Some((op, nth));
        self
    }

    pub fn current(&self) -> String {
        self.lock().current.clone()
    }

    pub fn branches(&self) -> Vec<String> {
        self.lock().branches.iter().cloned().collect()
    }

    /// Every successful mutation, formatted like the git command line.
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    pub fn squashes(&self) -> Vec<Squash> {
        self.lock().squashes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeRepo> {
        self.repo.lock().expect("fake repo lock")
    }

    fn enter(&self, op: &'static str, command: String) -> Result<std::sync::MutexGuard<'_, FakeRepo>> {
        let mut repo = self.lock();
        let calls = repo.calls.entry(op).or_insert(0);
        *calls += 1;
        let nth = *calls;
        if repo.fail_on == Some((op, nth)) {
            return Err(RunError::Vcs {
                command,
                output: "fatal: injected failure".to_string(),
            }
            .into());
        }
        Ok(repo)
    }

    fn refuse(command: String, output: String) -> anyhow::Error {
        RunError::Vcs { command, output }.into()
    }

    fn create(&self, op: &'static str, name: &str, base: &str) -> Result<()> {
        let command = if base.is_empty() {
            format!("checkout -b {name}")
        } else {
            format!("checkout -b {name} {base}")
        };
        let mut repo = self.enter(op, command.clone())?;
        if repo.branches.contains(name) {
            let output = format!("fatal: a branch named '{name}' already exists");
            return Err(Self::refuse(command, output));
        }
        if !base.is_empty() && !repo.branches.contains(base) {
            let output = format!("fatal: '{base}' is not a commit");
            return Err(Self::refuse(command, output));
        }
        repo.branches.insert(name.to_string());
        repo.current = name.to_string();
        repo.ops.push(command);
        Ok(())
    }
}

impl Vcs for FakeVcs {
    async fn current_branch(&self) -> Result<String> {
        let repo = self.enter("current_branch", "rev-parse --abbrev-ref HEAD".to_string())?;
        Ok(repo.current.clone())
    }

    async fn create_branch(&self, name: &str) -> Result<()> {
        self.create("create_branch", name, "")?;
        self.emitter
            .emit(EventPayload::BranchCreated {
                name: name.to_string(),
                base: String::new(),
            })
            .await;
        Ok(())
    }

    async fn create_branch_from(&self, name: &str, base: &str) -> Result<()> {
        self.create("create_branch_from", name, base)?;
        self.emitter
            .emit(EventPayload::BranchCreated {
                name: name.to_string(),
                base: base.to_string(),
            })
            .await;
        Ok(())
    }

    async fn checkout(&self, name: &str) -> Result<()> {
        {
            let command = format!("checkout {name}");
            let mut repo = self.enter("checkout", command.clone())?;
            if !repo.branches.contains(name) {
                let output = format!("error: pathspec '{name}' did not match any file(s)");
                return Err(Self::refuse(command, output));
            }
            repo.current = name.to_string();
            repo.ops.push(command);
        }
        self.emitter
            .emit(EventPayload::BranchCheckedOut {
                name: name.to_string(),
            })
            .await;
        Ok(())
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        {
            let command = format!("branch -D {name}");
            let mut repo = self.enter("delete_branch", command.clone())?;
            if repo.current == name {
                let output = format!("error: cannot delete branch '{name}' used by worktree");
                return Err(Self::refuse(command, output));
            }
            if !repo.branches.remove(name) {
                let output = format!("error: branch '{name}' not found");
                return Err(Self::refuse(command, output));
            }
            repo.ops.push(command);
        }
        self.emitter
            .emit(EventPayload::BranchDeleted {
                name: name.to_string(),
            })
            .await;
        Ok(())
    }

    async fn squash_since(&self, base: &str, message: &str) -> Result<()> {
        {
            let mut repo = self.enter("squash_since", format!("merge-base HEAD {base}"))?;
            let squash = Squash {
                branch: repo.current.clone(),
                base: base.to_string(),
                message: message.to_string(),
            };
            repo.ops.push(format!("squash {} onto {base}", squash.branch));
            repo.squashes.push(squash);
        }
        self.emitter
            .emit(EventPayload::CommitsSquashed {
                branch: base.to_string(),
            })
            .await;
        Ok(())
    }
}

/// Temporary git repository on `main` with one commit.
#[derive(Debug)]
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"])?;
        repo.git(&["config", "user.name", "Runner Tests"])?;
        repo.git(&["config", "user.email", "runner@example.com"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("README.md", "# fixture\n")?;
        repo.commit_all("initial commit")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run git synchronously and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn write_file(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "-m", message])?;
        Ok(())
    }

    pub fn current_branch(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Number of commits reachable from `to` but not from `from`.
    pub fn commits_between(&self, from: &str, to: &str) -> Result<usize> {
        let range = format!("{from}..{to}");
        let out = self.git(&["rev-list", "--count", &range])?;
        out.parse::<usize>()
            .with_context(|| format!("parse rev-list count {out:?}"))
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        let reference = format!("refs/heads/{name}");
        self.git(&["show-ref", "--verify", "--quiet", &reference])
            .is_ok()
    }
}

/// Write an executable `/bin/sh` script named `claude` into `dir`.
///
/// `body` is the script after the shebang; it typically `printf`s protocol
/// frames and exits with a chosen status.
#[cfg(unix)]
pub fn write_fake_claude(dir: &Path, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("claude");
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    let mut permissions = fs::metadata(&path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions)
        .with_context(|| format!("chmod {}", path.display()))?;
    Ok(path)
}
