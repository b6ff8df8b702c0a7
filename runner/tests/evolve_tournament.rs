//! Tournament scenarios.
//!
//! Most tests drive `run_evolve` with a scripted invoker and the in-memory
//! VCS so every branch operation and judge answer is deterministic. The last
//! test runs a short tournament end to end on a real repository with a fake
//! `claude` script.

use std::time::Duration;

use anyhow::Result;
use claude_runner::core::branch::{FixedBranchNames, RandomBranchNames};
use claude_runner::error::{RunError, is_interrupted};
use claude_runner::events::{Event, EventKind, EventPayload};
use claude_runner::evolve::{EvolveConfig, EvolveOutcome, run_evolve};
use claude_runner::exit_codes;
use claude_runner::io::claude::ClaudeInvoker;
use claude_runner::io::config::RunnerConfig;
use claude_runner::io::git::Git;
use claude_runner::io::signals::Interrupt;
use claude_runner::test_support::{
    FakeVcs, ScriptedInvoker, ScriptedReply, TestRepo, count, drain, recording_bus,
    write_fake_claude,
};

const A: &str = "impl-aaaaaa";
const B: &str = "impl-bbbbbb";
const C: &str = "impl-cccccc";
const D: &str = "impl-dddddd";

struct Run {
    result: Result<EvolveOutcome>,
    events: Vec<Event>,
    vcs: FakeVcs,
    invoker: ScriptedInvoker,
}

#[derive(Default)]
struct Setup {
    fail_on: Option<(&'static str, usize)>,
    interrupt_after_calls: Option<usize>,
}

async fn run_scripted(config: &EvolveConfig, replies: Vec<ScriptedReply>, setup: Setup) -> Run {
    let (bus, mut stream) = recording_bus();
    let mut vcs = FakeVcs::new("main", bus.emitter());
    if let Some((op, nth)) = setup.fail_on {
        vcs = vcs.fail_on(op, nth);
    }
    let mut invoker = ScriptedInvoker::new(replies).with_emitter(bus.emitter());
    let (trigger, mut interrupt) = Interrupt::channel();
    if let Some(after) = setup.interrupt_after_calls {
        invoker = invoker.with_trigger(after, trigger);
    }
    let mut names = FixedBranchNames::new([A, B, C, D]);

    let result = run_evolve(
        config,
        &invoker,
        &vcs,
        &mut names,
        &bus.emitter(),
        &mut interrupt,
    )
    .await;
    let events = drain(&bus, &mut stream);
    Run {
        result,
        events,
        vcs,
        invoker,
    }
}

fn config(iterations: u32) -> EvolveConfig {
    let mut config = EvolveConfig::new("write a calculator");
    config.iterations = iterations;
    config
}

fn payloads(events: &[Event], kind: EventKind) -> Vec<EventPayload> {
    events
        .iter()
        .filter(|event| event.kind == kind)
        .map(|event| event.payload.clone())
        .collect()
}

#[tokio::test]
async fn challenger_wins_when_judge_names_the_winner() {
    let run = run_scripted(
        &config(1),
        vec![
            ScriptedReply::text("implemented"),
            ScriptedReply::text("improved"),
            ScriptedReply::text(A),
        ],
        Setup::default(),
    )
    .await;

    let outcome = run.result.expect("evolve");
    assert_eq!(
        outcome,
        EvolveOutcome {
            final_branch: B.to_string(),
            rounds: 1
        }
    );
    assert_eq!(
        payloads(&run.events, EventKind::WinnerSelected),
        vec![EventPayload::WinnerSelected {
            winner: B.to_string(),
            loser: A.to_string(),
        }]
    );
    assert_eq!(run.vcs.current(), B);
    assert_eq!(run.vcs.branches(), vec![B.to_string(), "main".to_string()]);
    assert_eq!(
        run.vcs.ops(),
        vec![
            format!("checkout -b {A}"),
            format!("squash {A} onto main"),
            format!("checkout -b {B} {A}"),
            format!("squash {B} onto main"),
            "checkout main".to_string(),
            format!("checkout {B}"),
            format!("branch -D {A}"),
        ]
    );
}

#[tokio::test]
async fn event_counts_over_three_rounds() {
    let run = run_scripted(
        &config(3),
        vec![
            ScriptedReply::text("implemented"),
            ScriptedReply::text("round 1"),
            ScriptedReply::text(A),
            ScriptedReply::text("round 2"),
            ScriptedReply::text(format!("{C} is worse")),
            ScriptedReply::text("round 3"),
            ScriptedReply::text(format!("Both {B} and {D} work.\n{B}")),
        ],
        Setup::default(),
    )
    .await;

    let outcome = run.result.expect("evolve");
    assert_eq!(outcome.final_branch, D);

    let events = &run.events;
    for kind in [
        EventKind::RoundStarted,
        EventKind::ImprovementStarted,
        EventKind::ComparisonStarted,
        EventKind::WinnerSelected,
        EventKind::BranchDeleted,
    ] {
        assert_eq!(count(events, kind), 3, "{kind}");
    }
    assert_eq!(count(events, EventKind::BranchCreated), 4);
    assert_eq!(count(events, EventKind::CommitsSquashed), 4);
    assert_eq!(count(events, EventKind::EvolveStarted), 1);
    assert_eq!(count(events, EventKind::EvolveCompleted), 1);
    assert_eq!(count(events, EventKind::ComparisonRetry), 0);

    let last_checkout = payloads(events, EventKind::BranchCheckedOut).pop();
    assert_eq!(
        last_checkout,
        Some(EventPayload::BranchCheckedOut {
            name: D.to_string()
        })
    );
    assert_eq!(
        payloads(events, EventKind::ComparisonStarted)[1],
        EventPayload::ComparisonStarted {
            winner: B.to_string(),
            challenger: C.to_string(),
        }
    );
    assert_eq!(
        events.last().map(|event| event.payload.clone()),
        Some(EventPayload::EvolveCompleted {
            final_branch: D.to_string(),
            total_rounds: 3,
            total_duration: Duration::ZERO,
        })
    );
    assert!(
        payloads(events, EventKind::CommitsSquashed)
            .iter()
            .all(|payload| *payload
                == EventPayload::CommitsSquashed {
                    branch: "main".to_string()
                })
    );
    assert_eq!(count(events, EventKind::RunStarted), 7);
}

#[tokio::test]
async fn judge_is_asked_again_after_an_unclear_answer() {
    let mut config = config(1);
    config.compare_error_retries = 2;
    let run = run_scripted(
        &config,
        vec![
            ScriptedReply::text("implemented"),
            ScriptedReply::text("improved"),
            ScriptedReply::text("I can't decide"),
            ScriptedReply::text(B),
        ],
        Setup::default(),
    )
    .await;

    assert_eq!(run.result.expect("evolve").final_branch, A);
    assert_eq!(
        payloads(&run.events, EventKind::ComparisonRetry),
        vec![EventPayload::ComparisonRetry { attempt: 1, max: 2 }]
    );
    let prompts = run.invoker.prompts();
    assert_eq!(prompts[2], prompts[3], "retries resend the same ballot");
    assert_eq!(run.invoker.remaining(), 0);
}

#[tokio::test]
async fn unparseable_judgement_is_fatal() {
    let mut config = config(2);
    config.compare_error_retries = 1;
    let run = run_scripted(
        &config,
        vec![
            ScriptedReply::text("implemented"),
            ScriptedReply::text("improved"),
            ScriptedReply::text("no idea"),
            ScriptedReply::text(format!("{A} and {B} are equally fine")),
        ],
        Setup::default(),
    )
    .await;

    let err = run.result.unwrap_err();
    match err.downcast_ref::<RunError>() {
        Some(RunError::UnparsableJudgement {
            attempts,
            last_response,
        }) => {
            assert_eq!(*attempts, 2);
            assert!(last_response.contains("equally fine"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(exit_codes::for_result(&Err(err)), exit_codes::FAILURE);
    assert_eq!(count(&run.events, EventKind::ComparisonRetry), 1);
    assert_eq!(count(&run.events, EventKind::WinnerSelected), 0);
    assert_eq!(count(&run.events, EventKind::EvolveCompleted), 0);
    // Judging happens on the original branch; nothing was cleaned up.
    assert_eq!(run.vcs.current(), "main");
    assert_eq!(
        run.vcs.branches(),
        vec![A.to_string(), B.to_string(), "main".to_string()]
    );
}

#[tokio::test]
async fn vcs_failure_in_round_two_stops_the_tournament() {
    let run = run_scripted(
        &config(3),
        vec![
            ScriptedReply::text("implemented"),
            ScriptedReply::text("round 1"),
            ScriptedReply::text(A),
            ScriptedReply::text("never used"),
        ],
        Setup {
            fail_on: Some(("create_branch_from", 2)),
            ..Setup::default()
        },
    )
    .await;

    let err = run.result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunError>(),
        Some(RunError::Vcs { .. })
    ));
    assert!(format!("{err:#}").contains(&format!("checkout -b {C} {B}")));
    assert_eq!(
        run.events.last().map(|event| event.payload.clone()),
        Some(EventPayload::RoundStarted { round: 2, total: 3 })
    );
    assert_eq!(count(&run.events, EventKind::EvolveCompleted), 0);
    assert_eq!(run.invoker.calls().len(), 3);
    assert_eq!(run.vcs.current(), B);
}

#[tokio::test]
async fn child_failure_is_fatal_in_evolve() {
    let run = run_scripted(
        &config(2),
        vec![
            ScriptedReply::text("implemented"),
            ScriptedReply::ChildFailure(1),
        ],
        Setup::default(),
    )
    .await;

    let err = run.result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunError>(),
        Some(RunError::ChildFailure { code: Some(1) })
    ));
    assert_eq!(count(&run.events, EventKind::ComparisonStarted), 0);
    assert_eq!(run.vcs.squashes().len(), 1);
}

#[tokio::test]
async fn interrupt_between_rounds_reports_progress_and_stops() {
    let run = run_scripted(
        &config(2),
        vec![
            ScriptedReply::text("implemented"),
            ScriptedReply::text("round 1"),
            ScriptedReply::text(B),
            ScriptedReply::text("never used"),
        ],
        Setup {
            interrupt_after_calls: Some(3),
            ..Setup::default()
        },
    )
    .await;

    let err = run.result.unwrap_err();
    assert!(is_interrupted(&err));
    assert_eq!(exit_codes::for_result(&Err(err)), exit_codes::INTERRUPTED);
    assert_eq!(count(&run.events, EventKind::EvolveInterrupted), 1);
    assert_eq!(
        run.events.last().map(|event| event.payload.clone()),
        Some(EventPayload::EvolveInterrupted {
            completed: 1,
            total: 2,
            winner: A.to_string(),
        })
    );
    assert_eq!(count(&run.events, EventKind::RoundStarted), 1);
    assert_eq!(run.invoker.remaining(), 1);
}

#[tokio::test]
async fn interrupt_preempts_the_sleep_between_rounds() {
    let mut config = config(2);
    config.sleep = Duration::from_secs(3600);
    let run = run_scripted(
        &config,
        vec![
            ScriptedReply::text("implemented"),
            ScriptedReply::text("round 1"),
            ScriptedReply::text(A),
        ],
        Setup {
            interrupt_after_calls: Some(3),
            ..Setup::default()
        },
    )
    .await;

    assert!(is_interrupted(&run.result.unwrap_err()));
    let tail: Vec<EventPayload> = run
        .events
        .iter()
        .rev()
        .take(2)
        .rev()
        .map(|event| event.payload.clone())
        .collect();
    assert_eq!(
        tail,
        vec![
            EventPayload::SleepStarted {
                duration: Duration::from_secs(3600)
            },
            EventPayload::EvolveInterrupted {
                completed: 1,
                total: 2,
                winner: B.to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn debug_retention_keeps_every_branch() {
    let mut config = config(2);
    config.debug_keep_branches = true;
    let run = run_scripted(
        &config,
        vec![
            ScriptedReply::text("implemented"),
            ScriptedReply::text("round 1"),
            ScriptedReply::text(A),
            ScriptedReply::text("round 2"),
            ScriptedReply::text(C),
        ],
        Setup::default(),
    )
    .await;

    assert_eq!(run.result.expect("evolve").final_branch, B);
    assert_eq!(count(&run.events, EventKind::BranchDeleted), 0);
    assert_eq!(
        run.vcs.branches(),
        vec![
            A.to_string(),
            B.to_string(),
            C.to_string(),
            "main".to_string()
        ]
    );
}

/// Fake `claude`: appends every work prompt to `notes.txt`, and as judge
/// always names the first listed branch (the current winner) as worse.
const TOURNAMENT_SCRIPT: &str = r#"
prompt="$5"
case "$prompt" in
  *"Respond with ONLY the branch name"*)
    loser=$(printf '%s\n' "$prompt" | sed -n 's/^- \(impl-[0-9a-f]*\)$/\1/p' | head -n 1)
    printf '{"type":"result","result":"%s","duration_ms":3}\n' "$loser"
    ;;
  *)
    printf '%s\n' "$prompt" >> notes.txt
    printf '%s\n' '{"type":"result","result":"done","duration_ms":3}'
    ;;
esac
"#;

#[tokio::test]
async fn tournament_runs_end_to_end_on_a_real_repository() {
    let repo = TestRepo::new().expect("repo");
    let bin = tempfile::tempdir().expect("bin dir");
    let script = write_fake_claude(bin.path(), TOURNAMENT_SCRIPT).expect("script");
    let runner_config = RunnerConfig {
        claude_command: script.display().to_string(),
        ..RunnerConfig::default()
    };

    let (bus, mut stream) = recording_bus();
    let invoker = ClaudeInvoker::new(&runner_config, repo.path(), bus.emitter());
    let git = Git::new(repo.path(), bus.emitter());
    let mut config = EvolveConfig::new("write notes");
    config.iterations = 2;

    let outcome = run_evolve(
        &config,
        &invoker,
        &git,
        &mut RandomBranchNames,
        &bus.emitter(),
        &mut Interrupt::never(),
    )
    .await
    .expect("evolve");
    let events = drain(&bus, &mut stream);

    assert_eq!(outcome.rounds, 2);
    assert_eq!(
        repo.current_branch().expect("head"),
        outcome.final_branch
    );
    let candidates = repo
        .git(&["branch", "--list", "--format=%(refname:short)", "impl-*"])
        .expect("branches");
    assert_eq!(candidates, outcome.final_branch);
    assert_eq!(
        repo.commits_between("main", &outcome.final_branch)
            .expect("count"),
        1
    );
    assert_eq!(
        repo.git(&["log", "-1", "--format=%s"]).expect("log"),
        "improve: round 2"
    );
    let notes = std::fs::read_to_string(repo.path().join("notes.txt")).expect("notes");
    assert_eq!(notes.lines().count(), 3);

    assert_eq!(count(&events, EventKind::BranchCreated), 3);
    assert_eq!(count(&events, EventKind::BranchDeleted), 2);
    assert_eq!(count(&events, EventKind::ExecutionResult), 5);
    for payload in payloads(&events, EventKind::WinnerSelected) {
        let EventPayload::WinnerSelected { winner, loser } = payload else {
            unreachable!();
        };
        assert_ne!(winner, loser);
    }
}
