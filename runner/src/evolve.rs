//! Single-elimination tournament for `claude-runner evolve`.
//!
//! Every candidate lives on its own branch. The plan is implemented once on
//! the first branch; each round forks a challenger from the current winner,
//! asks the assistant to improve it, then asks the assistant (from the
//! original branch) which of the two is worse. The loser's branch is deleted.
//!
//! ```text
//! INIT -> IMPLEMENTED -> (ROUND_START -> IMPROVED -> COMPARED -> UPDATED)* -> DONE
//! ```

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::branch::BranchNames;
use crate::core::judge::parse_loser;
use crate::core::prompt::{implement_message, improve_message, judge_prompt, validate_prompt};
use crate::error::RunError;
use crate::events::{Emitter, EventPayload};
use crate::io::claude::{Invoker, PromptOptions};
use crate::io::git::Vcs;
use crate::io::signals::Interrupt;

pub const DEFAULT_IMPROVE_PROMPT: &str = "improve the code quality and fix any issues";
pub const DEFAULT_COMPARE_PROMPT: &str =
    "compare these two implementations and determine which is worse";
pub const DEFAULT_ITERATIONS: u32 = 3;
pub const DEFAULT_COMPARE_ERROR_RETRIES: u32 = 3;

/// `--system-prompt` / `--append-system-prompt` for one kind of call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemPrompts {
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
}

impl SystemPrompts {
    fn options(&self, prompt: &str) -> PromptOptions {
        PromptOptions::new(prompt).with_system_prompts(
            self.system_prompt.clone(),
            self.append_system_prompt.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolveConfig {
    pub plan: String,
    pub improve_prompt: String,
    pub compare_prompt: String,
    /// Number of improvement rounds.
    pub iterations: u32,
    pub sleep: Duration,
    /// Extra judge attempts after an unparseable answer.
    pub compare_error_retries: u32,
    /// Keep losing branches instead of deleting them.
    pub debug_keep_branches: bool,
    pub plan_system: SystemPrompts,
    pub improve_system: SystemPrompts,
    pub compare_system: SystemPrompts,
}

impl EvolveConfig {
    pub fn new(plan: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            improve_prompt: DEFAULT_IMPROVE_PROMPT.to_string(),
            compare_prompt: DEFAULT_COMPARE_PROMPT.to_string(),
            iterations: DEFAULT_ITERATIONS,
            sleep: Duration::ZERO,
            compare_error_retries: DEFAULT_COMPARE_ERROR_RETRIES,
            debug_keep_branches: false,
            plan_system: SystemPrompts::default(),
            improve_system: SystemPrompts::default(),
            compare_system: SystemPrompts::default(),
        }
    }

    fn validate(&self) -> Result<(), RunError> {
        if self.iterations == 0 {
            return Err(RunError::InvalidInput(
                "iterations must be at least 1".to_string(),
            ));
        }
        validate_prompt(&self.plan)?;
        validate_prompt(&self.improve_prompt)?;
        validate_prompt(&self.compare_prompt)
    }
}

/// Result of a tournament that ran every round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolveOutcome {
    pub final_branch: String,
    pub rounds: u32,
}

/// Run the tournament. On success the working tree is left on the winner.
pub async fn run_evolve<I, V, N>(
    config: &EvolveConfig,
    invoker: &I,
    vcs: &V,
    names: &mut N,
    emitter: &Emitter,
    interrupt: &mut Interrupt,
) -> Result<EvolveOutcome>
where
    I: Invoker,
    V: Vcs,
    N: BranchNames,
{
    config.validate()?;

    let original = vcs.current_branch().await?;
    info!(original = %original, rounds = config.iterations, "starting tournament");
    let mut tournament = Tournament {
        config,
        invoker,
        vcs,
        emitter,
        original,
        winner: String::new(),
    };
    tournament.run(names, interrupt).await
}

struct Tournament<'a, I, V> {
    config: &'a EvolveConfig,
    invoker: &'a I,
    vcs: &'a V,
    emitter: &'a Emitter,
    /// Branch checked out at start; neutral ground for judging.
    original: String,
    /// Empty until the initial implementation is squashed.
    winner: String,
}

impl<I: Invoker, V: Vcs> Tournament<'_, I, V> {
    async fn run<N: BranchNames>(
        &mut self,
        names: &mut N,
        interrupt: &mut Interrupt,
    ) -> Result<EvolveOutcome> {
        let total = self.config.iterations;
        self.emitter
            .emit(EventPayload::EvolveStarted { total })
            .await;
        if interrupt.is_triggered() {
            return self.interrupted(0).await;
        }

        self.implement(names.next_name()).await?;

        for round in 1..=total {
            if interrupt.is_triggered() {
                return self.interrupted(round - 1).await;
            }
            self.emitter
                .emit(EventPayload::RoundStarted { round, total })
                .await;

            let challenger = names.next_name();
            self.improve(&challenger, round).await?;
            let loser = self.judge(&challenger).await?;
            self.promote(challenger, loser).await?;

            let sleep = self.config.sleep;
            if round < total && !sleep.is_zero() {
                self.emitter
                    .emit(EventPayload::SleepStarted { duration: sleep })
                    .await;
                if interrupt.sleep(sleep).await {
                    return self.interrupted(round).await;
                }
            }
        }

        info!(winner = %self.winner, "tournament complete");
        self.emitter
            .emit(EventPayload::EvolveCompleted {
                final_branch: self.winner.clone(),
                total_rounds: total,
                total_duration: Duration::ZERO,
            })
            .await;
        Ok(EvolveOutcome {
            final_branch: self.winner.clone(),
            rounds: total,
        })
    }

    /// Implement the plan on a fresh branch at HEAD; it becomes the winner.
    async fn implement(&mut self, branch: String) -> Result<()> {
        self.vcs.create_branch(&branch).await?;
        let options = self.config.plan_system.options(&self.config.plan);
        self.invoker.run(&options).await?;
        self.vcs
            .squash_since(&self.original, &implement_message(&self.config.plan))
            .await?;
        debug!(branch = %branch, "initial implementation squashed");
        self.winner = branch;
        Ok(())
    }

    async fn improve(&self, challenger: &str, round: u32) -> Result<()> {
        self.vcs
            .create_branch_from(challenger, &self.winner)
            .await?;
        self.emitter
            .emit(EventPayload::ImprovementStarted {
                branch: challenger.to_string(),
            })
            .await;
        let options = self
            .config
            .improve_system
            .options(&self.config.improve_prompt);
        self.invoker.run(&options).await?;
        self.vcs
            .squash_since(&self.original, &improve_message(round))
            .await
    }

    /// Ask for the worse of winner and challenger; returns the loser's name.
    async fn judge(&self, challenger: &str) -> Result<String> {
        self.emitter
            .emit(EventPayload::ComparisonStarted {
                winner: self.winner.clone(),
                challenger: challenger.to_string(),
            })
            .await;
        self.vcs.checkout(&self.original).await?;

        let prompt = judge_prompt(&self.config.compare_prompt, &self.winner, challenger);
        let options = self.config.compare_system.options(&prompt);
        let max = self.config.compare_error_retries;
        let mut last_response = String::new();
        for attempt in 0..=max {
            if attempt > 0 {
                self.emitter
                    .emit(EventPayload::ComparisonRetry { attempt, max })
                    .await;
            }
            let response = self.invoker.run(&options).await?;
            match parse_loser(&response, &self.winner, challenger) {
                Ok(loser) => {
                    debug!(loser, attempt, "judge answered");
                    return Ok(loser.to_string());
                }
                Err(err) => {
                    warn!(attempt, error = %err, "unparseable judgement");
                    last_response = response;
                }
            }
        }
        Err(RunError::UnparsableJudgement {
            attempts: max + 1,
            last_response,
        }
        .into())
    }

    async fn promote(&mut self, challenger: String, loser: String) -> Result<()> {
        let new_winner = if loser == self.winner {
            challenger
        } else {
            self.winner.clone()
        };
        self.emitter
            .emit(EventPayload::WinnerSelected {
                winner: new_winner.clone(),
                loser: loser.clone(),
            })
            .await;
        self.vcs.checkout(&new_winner).await?;
        if self.config.debug_keep_branches {
            debug!(loser = %loser, "keeping losing branch");
        } else {
            self.vcs.delete_branch(&loser).await?;
        }
        self.winner = new_winner;
        Ok(())
    }

    async fn interrupted(&self, completed: u32) -> Result<EvolveOutcome> {
        info!(completed, winner = %self.winner, "tournament interrupted");
        self.emitter
            .emit(EventPayload::EvolveInterrupted {
                completed,
                total: self.config.iterations,
                winner: self.winner.clone(),
            })
            .await;
        Err(RunError::Interrupted.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::branch::FixedBranchNames;
    use crate::events::EventKind;
    use crate::test_support::{
        FakeVcs, ScriptedInvoker, ScriptedReply, count, drain, recording_bus,
    };

    const A: &str = "impl-aaaaaa";
    const B: &str = "impl-bbbbbb";

    fn names() -> FixedBranchNames {
        FixedBranchNames::new([A, B, "impl-cccccc", "impl-dddddd"])
    }

    #[tokio::test]
    async fn judge_prompt_lists_winner_then_challenger() {
        let (bus, mut stream) = recording_bus();
        let vcs = FakeVcs::new("main", bus.emitter());
        let invoker = ScriptedInvoker::new(vec![
            ScriptedReply::text("built"),
            ScriptedReply::text("polished"),
            ScriptedReply::text(B),
        ]);
        let mut config = EvolveConfig::new("build a parser");
        config.iterations = 1;
        config.compare_system.append_system_prompt = Some("be strict".to_string());

        let outcome = run_evolve(
            &config,
            &invoker,
            &vcs,
            &mut names(),
            &bus.emitter(),
            &mut Interrupt::never(),
        )
        .await
        .expect("evolve");
        assert_eq!(outcome.final_branch, A);

        let calls = invoker.calls();
        assert_eq!(calls[0].prompt, "build a parser");
        assert_eq!(calls[1].prompt, DEFAULT_IMPROVE_PROMPT);
        assert_eq!(calls[2].prompt, judge_prompt(DEFAULT_COMPARE_PROMPT, A, B));
        assert_eq!(calls[2].append_system_prompt.as_deref(), Some("be strict"));
        assert_eq!(calls[0].append_system_prompt, None);

        let squashes = vcs.squashes();
        assert_eq!(squashes[0].branch, A);
        assert_eq!(squashes[0].message, "implement: build a parser");
        assert_eq!(squashes[1].branch, B);
        assert_eq!(squashes[1].message, "improve: round 1");
        assert!(squashes.iter().all(|squash| squash.base == "main"));
        drain(&bus, &mut stream);
    }

    #[tokio::test]
    async fn zero_retries_means_single_judge_attempt() {
        let (bus, mut stream) = recording_bus();
        let vcs = FakeVcs::new("main", bus.emitter());
        let invoker = ScriptedInvoker::new(vec![
            ScriptedReply::text("built"),
            ScriptedReply::text("polished"),
            ScriptedReply::text("both look fine"),
        ]);
        let mut config = EvolveConfig::new("plan");
        config.iterations = 1;
        config.compare_error_retries = 0;

        let err = run_evolve(
            &config,
            &invoker,
            &vcs,
            &mut names(),
            &bus.emitter(),
            &mut Interrupt::never(),
        )
        .await
        .unwrap_err();
        match err.downcast_ref::<RunError>() {
            Some(RunError::UnparsableJudgement {
                attempts,
                last_response,
            }) => {
                assert_eq!(*attempts, 1);
                assert_eq!(last_response, "both look fine");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let events = drain(&bus, &mut stream);
        assert_eq!(count(&events, EventKind::ComparisonRetry), 0);
        assert_eq!(count(&events, EventKind::WinnerSelected), 0);
    }

    #[tokio::test]
    async fn interrupt_before_implementation_reports_empty_winner() {
        let (bus, mut stream) = recording_bus();
        let vcs = FakeVcs::new("main", bus.emitter());
        let invoker = ScriptedInvoker::new(Vec::new());
        let (trigger, mut interrupt) = Interrupt::channel();
        trigger.trigger();

        let err = run_evolve(
            &EvolveConfig::new("plan"),
            &invoker,
            &vcs,
            &mut names(),
            &bus.emitter(),
            &mut interrupt,
        )
        .await
        .unwrap_err();
        assert!(crate::error::is_interrupted(&err));

        let events = drain(&bus, &mut stream);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].payload,
            EventPayload::EvolveInterrupted {
                completed: 0,
                total: DEFAULT_ITERATIONS,
                winner: String::new(),
            }
        );
        assert!(vcs.ops().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_touches_nothing() {
        let (bus, mut stream) = recording_bus();
        let vcs = FakeVcs::new("main", bus.emitter());
        let invoker = ScriptedInvoker::new(Vec::new());

        let mut config = EvolveConfig::new("plan");
        config.iterations = 0;
        let err = run_evolve(
            &config,
            &invoker,
            &vcs,
            &mut names(),
            &bus.emitter(),
            &mut Interrupt::never(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::InvalidInput(_))
        ));

        let blank = EvolveConfig::new(" \n");
        assert!(
            run_evolve(
                &blank,
                &invoker,
                &vcs,
                &mut names(),
                &bus.emitter(),
                &mut Interrupt::never(),
            )
            .await
            .is_err()
        );
        assert!(drain(&bus, &mut stream).is_empty());
        assert!(vcs.ops().is_empty());
    }
}
