//! Fixed-count iteration of one prompt for `claude-runner loop`.

use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::core::prompt::validate_prompt;
use crate::error::RunError;
use crate::events::{Emitter, EventPayload};
use crate::io::claude::{Invoker, PromptOptions};
use crate::io::signals::Interrupt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub iterations: u32,
    /// Pause between iterations (not after the last one).
    pub sleep: Duration,
    pub options: PromptOptions,
}

/// Tally of a loop that ran to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
}

/// Invoke the prompt `iterations` times.
///
/// Invoker failures are reported as `iteration-failed` and do not stop the
/// loop. An interrupt observed before an iteration or during the sleep ends
/// the loop with [`RunError::Interrupted`] after a `loop-interrupted` event.
pub async fn run_loop<I: Invoker>(
    config: &LoopConfig,
    invoker: &I,
    emitter: &Emitter,
    interrupt: &mut Interrupt,
) -> Result<LoopSummary> {
    if config.iterations == 0 {
        return Err(RunError::InvalidInput("iterations must be at least 1".to_string()).into());
    }
    validate_prompt(&config.options.prompt)?;

    let total = config.iterations;
    emitter.emit(EventPayload::LoopStarted { total }).await;

    let mut summary = LoopSummary {
        total,
        successful: 0,
        failed: 0,
    };
    for current in 1..=total {
        if interrupt.is_triggered() {
            return interrupted(emitter, current - 1, total).await;
        }

        emitter
            .emit(EventPayload::IterationStarted { current, total })
            .await;
        let started = Instant::now();
        match invoker.run(&config.options).await {
            Ok(_) => {
                summary.successful += 1;
                emitter
                    .emit(EventPayload::IterationCompleted {
                        current,
                        total,
                        duration: started.elapsed(),
                    })
                    .await;
            }
            Err(err) => {
                warn!(current, error = %format!("{err:#}"), "iteration failed");
                summary.failed += 1;
                emitter
                    .emit(EventPayload::IterationFailed {
                        current,
                        total,
                        error: format!("{err:#}"),
                    })
                    .await;
            }
        }

        if current < total && !config.sleep.is_zero() {
            emitter
                .emit(EventPayload::SleepStarted {
                    duration: config.sleep,
                })
                .await;
            if interrupt.sleep(config.sleep).await {
                return interrupted(emitter, current, total).await;
            }
        }
    }

    emitter
        .emit(EventPayload::LoopCompleted {
            total,
            successful: summary.successful,
            failed: summary.failed,
            total_duration: Duration::ZERO,
        })
        .await;
    Ok(summary)
}

async fn interrupted(emitter: &Emitter, completed: u32, total: u32) -> Result<LoopSummary> {
    info!(completed, total, "loop interrupted");
    emitter
        .emit(EventPayload::LoopInterrupted { completed, total })
        .await;
    Err(RunError::Interrupted.into())
}
