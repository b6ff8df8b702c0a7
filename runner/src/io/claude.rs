//! Invoker abstraction for the assistant CLI.
//!
//! The [`Invoker`] trait decouples the controllers from the actual backend
//! (`claude -p` with streaming JSON output). Tests use scripted invokers that
//! return predetermined answers without spawning processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, info, instrument, warn};

use crate::core::prompt::validate_prompt;
use crate::core::protocol::{ContentBlock, Frame, parse_frame, tool_result_text};
use crate::error::RunError;
use crate::events::{Emitter, EventPayload};
use crate::io::config::RunnerConfig;

/// Environment variable surfaced in `run-started` for display.
pub const BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";

/// Prompt plus the optional system-prompt pair for one invocation.
///
/// Empty strings are treated the same as `None`: the flag is omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptOptions {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
}

impl PromptOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system_prompts(
        mut self,
        system_prompt: Option<String>,
        append_system_prompt: Option<String>,
    ) -> Self {
        self.system_prompt = system_prompt;
        self.append_system_prompt = append_system_prompt;
        self
    }
}

/// Abstraction over assistant backends.
#[allow(async_fn_in_trait)]
pub trait Invoker {
    /// Run one prompt to completion and return the final result text
    /// (empty if the assistant reported none).
    async fn run(&self, options: &PromptOptions) -> Result<String>;
}

/// Invoker that spawns the `claude` CLI and streams its events onto the bus.
#[derive(Debug, Clone)]
pub struct ClaudeInvoker {
    command: String,
    workdir: PathBuf,
    initial_line_bytes: usize,
    max_line_bytes: usize,
    emitter: Emitter,
}

impl ClaudeInvoker {
    pub fn new(config: &RunnerConfig, workdir: impl Into<PathBuf>, emitter: Emitter) -> Self {
        Self {
            command: config.claude_command.clone(),
            workdir: workdir.into(),
            initial_line_bytes: config.initial_line_bytes,
            max_line_bytes: config.max_line_bytes,
            emitter,
        }
    }

    /// Read stdout to EOF, emitting events; returns the last result text.
    async fn pump(&self, stdout: ChildStdout) -> Result<String> {
        let mut reader = BufReader::with_capacity(self.initial_line_bytes, stdout);
        let mut line = Vec::new();
        let mut final_text = String::new();
        let mut frames = 0usize;

        loop {
            line.clear();
            let read = (&mut reader)
                .take(self.max_line_bytes as u64 + 1)
                .read_until(b'\n', &mut line)
                .await
                .context("read claude stdout")?;
            if read == 0 {
                break;
            }
            let content_len = line.len() - usize::from(line.ends_with(b"\n"));
            if content_len > self.max_line_bytes {
                warn!(limit = self.max_line_bytes, "stdout line too long");
                return Err(RunError::Protocol {
                    message: format!("stdout line exceeds {} bytes", self.max_line_bytes),
                }
                .into());
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let frame = parse_frame(text).map_err(|err| RunError::Protocol {
                message: err.to_string(),
            })?;
            frames += 1;
            self.dispatch(frame, &mut final_text).await;
        }

        debug!(frames, "claude stdout closed");
        Ok(final_text)
    }

    async fn dispatch(&self, frame: Frame, final_text: &mut String) {
        match frame {
            Frame::Assistant { message } => {
                for block in message.content.blocks() {
                    match block {
                        ContentBlock::Text { text } => {
                            self.emitter
                                .emit(EventPayload::AssistantText { text: text.clone() })
                                .await;
                        }
                        ContentBlock::ToolUse { name, input } => {
                            self.emitter
                                .emit(EventPayload::ToolUse {
                                    name: name.clone(),
                                    input: input.clone(),
                                })
                                .await;
                        }
                        ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
                    }
                }
            }
            Frame::User { message } => {
                for block in message.content.blocks() {
                    if let ContentBlock::ToolResult { content } = block {
                        let content = tool_result_text(content.as_ref());
                        if !content.is_empty() {
                            self.emitter
                                .emit(EventPayload::ToolResult { content })
                                .await;
                        }
                    }
                }
            }
            Frame::Result {
                result,
                duration_ms,
            } => {
                if let Some(result) = result.filter(|text| !text.is_empty()) {
                    *final_text = result;
                }
                let duration = duration_ms
                    .filter(|ms| *ms > 0.0)
                    .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok());
                if let Some(duration) = duration {
                    self.emitter
                        .emit(EventPayload::ExecutionResult { duration })
                        .await;
                }
            }
            Frame::Other => {}
        }
    }
}

impl Invoker for ClaudeInvoker {
    #[instrument(skip_all, fields(command = %self.command))]
    async fn run(&self, options: &PromptOptions) -> Result<String> {
        validate_prompt(&options.prompt)?;

        self.emitter
            .emit(EventPayload::RunStarted {
                prompt: options.prompt.clone(),
                working_dir: self.workdir.display().to_string(),
                base_url: std::env::var(BASE_URL_ENV)
                    .ok()
                    .filter(|url| !url.is_empty()),
                files: Vec::new(),
            })
            .await;

        info!(workdir = %self.workdir.display(), "starting claude");
        let mut command = Command::new(&self.command);
        command
            .args(build_args(options))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        // A terminal Ctrl-C goes to the whole foreground group. The child gets
        // its own group so it finishes and the interrupt is seen afterwards.
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .with_context(|| format!("spawn {}", self.command))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;

        // The pipe is dropped before waiting so a child still writing after a
        // protocol error sees EPIPE instead of blocking forever.
        let read = self.pump(stdout).await;
        let status = child.wait().await.context("wait for claude")?;
        let final_text = read?;

        if !status.success() {
            warn!(exit_code = ?status.code(), "claude failed");
            return Err(RunError::ChildFailure {
                code: status.code(),
            }
            .into());
        }

        debug!(final_len = final_text.len(), "claude completed");
        Ok(final_text)
    }
}

/// Argument vector for one invocation (excluding the executable).
pub fn build_args(options: &PromptOptions) -> Vec<String> {
    let mut args = vec![
        "--verbose".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "-p".to_string(),
        options.prompt.clone(),
    ];
    if let Some(system_prompt) = non_empty(options.system_prompt.as_deref()) {
        args.push("--system-prompt".to_string());
        args.push(system_prompt.to_string());
    }
    if let Some(append) = non_empty(options.append_system_prompt.as_deref()) {
        args.push("--append-system-prompt".to_string());
        args.push(append.to_string());
    }
    args
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    #[test]
    fn args_have_fixed_prefix() {
        let args = build_args(&PromptOptions::new("ping"));
        assert_eq!(
            args,
            vec!["--verbose", "--output-format", "stream-json", "-p", "ping"]
        );
    }

    #[test]
    fn system_prompts_follow_prompt_in_order() {
        let options = PromptOptions::new("ping")
            .with_system_prompts(Some("be terse".to_string()), Some("and kind".to_string()));
        let args = build_args(&options);
        assert_eq!(
            &args[5..],
            &[
                "--system-prompt",
                "be terse",
                "--append-system-prompt",
                "and kind"
            ]
        );
    }

    #[test]
    fn empty_system_prompts_are_omitted() {
        let options = PromptOptions::new("ping")
            .with_system_prompts(Some(String::new()), Some("extra".to_string()));
        let args = build_args(&options);
        assert!(!args.iter().any(|arg| arg == "--system-prompt"));
        assert_eq!(args.last().map(String::as_str), Some("extra"));
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_before_any_event() {
        let bus = EventBus::new(4);
        let mut stream = bus.subscribe().expect("stream");
        let invoker = ClaudeInvoker::new(&RunnerConfig::default(), ".", bus.emitter());

        let err = invoker.run(&PromptOptions::new("  ")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::InvalidInput(_))
        ));
        bus.close();
        assert!(stream.next().await.is_none());
    }
}
