//! Presentation adapter: drains the event stream on its own task.

use std::io::{IsTerminal, Write};

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use serde_json::{Map, Value};

use crate::core::duration::format_duration;
use crate::core::prompt::truncate;
use crate::events::{Event, EventPayload, EventStream};

/// Tool-result lines shown when not verbose.
pub const RESULT_PREVIEW_LINES: usize = 5;

const SUMMARY_CHARS: usize = 120;
const RULE: &str = "━━━";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Human,
    /// One serialized event per line.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub format: Format,
    pub verbose: bool,
    pub color: bool,
}

/// Color only for a terminal, and never when `NO_COLOR` is set.
pub fn color_enabled() -> bool {
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    !no_color && std::io::stdout().is_terminal()
}

#[derive(Debug)]
pub struct Renderer<W> {
    out: W,
    options: RenderOptions,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, options: RenderOptions) -> Self {
        Self { out, options }
    }

    /// Render every event until the bus is closed and drained.
    pub async fn drain(mut self, mut stream: EventStream) -> Result<W> {
        while let Some(event) = stream.next().await {
            self.render(&event)?;
        }
        self.out.flush().context("flush output")?;
        Ok(self.out)
    }

    pub fn render(&mut self, event: &Event) -> Result<()> {
        match self.options.format {
            Format::Json => {
                let line = serde_json::to_string(event).context("serialize event")?;
                writeln!(self.out, "{line}").context("write event")?;
            }
            Format::Human => {
                let text = self.human(&event.payload);
                if !text.is_empty() {
                    writeln!(self.out, "{text}").context("write event")?;
                }
            }
        }
        Ok(())
    }

    fn paint(&self, text: &str, style: fn(&str) -> ColoredString) -> String {
        if self.options.color {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn human(&self, payload: &EventPayload) -> String {
        match payload {
            EventPayload::RunStarted {
                prompt,
                working_dir,
                base_url,
                files,
            } => {
                let mut lines = vec![self.paint(&format!("▶ claude in {working_dir}"), dim)];
                if let Some(url) = base_url {
                    lines.push(self.paint(&format!("  base url: {url}"), dim));
                }
                if !files.is_empty() {
                    lines.push(self.paint(&format!("  files: {}", files.join(", ")), dim));
                }
                if self.options.verbose {
                    lines.push(self.paint(&format!("  prompt: {prompt}"), dim));
                }
                lines.join("\n")
            }
            EventPayload::AssistantText { text } => text.clone(),
            EventPayload::ToolUse { name, input } => {
                let head = self.paint(&format!("⏺ {name}"), cyan_bold);
                format!("{head}({})", tool_summary(name, input))
            }
            EventPayload::ToolResult { content } => self.tool_result(content),
            EventPayload::ExecutionResult { duration } => self.paint(
                &format!("  finished in {}", format_duration(*duration)),
                dim,
            ),
            EventPayload::LoopStarted { total } => self.paint(
                &format!("Running {total} iteration{}", plural(*total)),
                bold,
            ),
            EventPayload::IterationStarted { current, total } => {
                self.rule(&format!("Iteration {current}/{total}"))
            }
            EventPayload::IterationCompleted {
                current,
                total,
                duration,
            } => self.paint(
                &format!(
                    "✓ Iteration {current}/{total} completed in {}",
                    format_duration(*duration)
                ),
                green,
            ),
            EventPayload::IterationFailed {
                current,
                total,
                error,
            } => self.paint(&format!("✗ Iteration {current}/{total} failed: {error}"), red),
            EventPayload::LoopCompleted {
                total,
                successful,
                failed,
                ..
            } => {
                let style: fn(&str) -> ColoredString = if *failed == 0 {
                    green_bold
                } else {
                    yellow_bold
                };
                self.paint(
                    &format!("Loop finished: {successful} succeeded, {failed} failed of {total}"),
                    style,
                )
            }
            EventPayload::LoopInterrupted { completed, total } => self.paint(
                &format!("Interrupted after {completed} of {total} iterations"),
                yellow,
            ),
            EventPayload::SleepStarted { duration } => {
                self.paint(&format!("Sleeping for {}", format_duration(*duration)), dim)
            }
            EventPayload::EvolveStarted { total } => self.paint(
                &format!("Evolving over {total} round{}", plural(*total)),
                bold,
            ),
            EventPayload::RoundStarted { round, total } => {
                self.rule(&format!("Round {round}/{total}"))
            }
            EventPayload::ImprovementStarted { branch } => {
                format!("Improving on {}", self.paint(branch, bold))
            }
            EventPayload::ComparisonStarted { winner, challenger } => format!(
                "Comparing {} vs {}",
                self.paint(winner, bold),
                self.paint(challenger, bold)
            ),
            EventPayload::ComparisonRetry { attempt, max } => self.paint(
                &format!("Judge answer unclear, retry {attempt}/{max}"),
                yellow,
            ),
            EventPayload::WinnerSelected { winner, loser } => self.paint(
                &format!("Winner: {winner} (eliminated {loser})"),
                green,
            ),
            EventPayload::EvolveCompleted {
                final_branch,
                total_rounds,
                ..
            } => self.paint(
                &format!(
                    "Final branch: {final_branch} after {total_rounds} round{}",
                    plural(*total_rounds)
                ),
                green_bold,
            ),
            EventPayload::EvolveInterrupted {
                completed,
                total,
                winner,
            } => {
                let winner = if winner.is_empty() {
                    "none yet"
                } else {
                    winner.as_str()
                };
                self.paint(
                    &format!(
                        "Interrupted after {completed} of {total} rounds; current winner: {winner}"
                    ),
                    yellow,
                )
            }
            EventPayload::BranchCreated { name, base } => {
                let line = if base.is_empty() {
                    format!("  + branch {name}")
                } else {
                    format!("  + branch {name} from {base}")
                };
                self.paint(&line, dim)
            }
            EventPayload::BranchCheckedOut { name } => {
                self.paint(&format!("  → checked out {name}"), dim)
            }
            EventPayload::BranchDeleted { name } => {
                self.paint(&format!("  - branch {name}"), dim)
            }
            EventPayload::CommitsSquashed { branch } => {
                self.paint(&format!("  squashed commits since {branch}"), dim)
            }
        }
    }

    fn rule(&self, title: &str) -> String {
        format!("\n{}", self.paint(&format!("{RULE} {title} {RULE}"), bold))
    }

    fn tool_result(&self, content: &str) -> String {
        let lines: Vec<&str> = content.lines().collect();
        let shown = if self.options.verbose {
            lines.len()
        } else {
            lines.len().min(RESULT_PREVIEW_LINES)
        };
        let mut out = Vec::with_capacity(shown + 1);
        for (index, line) in lines.iter().take(shown).enumerate() {
            let prefix = if index == 0 { "  ⎿ " } else { "    " };
            out.push(self.paint(&format!("{prefix}{line}"), dim));
        }
        let hidden = lines.len() - shown;
        if hidden > 0 {
            out.push(self.paint(&format!("    … +{hidden} lines"), dim));
        }
        out.join("\n")
    }
}

/// One-line description of a tool call.
///
/// Known tools show their most telling argument; anything else shows the
/// input as compact JSON.
pub fn tool_summary(name: &str, input: &Map<String, Value>) -> String {
    let keys: &[&str] = match name {
        "Bash" => &["command"],
        "Read" | "Write" | "Edit" | "MultiEdit" => &["file_path"],
        "NotebookEdit" | "NotebookRead" => &["notebook_path"],
        "Grep" | "Glob" => &["pattern"],
        "LS" => &["path"],
        "WebFetch" => &["url"],
        "WebSearch" => &["query"],
        _ => &[],
    };
    let picked = keys
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str));
    let summary = match picked {
        Some(value) => value.lines().next().unwrap_or_default().to_string(),
        None => Value::Object(input.clone()).to_string(),
    };
    truncate(&summary, SUMMARY_CHARS)
}

fn plural(count: u32) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn dim(text: &str) -> ColoredString {
    text.dimmed()
}

fn bold(text: &str) -> ColoredString {
    text.bold()
}

fn green(text: &str) -> ColoredString {
    text.green()
}

fn green_bold(text: &str) -> ColoredString {
    text.green().bold()
}

fn red(text: &str) -> ColoredString {
    text.red()
}

fn yellow(text: &str) -> ColoredString {
    text.yellow()
}

fn yellow_bold(text: &str) -> ColoredString {
    text.yellow().bold()
}

fn cyan_bold(text: &str) -> ColoredString {
    text.cyan().bold()
}
