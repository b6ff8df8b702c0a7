//! Runner configuration stored in `.claude-runner.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".claude-runner.toml";

/// Runner configuration (TOML).
///
/// Only process plumbing lives here; behavior flags come from the command
/// line. Missing fields default to the values the assistant CLI expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Executable spawned for every assistant invocation.
    pub claude_command: String,

    /// Events buffered between the controllers and the renderer.
    pub event_buffer: usize,

    /// Initial capacity of the stdout line buffer.
    pub initial_line_bytes: usize,

    /// Longest stdout line accepted from the assistant.
    pub max_line_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            claude_command: "claude".to_string(),
            event_buffer: crate::events::DEFAULT_CAPACITY,
            initial_line_bytes: 1024 * 1024,
            max_line_bytes: 10 * 1024 * 1024,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.claude_command.trim().is_empty() {
            return Err(anyhow!("claude_command must be non-empty"));
        }
        if self.event_buffer == 0 {
            return Err(anyhow!("event_buffer must be > 0"));
        }
        if self.initial_line_bytes == 0 {
            return Err(anyhow!("initial_line_bytes must be > 0"));
        }
        if self.max_line_bytes < self.initial_line_bytes {
            return Err(anyhow!("max_line_bytes must be >= initial_line_bytes"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
