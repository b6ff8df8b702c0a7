//! Drive the `claude` CLI repeatedly: a plain loop, or a branch tournament.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use claude_runner::core::branch::RandomBranchNames;
use claude_runner::core::duration::parse_duration;
use claude_runner::error::is_interrupted;
use claude_runner::events::{Emitter, EventBus};
use claude_runner::evolve::{
    DEFAULT_COMPARE_ERROR_RETRIES, DEFAULT_COMPARE_PROMPT, DEFAULT_IMPROVE_PROMPT,
    DEFAULT_ITERATIONS, EvolveConfig, SystemPrompts, run_evolve,
};
use claude_runner::exit_codes;
use claude_runner::io::claude::{ClaudeInvoker, PromptOptions};
use claude_runner::io::config::{DEFAULT_CONFIG_FILE, RunnerConfig, load_config};
use claude_runner::io::git::Git;
use claude_runner::io::signals::{Interrupt, SignalObserver};
use claude_runner::logging;
use claude_runner::looping::{LoopConfig, run_loop};
use claude_runner::render::{Format, RenderOptions, Renderer, color_enabled};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(
    name = "claude-runner",
    version,
    about = "Run claude in a loop or evolve an implementation through a branch tournament"
)]
struct Cli {
    /// Runner config file (TOML). Missing file means defaults.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print events as JSON lines instead of formatted text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the same prompt a fixed number of times.
    Loop(LoopArgs),
    /// Implement a plan, then repeatedly improve it and keep the better branch.
    Evolve(EvolveArgs),
}

#[derive(Args)]
struct SharedArgs {
    /// Pause between iterations, e.g. `30s`, `1.5m`, `2h30m`.
    #[arg(short, long, default_value = "0", value_parser = parse_duration)]
    sleep: Duration,

    /// Show full tool results and prompts.
    #[arg(short, long)]
    verbose: bool,

    /// Replace the system prompt.
    #[arg(long)]
    system_prompt: Option<String>,

    /// Append to the system prompt.
    #[arg(long)]
    append_system_prompt: Option<String>,
}

#[derive(Args)]
struct LoopArgs {
    prompt: String,

    #[arg(short = 'n', long, default_value_t = 1)]
    iterations: u32,

    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Args)]
struct EvolveArgs {
    plan: String,

    /// Improvement rounds.
    #[arg(short = 'n', long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,

    #[command(flatten)]
    shared: SharedArgs,

    /// Prompt for each improvement round.
    #[arg(short, long, default_value = DEFAULT_IMPROVE_PROMPT)]
    improve: String,

    #[arg(long)]
    improve_system_prompt: Option<String>,

    #[arg(long)]
    append_improve_system_prompt: Option<String>,

    /// Prompt asking the judge which implementation is worse.
    #[arg(short, long, default_value = DEFAULT_COMPARE_PROMPT)]
    compare: String,

    #[arg(long)]
    compare_system_prompt: Option<String>,

    #[arg(long)]
    append_compare_system_prompt: Option<String>,

    /// Extra judge attempts when the answer names neither or both branches.
    #[arg(long, default_value_t = DEFAULT_COMPARE_ERROR_RETRIES)]
    compare_error_retries: u32,

    /// Keep losing branches instead of deleting them.
    #[arg(long)]
    debug_keep_branches: bool,
}

impl Command {
    fn verbose(&self) -> bool {
        match self {
            Command::Loop(args) => args.shared.verbose,
            Command::Evolve(args) => args.shared.verbose,
        }
    }
}

impl LoopArgs {
    fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            iterations: self.iterations,
            sleep: self.shared.sleep,
            options: PromptOptions::new(&self.prompt).with_system_prompts(
                self.shared.system_prompt.clone(),
                self.shared.append_system_prompt.clone(),
            ),
        }
    }
}

impl EvolveArgs {
    fn evolve_config(&self) -> EvolveConfig {
        EvolveConfig {
            plan: self.plan.clone(),
            improve_prompt: self.improve.clone(),
            compare_prompt: self.compare.clone(),
            iterations: self.iterations,
            sleep: self.shared.sleep,
            compare_error_retries: self.compare_error_retries,
            debug_keep_branches: self.debug_keep_branches,
            plan_system: SystemPrompts {
                system_prompt: self.shared.system_prompt.clone(),
                append_system_prompt: self.shared.append_system_prompt.clone(),
            },
            improve_system: SystemPrompts {
                system_prompt: self.improve_system_prompt.clone(),
                append_system_prompt: self.append_improve_system_prompt.clone(),
            },
            compare_system: SystemPrompts {
                system_prompt: self.compare_system_prompt.clone(),
                append_system_prompt: self.append_compare_system_prompt.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    let result = run(cli).await;
    if let Err(err) = &result {
        if !is_interrupted(err) {
            eprintln!("error: {err:#}");
        }
    }
    std::process::exit(exit_codes::for_result(&result));
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = load_config(&config_path)?;
    let workdir = std::env::current_dir().context("resolve working directory")?;

    let bus = EventBus::new(config.event_buffer);
    let stream = bus
        .subscribe()
        .ok_or_else(|| anyhow!("event stream already taken"))?;
    let options = RenderOptions {
        format: if cli.json { Format::Json } else { Format::Human },
        verbose: cli.command.verbose(),
        color: !cli.json && color_enabled(),
    };
    // Held until the renderer is done so a late Ctrl-C still reaches us.
    let signals = SignalObserver::install()?;
    let renderer = tokio::spawn(Renderer::new(std::io::stdout(), options).drain(stream));

    let result = execute(
        &cli.command,
        &config,
        &workdir,
        bus.emitter(),
        &mut signals.interrupt(),
    )
    .await;

    bus.close();
    match renderer.await {
        Ok(Ok(_)) => debug!("renderer finished"),
        Ok(Err(err)) => warn!(error = %format!("{err:#}"), "renderer stopped early"),
        Err(err) => warn!(error = %err, "renderer task failed"),
    }
    result
}

async fn execute(
    command: &Command,
    config: &RunnerConfig,
    workdir: &Path,
    emitter: Emitter,
    interrupt: &mut Interrupt,
) -> Result<()> {
    let invoker = ClaudeInvoker::new(config, workdir, emitter.clone());

    match command {
        Command::Loop(args) => {
            let summary = run_loop(&args.loop_config(), &invoker, &emitter, interrupt).await?;
            debug!(?summary, "loop finished");
        }
        Command::Evolve(args) => {
            let git = Git::new(workdir, emitter.clone());
            let outcome = run_evolve(
                &args.evolve_config(),
                &invoker,
                &git,
                &mut RandomBranchNames,
                &emitter,
                interrupt,
            )
            .await?;
            debug!(?outcome, "evolve finished");
        }
    }
    Ok(())
}
