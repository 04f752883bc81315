use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use loopsmith::config::Config;
use loopsmith::core::Backlog;
use loopsmith::ledger::{ContextOptions, InMemorySearch, IterationLedger, IterationRecord};
use loopsmith::orchestration::{detect_cli_tools, BatchScheduler, LoopRunner, ToolKind};
use loopsmith::{llog, Result};

/// loopsmith - dependency-aware agent loop over a story backlog
#[derive(Parser, Debug)]
#[command(name = "loopsmith")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    LOOPSMITH_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.loopsmith/loopsmith.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: .loopsmith/config.toml, then ~/.loopsmith/loopsmith.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Project directory: config, history and the agent's working directory
    /// (default: current directory)
    #[arg(short = 'C', long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show the batches a backlog would run in
    Plan {
        /// Backlog JSON file ({"userStories": [...]}), relative to the root
        #[arg(short, long, default_value = "prd.json")]
        backlog: PathBuf,

        #[arg(short = 'n', long)]
        max_concurrency: Option<usize>,
    },

    /// Execute every pending work item with an agent tool
    Run {
        #[arg(short, long, default_value = "prd.json")]
        backlog: PathBuf,

        /// claude, codex or opencode
        #[arg(short, long)]
        tool: Option<String>,

        #[arg(short = 'n', long)]
        max_concurrency: Option<usize>,

        /// JSON file of memory snippets used for the compressed context
        #[arg(long)]
        memory: Option<PathBuf>,
    },

    /// List recorded iterations, newest first
    History {
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only iterations of this work item
        #[arg(long)]
        task: Option<String>,
    },

    /// Aggregate statistics over the history
    Stats,

    /// Print the compressed context the next prompt would receive
    Context {
        #[arg(long)]
        recent: Option<usize>,

        #[arg(long)]
        threshold: Option<usize>,

        #[arg(long)]
        memory: Option<PathBuf>,

        /// Memory query (default: newest iteration's task)
        #[arg(long)]
        query: Option<String>,
    },

    /// Detect installed agent CLIs
    Tools,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    loopsmith::log::init(loopsmith::log::LogSettings::from_env(cli.debug));

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let config = load_config(cli.config.as_deref(), &root)?;
    llog!("loopsmith starting: command={:?}", cli.command);

    match cli.command.clone() {
        Command::Plan {
            backlog,
            max_concurrency,
        } => run_plan(&config, &root.join(backlog), max_concurrency, cli.json),
        Command::Run {
            backlog,
            tool,
            max_concurrency,
            memory,
        } => run_loop(
            config,
            &root,
            RunArgs {
                backlog: root.join(backlog),
                tool,
                max_concurrency,
                memory,
            },
            cli.json,
        ),
        Command::History { limit, task } => {
            run_history(&config, &root, limit, task.as_deref(), cli.json)
        }
        Command::Stats => run_stats(&config, &root, cli.json),
        Command::Context {
            recent,
            threshold,
            memory,
            query,
        } => run_context(&config, &root, recent, threshold, memory, query),
        Command::Tools => run_tools(&config, cli.json),
    }
}

fn load_config(path: Option<&Path>, root: &Path) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(root),
    }
}

fn run_plan(
    config: &Config,
    backlog: &Path,
    max_concurrency: Option<usize>,
    json: bool,
) -> Result<()> {
    let backlog = Backlog::load(backlog)?;
    let mut scheduler = BatchScheduler::from_config(config)?;
    if let Some(max) = max_concurrency {
        scheduler = BatchScheduler::new(scheduler.analyzer().clone(), max);
    }
    let batches = scheduler.plan(&backlog.pending());

    if json {
        println!("{}", serde_json::to_string_pretty(&batches)?);
        return Ok(());
    }
    if batches.is_empty() {
        println!("Nothing to do: every work item passes.");
        return Ok(());
    }
    for (i, batch) in batches.iter().enumerate() {
        println!("Batch {} [{}]", i + 1, batch.kind);
        for item in &batch.items {
            println!("  {}", item);
        }
    }
    Ok(())
}

struct RunArgs {
    backlog: PathBuf,
    tool: Option<String>,
    max_concurrency: Option<usize>,
    memory: Option<PathBuf>,
}

fn run_loop(config: Config, root: &Path, args: RunArgs, json: bool) -> Result<()> {
    let backlog = Backlog::load(&args.backlog)?;
    let mut runner = LoopRunner::new(config, root)?;
    if let Some(tool) = args.tool {
        runner = runner.with_tool(tool.parse::<ToolKind>()?);
    }
    if let Some(max) = args.max_concurrency {
        runner = runner.with_max_concurrency(max);
    }
    if let Some(path) = args.memory {
        runner = runner.with_memory(Arc::new(InMemorySearch::load(&path)?));
    }

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let stop = runner.stop_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Stopping: killing running agents...");
                stop.stop();
            }
        });
        runner.run(&backlog).await
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    for record in &summary.records {
        print_record(record);
    }
    println!();
    println!(
        "{} batches of {} run: {} succeeded, {} failed{}",
        summary.batches_run,
        summary.batches_planned,
        summary.succeeded(),
        summary.failed(),
        if summary.stopped { " (stopped)" } else { "" }
    );
    Ok(())
}

fn print_record(record: &IterationRecord) {
    println!(
        "#{:<4} {:<8} {:<10} {:>8.1}s  {}{}",
        record.iteration,
        record.status,
        record.task_id,
        record.duration_ms as f64 / 1000.0,
        record.task_title,
        record
            .git_commit
            .as_deref()
            .map(|c| format!(" ({})", c))
            .unwrap_or_default()
    );
    if let Some(error) = &record.error {
        println!("      {}", error);
    }
}

fn run_history(
    config: &Config,
    root: &Path,
    limit: Option<usize>,
    task: Option<&str>,
    json: bool,
) -> Result<()> {
    let ledger = IterationLedger::from_config(config, root);
    let records = ledger.history(limit, task)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No iterations recorded in {}", ledger.dir().display());
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn run_stats(config: &Config, root: &Path, json: bool) -> Result<()> {
    let stats = IterationLedger::from_config(config, root).statistics()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("Iterations:   {}", stats.total);
    println!(
        "Succeeded:    {} ({:.1}%)",
        stats.success_count, stats.success_rate
    );
    println!("Failed:       {}", stats.failed_count);
    println!("Avg duration: {:.1}s", stats.avg_duration_ms as f64 / 1000.0);
    let q = &stats.quality_breakdown;
    println!(
        "Quality:      typecheck {}  lint {}  tests {}  coverage {}",
        q.type_check, q.lint, q.tests, q.coverage_met
    );
    Ok(())
}

fn run_context(
    config: &Config,
    root: &Path,
    recent: Option<usize>,
    threshold: Option<usize>,
    memory: Option<PathBuf>,
    query: Option<String>,
) -> Result<()> {
    let mut ledger = IterationLedger::from_config(config, root);
    if let Some(path) = memory {
        ledger = ledger.with_memory(Arc::new(InMemorySearch::load(&path)?));
    }
    let mut options = ContextOptions::from(&config.context);
    if let Some(recent) = recent {
        options.recent_count = recent.max(1);
    }
    if let Some(threshold) = threshold {
        options.threshold = threshold;
    }
    options.query = query;

    let rt = tokio::runtime::Runtime::new()?;
    let context = rt.block_on(ledger.build_compressed_context(&options))?;
    if context.is_empty() {
        println!("No iterations recorded in {}", ledger.dir().display());
    } else {
        print!("{}", context);
    }
    Ok(())
}

fn run_tools(config: &Config, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let tools = rt.block_on(detect_cli_tools(config));
    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }
    for info in &tools {
        let status = if info.available { "available" } else { "missing" };
        println!(
            "{:<9} {:<10} {}",
            info.tool.name(),
            status,
            info.version.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
