//! CLI surface of the exploration driver (C10.5): lowers a demo plan, then
//! drives the blend-space explorer against a dry-run backend, printing the
//! summary the way `explorer.cpp` (the flag surface this binary mirrors)
//! reports to stderr.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lole_explorer::backend::NullBackend;
use lole_explorer::config::Config;
use lole_explorer::error::{EngineError, ExplorerError};
use lole_explorer::execution::QueryTimeout;
use lole_explorer::explorer::{self, ExploreMode};
use lole_explorer::logging::{self, LogTarget};
use lole_explorer::{blend, demos, translator};

#[derive(Parser, Debug)]
#[command(name = "explorer", version, about = "Blend-space explorer for a lowered query pipeline")]
struct Cli {
    /// Demo dataset directory. Unused beyond logging: this crate ships fixed
    /// demo plans rather than loading a real columnar database.
    #[arg(long, default_value = ".")]
    data: String,

    /// Which demo plan to explore.
    #[arg(short = 'q', long, default_value = "q6")]
    query: String,

    #[arg(short = 'r', long, default_value_t = 3)]
    hot_runs: u32,

    #[arg(long, default_value_t = 1024)]
    vector_size: u32,

    #[arg(long)]
    num_threads: Option<u32>,

    #[arg(long, default_value_t = 16 * 1024)]
    morsel_size: u32,

    #[arg(short = 's', long, default_value_t = 1)]
    scale_factor: u32,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = "g++")]
    compiler: String,

    #[arg(long = "unsafe")]
    unsafe_mode: bool,

    #[arg(long = "no-check")]
    no_check: bool,

    /// Explore only the base flavor.
    #[arg(long)]
    base: bool,

    /// Explore base flavors per expensive pipeline.
    #[arg(long)]
    pipeline: bool,

    /// Full exploration at the given level (0..=4).
    #[arg(long)]
    full: Option<u8>,

    #[arg(long = "list-base")]
    list_base: bool,

    #[arg(long = "discover-points")]
    discover_points: bool,

    /// Skip compiling/running; just report what would be explored.
    #[arg(long)]
    dry: bool,

    #[arg(long, default_value_t = 360)]
    timeout: u64,

    /// Tag for later retrieval; carried through to logs, not acted on.
    #[arg(long, default_value = "explore")]
    mode: String,

    /// Cap the number of points tried under `--full`. Requires `--full`.
    #[arg(long)]
    sample: Option<usize>,

    #[arg(long)]
    explore_threads: Option<usize>,

    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// Layered config file (defaults to `config.toml`/`config.local.toml`).
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    log_level: Option<String>,
}

/// Resolves `--base`/`--pipeline`/`--full` (plus `--list-base`/
/// `--discover-points`) into a single `ExploreMode`, enforcing the mutual
/// exclusion and the `--sample` precondition spec §6 requires.
fn resolve_mode(cli: &Cli, config: &Config) -> Result<ExploreMode, ExplorerError> {
    if cli.list_base {
        return Ok(ExploreMode::ListBase);
    }
    if cli.discover_points {
        return Ok(ExploreMode::DiscoverPoints);
    }

    let selected = [cli.base, cli.pipeline, cli.full.is_some()].iter().filter(|s| **s).count();
    if selected > 1 {
        return Err(ExplorerError::ConflictingModes);
    }
    if cli.sample.is_some() && cli.full.is_none() {
        return Err(ExplorerError::SampleWithoutFull);
    }

    if cli.base {
        Ok(ExploreMode::OnlyBase)
    } else if cli.pipeline {
        Ok(ExploreMode::PerPipelineBase)
    } else {
        let level = cli.full.unwrap_or(config.blend.default_level);
        let sample = cli.sample.or(config.blend.sample);
        Ok(ExploreMode::ExploreAll { level, sample })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path).map_err(EngineError::from)?,
        None => Config::load().map_err(EngineError::from)?,
    };

    let log_level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let target = match &config.logging.directory {
        Some(dir) => LogTarget::File {
            directory: dir.clone(),
            file_name_prefix: "explorer".to_string(),
        },
        None => LogTarget::Stderr,
    };
    let _guard = logging::init(target, &log_level, config.logging.format == "json");

    if cli.list_base {
        for flavor in blend::enumerate(blend::GenBlendFlags::ONLY_BASE) {
            println!("{flavor}");
        }
        return Ok(());
    }

    tracing::info!(query = %cli.query, data = %cli.data, "starting exploration");

    let plan = demos::by_name(&cli.query).ok_or_else(|| anyhow::anyhow!("unknown query '{}', expected q1 or q6", cli.query))?;
    let root = plan.root.clone().expect("demo fixtures always carry a root operator");
    let program = translator::translate(&root).map_err(EngineError::from)?;

    let mode = resolve_mode(&cli, &config).map_err(EngineError::from)?;

    let lock_path = cli.lock_file.clone().unwrap_or_else(|| config.explorer.lock_path.clone());
    let _lock = if cli.dry {
        None
    } else {
        Some(explorer::FdLockGuard::acquire(&lock_path).map_err(EngineError::from)?)
    };

    let thread_count = cli
        .explore_threads
        .or(cli.num_threads.map(|n| n as usize))
        .unwrap_or(config.explorer.thread_count);
    let thread_count = if thread_count == 0 { num_cpus::get() } else { thread_count };

    let timeout_secs = if cli.timeout == 0 { config.explorer.timeout_secs } else { Some(cli.timeout) };
    let timeout = QueryTimeout::new(timeout_secs.map(Duration::from_secs));

    let seed = cli.seed.or(config.blend.seed);
    let no_cache = config.blend.no_cache;

    let backend = NullBackend;
    let summary = if cli.dry {
        explorer::Summary {
            report: explorer::ExploreReport::default(),
            results: Vec::new(),
        }
    } else {
        explorer::explore(&program, &plan, mode, &backend, thread_count, &timeout, seed, no_cache).map_err(EngineError::from)?
    };

    match cli.sample {
        Some(n) => eprintln!("Sampling:         {n}"),
        None => eprintln!("Sampling:         none"),
    }
    eprintln!("Space Tested:     {}", summary.report.attempted);
    eprintln!("Space Ran:        {}", summary.report.succeeded);
    eprintln!("Space Compiled:   {}", summary.report.attempted);
    eprintln!("Space Invalid:    {}", summary.report.failed);

    tracing::info!(
        attempted = summary.report.attempted,
        succeeded = summary.report.succeeded,
        failed = summary.report.failed,
        "exploration finished"
    );

    if summary.report.failed > 0 && summary.report.attempted == summary.report.failed {
        std::process::exit(1);
    }
    Ok(())
}
