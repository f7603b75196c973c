//! storefront-e2e - run the storefront acceptance scenarios
//!
//! Exit codes: 0 when every scenario passed, 1 when any scenario failed,
//! 2 when the harness itself could not run.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use storefront_e2e::catalog;
use storefront_e2e::config::{HarnessConfig, Overrides, ReporterKind, RunMode};
use storefront_e2e::playwright::{Browser, PlaywrightConfig, PlaywrightLauncher};
use storefront_e2e::report;
use storefront_e2e::scenario::{self, ScenarioFilter};
use storefront_e2e::server::Environment;
use storefront_e2e::{IdentitySource, RunnerConfig, Scenario, TestRunner};

#[derive(Parser)]
#[command(name = "storefront-e2e")]
#[command(author, version, about = "Browser acceptance scenarios for the storefront", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "storefront-e2e.toml", global = true)]
    config: PathBuf,

    /// Run mode; defaults to ci when the CI variable is set
    #[arg(long, value_enum, global = true)]
    mode: Option<RunMode>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios
    Run(RunArgs),

    /// List scenarios that would run
    List(SelectArgs),

    /// Wait for the configured servers' ready URLs without starting them
    CheckEnv {
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
}

#[derive(Args)]
struct SelectArgs {
    /// Only scenarios in this suite
    #[arg(long)]
    suite: Option<String>,

    /// Only scenarios with this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Only scenarios whose name contains this text
    #[arg(short, long)]
    grep: Option<String>,

    /// Directory of extra YAML scenarios
    #[arg(long)]
    scenarios_dir: Option<PathBuf>,

    /// Skip the built-in storefront catalog
    #[arg(long)]
    no_builtin: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Maximum scenarios in flight
    #[arg(short, long)]
    workers: Option<usize>,

    /// Retries per failed scenario
    #[arg(short, long)]
    retries: Option<u32>,

    #[arg(long, value_enum)]
    reporter: Option<ReporterKind>,

    /// Front end base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Output directory for results and artifacts
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long)]
    browser: Option<Browser>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(cli)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(cli: Cli) -> anyhow::Result<i32> {
    let mode = cli.mode.unwrap_or_else(RunMode::detect);
    let mut config = HarnessConfig::load(&cli.config)?;

    match cli.command {
        Commands::List(select) => {
            config.apply(Overrides {
                scenarios_dir: select.scenarios_dir.clone(),
                ..Default::default()
            });
            config.validate()?;
            let scenarios = select_scenarios(&config, &select, mode)?;
            for s in &scenarios {
                let marker = if s.skip { " (skipped)" } else { "" };
                println!("[{}] {}{}", s.suite, s.name, marker);
            }
            println!("{} scenario(s)", scenarios.len());
            Ok(0)
        }
        Commands::CheckEnv { timeout_secs } => {
            Environment::check(&config.web_servers, Duration::from_secs(timeout_secs)).await?;
            Ok(0)
        }
        Commands::Run(args) => {
            config.apply(Overrides {
                base_url: args.base_url,
                workers: args.workers,
                retries: args.retries,
                reporter: args.reporter,
                output_dir: args.output,
                scenarios_dir: args.select.scenarios_dir.clone(),
                browser: args.browser,
                headed: args.headed,
            });
            config.validate()?;
            run(config, &args.select, mode).await
        }
    }
}

fn select_scenarios(
    config: &HarnessConfig,
    select: &SelectArgs,
    mode: RunMode,
) -> anyhow::Result<Vec<Scenario>> {
    let mut scenarios = if select.no_builtin {
        Vec::new()
    } else {
        catalog::storefront(&config.cards)
    };
    if let Some(dir) = &config.scenarios_dir {
        scenarios.extend(Scenario::load_all(dir)?);
    }
    scenario::check_unique_names(&scenarios)?;

    let filter = ScenarioFilter {
        suite: select.suite.clone(),
        tag: select.tag.clone(),
        grep: select.grep.clone(),
    };
    let mut scenarios = filter.apply(scenarios);
    scenario::apply_markers(&mut scenarios, mode == RunMode::Ci)?;
    Ok(scenarios)
}

async fn run(config: HarnessConfig, select: &SelectArgs, mode: RunMode) -> anyhow::Result<i32> {
    let scenarios = select_scenarios(&config, select, mode)?;
    if scenarios.is_empty() {
        anyhow::bail!("no scenarios selected");
    }

    info!("Run mode: {:?}", mode);
    let _environment = match mode {
        RunMode::Ci => Environment::bootstrap(&config.web_servers).await?,
        RunMode::Local => Environment::external(),
    };

    let launcher = PlaywrightLauncher::new(PlaywrightConfig {
        browser: config.browser.browser,
        headless: config.browser.headless,
        viewport_width: config.browser.viewport_width,
        viewport_height: config.browser.viewport_height,
        project_dir: config.browser.project_dir.clone(),
    })?;

    let runner = TestRunner::new(
        RunnerConfig {
            base_url: config.base_url.clone(),
            workers: config.workers(mode),
            retries: config.retries(mode),
            timeouts: config.timeouts(),
            artifacts: config.artifacts,
            output_dir: config.output_dir.clone(),
        },
        Arc::new(launcher),
        Arc::new(IdentitySource::new(&config.identity.email_domain)),
        catalog::flows(&config.cards),
    );

    let results = runner.run_scenarios(&scenarios).await?;
    runner.write_results(&results)?;
    println!("{}", report::render(config.reporter(mode), &results));

    Ok(results.exit_code())
}
