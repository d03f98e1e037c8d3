use tarcrash_core::config::HarnessConfig;
use tarcrash_core::context::HarnessContext;
use tarcrash_core::corpus::DiskCorpus;
use tarcrash_core::driver::FuzzDriver;
use tarcrash_core::executor::ExtractorExecutor;
use tarcrash_core::mutator::{MutationCaseGenerator, TOTAL_CASES};
use tarcrash_core::oracle::{CrashOracle, MatchMode};

use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "tarcrash_core=info,tarcrash_cli=info";
const DEFAULT_CONFIG_FILE: &str = "tarcrash.toml";

/// Feeds malformed tar archives to an extractor and keeps the ones that crash it.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Path to the extractor executable under test.
    #[clap(value_parser)]
    extractor: Option<PathBuf>,
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(short, long)]
    timeout_ms: Option<u64>,
    /// Directory receiving success_<N>.tar artifacts.
    #[clap(short, long)]
    output_dir: Option<PathBuf>,
    /// Archive path rewritten on every trial.
    #[clap(short, long)]
    working_path: Option<PathBuf>,
    /// Count a crash when the banner appears anywhere in the first line.
    #[clap(long)]
    substring_match: bool,
    /// Print the mutation cases in order and exit.
    #[clap(long)]
    list_cases: bool,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(config_file: Option<PathBuf>) -> Result<HarnessConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            HarnessConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                HarnessConfig::load_from_file(&default_config_path)
            } else {
                Ok(HarnessConfig::default())
            }
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_config(cli.config_file)?;

    if cli.list_cases {
        for (i, case) in MutationCaseGenerator::new(config.generator_settings()).enumerate() {
            println!("{:>3}  {}", i + 1, case.kind);
        }
        return Ok(());
    }

    if let Some(extractor) = cli.extractor {
        config.extractor.path = Some(extractor);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.extractor.timeout_ms = timeout_ms;
    }
    if let Some(output_dir) = cli.output_dir {
        config.archive.output_dir = output_dir;
    }
    if let Some(working_path) = cli.working_path {
        config.archive.working_path = working_path;
    }
    if cli.substring_match {
        config.oracle.match_mode = MatchMode::Substring;
    }

    config.validate()?;
    let extractor = config.extractor_path()?.to_path_buf();
    println!("Effective configuration: {config:#?}");

    let oracle = CrashOracle::new(
        ExtractorExecutor::new(config.executor_settings()),
        config.crash_banner(),
    );
    let sink = DiskCorpus::new(config.archive.output_dir.clone())?;
    let mut driver = FuzzDriver::new(
        HarnessContext::new(extractor),
        MutationCaseGenerator::new(config.generator_settings()),
        oracle,
        sink,
        config.archive.working_path.clone(),
    );

    println!("Begin fuzzing: {TOTAL_CASES} cases against {:?}", driver.context().extractor());
    let start_time = Instant::now();
    let stats = driver.run().clone();
    println!("Fuzz run finished in {:.2?}.", start_time.elapsed());
    println!(
        "Cases: {}, Trials: {}, Crashes: {}, Clean: {}, Launch failures: {}, I/O errors: {}, Triage errors: {}",
        stats.cases,
        driver.context().trials(),
        stats.crashes,
        stats.clean,
        stats.launch_failures,
        stats.io_errors,
        stats.triage_errors
    );
    for report in driver.crash_reports() {
        println!(
            "  {:?} (trial {}, {} bytes, md5 {})",
            report.artifact, report.trial, report.len, report.input_hash
        );
    }

    Ok(())
}
