//! CLI entry point for `smsdedup`.

use std::path::PathBuf;
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use smsdedup::config::{self, Config};
use smsdedup::pipeline::{self, OutputStatus, RunPaths};
use smsdedup::report;

#[derive(Parser)]
#[command(
    name = "smsdedup",
    version,
    about = "Deduplicate text messages from SMS Backup & Restore XML files",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input XML file (repeat to combine several backups, in order)
    #[arg(short, long = "input", value_name = "FILE")]
    inputs: Vec<PathBuf>,

    /// Output XML file [default: first input with "_deduplicated" appended]
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Removal log [default: first input with "_deduplication.log" appended]
    #[arg(short, long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Country code assumed for phone numbers without one
    #[arg(long, value_name = "CODE")]
    default_country_code: Option<String>,

    /// Treat identical messages received in the same second as duplicates
    #[arg(long)]
    ignore_date_milliseconds: bool,

    /// Treat messages differing only in whitespace as duplicates
    #[arg(long)]
    ignore_whitespace_differences: bool,

    /// Only compare timestamp and body/text/data, across SMS/MMS/RCS
    #[arg(long)]
    aggressive: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    InitConfig {
        /// Destination [default: standard config location]
        path: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config();
    apply_overrides(&mut config, &cli);

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match &cli.command {
        Some(Commands::InitConfig { path }) => cmd_init_config(path.clone(), &config),
        Some(Commands::Completions { shell }) => cmd_completions(*shell),
        Some(Commands::Manpage) => cmd_manpage(),
        None => cmd_dedup(&cli, &config),
    }
}

/// Command-line flags win over the configuration file.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(code) = &cli.default_country_code {
        config.matching.default_country_code = code.clone();
    }
    config.matching.ignore_date_milliseconds |= cli.ignore_date_milliseconds;
    config.matching.ignore_whitespace_differences |= cli.ignore_whitespace_differences;
    config.matching.aggressive |= cli.aggressive;
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "smsdedup.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "smsdedup", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Write the effective configuration to `path` or the standard location.
fn cmd_init_config(path: Option<PathBuf>, config: &Config) -> anyhow::Result<()> {
    let path = path
        .or_else(config::config_file_path)
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;
    if path.exists() {
        anyhow::bail!("Refusing to overwrite existing config: {}", path.display());
    }
    config::save_config(config, &path)?;
    println!("  Wrote {}", path.display());
    Ok(())
}

/// Deduplicate the given inputs.
fn cmd_dedup(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let Some(first) = cli.inputs.first() else {
        anyhow::bail!("No input file given (use -i FILE)");
    };
    for input in &cli.inputs {
        if !input.exists() {
            anyhow::bail!("Input file '{}' does not exist!", input.display());
        }
    }

    let paths = RunPaths {
        inputs: cli.inputs.clone(),
        output: cli
            .output
            .clone()
            .unwrap_or_else(|| config::default_output_path(first)),
        log: cli
            .log
            .clone()
            .unwrap_or_else(|| config::default_log_path(first)),
    };

    use humansize::{format_size, BINARY};
    let mut total_size = 0u64;
    for input in &paths.inputs {
        let size = std::fs::metadata(input)?.len();
        total_size += size;
        if !cli.json {
            println!("  Reading {} ({})", input.display(), format_size(size, BINARY));
        }
    }

    let pb = ProgressBar::new(total_size * 2);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Deduplicating [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let outcome = pipeline::run(
        &paths,
        config,
        Some(&|current: u64, total: u64| {
            pb.set_length(total);
            pb.set_position(current);
        }),
    )?;
    pb.finish_and_clear();
    let elapsed = start.elapsed();

    if cli.json {
        let output = match &outcome.output {
            OutputStatus::Written(path) => Some(path.to_string_lossy().to_string()),
            OutputStatus::NoDuplicates => None,
        };
        let summary = serde_json::json!({
            "buckets": outcome.stats.buckets,
            "total": outcome.stats.total(),
            "output": output,
            "log": outcome.log.to_string_lossy(),
            "elapsed_ms": elapsed.as_millis(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("{}", report::summary_table(&outcome.stats));
    println!();
    println!("  {:<20} {}", "Removal log", outcome.log.display());
    match &outcome.output {
        OutputStatus::Written(path) => println!("  {:<20} {}", "Output file", path.display()),
        OutputStatus::NoDuplicates => {
            println!("  No duplicate messages found. Skipping writing of output file.")
        }
    }
    println!("  {:<20} {:.2?}", "Elapsed", elapsed);
    println!();

    Ok(())
}
