use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use refscout::{IndexConfig, RunOutput};
use std::{fs, path::PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct CliConfigArgs {
    /// Configuration file, layered over the global and local defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Project base directory (overrides project_base_path)
    #[arg(short = 'd', long)]
    root: Option<PathBuf>,
}

#[derive(Parser)]
struct CliIndexArgs {
    #[command(flatten)]
    config: CliConfigArgs,

    /// Only index a small deterministic sample of target files
    #[arg(long)]
    quick_test: bool,

    /// Persist progress after every batch
    #[arg(long)]
    create_checkpoint: bool,

    /// Skip targets recorded in an existing checkpoint
    #[arg(long)]
    continue_from_checkpoint: bool,

    /// Show a progress bar while searching
    #[arg(long)]
    progress: bool,

    /// Number of worker threads
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Write the full run output as JSON to this file
    #[arg(long)]
    json: Option<PathBuf>,

    /// Print only the summary, not individual references
    #[arg(short, long)]
    stats: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Find references to recently changed files
    Index(Box<CliIndexArgs>),

    /// Print the effective configuration after layering and validation
    ShowConfig(CliConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Index(args) => index(*args),
        Commands::ShowConfig(args) => {
            let mut config = load_config(&args)?;
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(args: &CliConfigArgs) -> Result<IndexConfig> {
    let mut config = IndexConfig::load_from(args.config.as_deref())?;
    if let Some(root) = &args.root {
        config.project_base_path = root.clone();
    }
    Ok(config)
}

fn index(args: CliIndexArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    init_logging(&config.logging.level, args.verbose);

    let perf = &mut config.performance;
    perf.quick_test |= args.quick_test;
    perf.create_checkpoint |= args.create_checkpoint;
    perf.continue_from_checkpoint |= args.continue_from_checkpoint;
    perf.show_progress |= args.progress;
    if args.threads.is_some() {
        perf.max_workers = args.threads;
    }

    let output = refscout::run(config)?;

    if let Some(path) = &args.json {
        let data = serde_json::to_vec_pretty(&output)?;
        fs::write(path, data)
            .with_context(|| format!("Failed to write results to {}", path.display()))?;
    }
    print_results(&output, args.stats);
    Ok(())
}

/// `RUST_LOG` wins; otherwise `-v` flags raise the configured level
fn init_logging(configured: &str, verbose: u8) {
    let level = match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_results(output: &RunOutput, stats_only: bool) {
    let results = &output.results;

    if !stats_only {
        for file in results.files.iter().filter(|f| !f.is_empty()) {
            println!("\n{}", file.file_path.blue());
            for m in &file.references_found {
                println!(
                    "  {}:{}: {} [{}]",
                    m.found_in_file,
                    m.line_number.to_string().green(),
                    m.line_content,
                    m.matched_term.yellow()
                );
            }
        }
    }

    if output.resumed_from_checkpoint {
        println!("\nResumed from checkpoint");
    }
    println!(
        "\nFound {} references to {} of {} target files",
        results.total_references, results.targets_with_references, results.targets_searched
    );
    let search = &output.search_stats;
    if search.timeouts > 0 || search.errors > 0 {
        println!(
            "{}",
            format!(
                "{} files timed out, {} could not be read",
                search.timeouts, search.errors
            )
            .red()
        );
    }
    print!("{}", output.summary);
}
