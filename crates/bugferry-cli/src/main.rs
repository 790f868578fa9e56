#![forbid(unsafe_code)]

mod client;
mod cmd;
mod output;
mod settings;

use std::env;
use std::path::PathBuf;

use bugferry_core::MigrationError;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "bugferry: migrate Bugzilla bugs into GitLab issues",
    long_about = None
)]
struct Cli {
    /// Config directory holding defaults.yml and the mapping files.
    #[arg(long, global = true, value_name = "DIR", env = "BUGFERRY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Migration",
        about = "Migrate bugs into GitLab issues",
        long_about = "Migrate bugs, their comments and attachments into GitLab issues, writing each as its original author.",
        after_help = "EXAMPLES:\n    # Migrate two bugs\n    bugferry migrate 42 43\n\n    # Migrate the ids listed in a file, without writing to GitLab\n    bugferry migrate --bug-list bugs --dry-run\n\n    # Run the configured query, save the list, then migrate it\n    bugferry migrate --fetch --json"
    )]
    Migrate(cmd::migrate::MigrateArgs),

    #[command(
        next_help_heading = "Migration",
        about = "Query the source tracker for bugs to migrate",
        long_about = "Run the configured product/component/status query and save the ids to buglist_file.",
        after_help = "EXAMPLES:\n    # Fetch and save the bug list\n    bugferry fetch-bugs\n\n    # Emit machine-readable output\n    bugferry fetch-bugs --json"
    )]
    FetchBugs(cmd::fetch_bugs::FetchBugsArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Validate and summarise the config directory",
        long_about = "Load the config directory and print a summary. No network access.",
        after_help = "EXAMPLES:\n    # Check the default config directory\n    bugferry check-config\n\n    # Check another directory\n    bugferry --config-dir ./migration check-config --json"
    )]
    CheckConfig(cmd::check_config::CheckConfigArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completion scripts",
        long_about = "Generate shell completion scripts for supported shells.",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    bugferry completions bash\n\n    # Generate zsh completions\n    bugferry completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("BUGFERRY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "bugferry=debug,info"
        } else {
            "bugferry=info,warn"
        })
    });

    let format = env::var("BUGFERRY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Print the error chain, plus the stable code and hint when the failure
/// came from the engine.
fn report_failure(err: &anyhow::Error) {
    let engine = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<MigrationError>());
    let Some(engine) = engine else {
        eprintln!("error: {err:#}");
        return;
    };

    // Engine errors already render their own sources.
    let mut parts = Vec::new();
    for cause in err.chain() {
        parts.push(cause.to_string());
        if cause.is::<MigrationError>() {
            break;
        }
    }
    let code = engine.code();
    eprintln!("error[{code}]: {}", parts.join(": "));
    if let Some(hint) = code.hint() {
        eprintln!("  hint: {hint}");
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        return cmd::completions::run_completions(args.shell, &mut command);
    }

    let config_dir = settings::resolve_config_dir(cli.config_dir.as_deref())?;
    debug!(config_dir = %config_dir.display(), "using config directory");

    match cli.command {
        Commands::Migrate(args) => cmd::migrate::run_migrate(&args, &config_dir),
        Commands::FetchBugs(args) => cmd::fetch_bugs::run_fetch_bugs(&args, &config_dir),
        Commands::CheckConfig(args) => cmd::check_config::run_check_config(&args, &config_dir),
        Commands::Completions(_) => Ok(()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli);
    if let Err(err) = &result {
        report_failure(err);
        std::process::exit(1);
    }
    result
}
