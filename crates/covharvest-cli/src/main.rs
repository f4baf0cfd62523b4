mod config;
mod decode_cmd;
mod run_cmd;

#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;

use covharvest_core::error::HarvestError;

use run_cmd::RunArgs;

/// Exit status for invalid configuration, matching clap's usage errors.
const EXIT_USAGE: i32 = 2;

#[derive(Parser)]
#[command(name = "covharvest", about = "Periodic JaCoCo coverage harvester for Android apps")]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest coverage from a device until the time budget runs out
    Run(RunArgs),
    /// Print a summary of a coverage artifact
    Decode {
        /// Path to the .ec / .exec file
        artifact: PathBuf,
        /// List every class with its probe hits
        #[arg(long)]
        classes: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Write a default config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Execute the `covharvest init` command.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config_to(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  adb.path = {}", cfg.adb.path.display());
    println!("  jacoco.cli_jar = {}", cfg.jacoco.cli_jar.display());
    println!();
    println!("Next: point jacoco.cli_jar at your jacococli.jar, then `covharvest run`.");

    Ok(())
}

/// Cancel `token` on Ctrl-C. The current cycle still runs to completion.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current cycle");
            token.cancel();
        }
    });
}

fn is_config_error(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<HarvestError>(), Some(HarvestError::Config(_)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            if let Err(e) = run_cmd::run_harvest(args, cancel).await {
                eprintln!("error: {e:#}");
                if is_config_error(&e) {
                    eprintln!();
                    eprintln!("{}", Cli::command().render_usage());
                    std::process::exit(EXIT_USAGE);
                }
                std::process::exit(1);
            }
        }
        Commands::Decode {
            artifact,
            classes,
            json,
        } => {
            decode_cmd::run_decode(&artifact, classes, json)?;
        }
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "covharvest", &mut std::io::stdout());
        }
    }

    Ok(())
}
