use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "vwx")]
#[command(about = "VWAP execution engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> overlays)
        #[arg(long = "config", required = true, num_args = 1..)]
        config_paths: Vec<String>,
    },

    /// Replay ticks and timed targets against the paper venue and print a
    /// per-instrument JSON summary.
    Replay {
        /// Layered config paths in merge order; defaults apply when omitted
        #[arg(long = "config", num_args = 1..)]
        config_paths: Vec<String>,

        /// Tick CSV: symbol,venue,ts_ms,price,volume
        #[arg(long)]
        ticks: PathBuf,

        /// Target CSV: ts_ms,symbol,venue,quantity[,deadline_ms]
        #[arg(long)]
        targets: PathBuf,

        /// Treat `quantity` as an absolute position. Rows sharing a
        /// timestamp form one portfolio; held instruments missing from it
        /// are flattened, and a target the filled position already meets
        /// stops that instrument's working ticket.
        #[arg(long, default_value_t = false)]
        absolute: bool,

        /// Drive the concurrent runtime (one task per instrument) instead of
        /// the synchronous engine.
        #[arg(long, default_value_t = false)]
        concurrent: bool,

        /// Write the summary here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::ConfigHash { config_paths } => {
            let loaded = commands::load_config(&config_paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Replay {
            config_paths,
            ticks,
            targets,
            absolute,
            concurrent,
            out,
        } => {
            let args = commands::replay::ReplayArgs {
                config_paths,
                ticks,
                targets,
                absolute,
                concurrent,
            };
            let summary = commands::replay::run(args).await?;
            commands::write_json(&summary, out.as_deref())?;
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
