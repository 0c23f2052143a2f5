use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use tracing::info;

use trac_crawler::commands;
use trac_crawler::config::ConfigArgs;
use trac_crawler::tracker::TracClient;

#[derive(Parser)]
#[command(name = "trac-crawler")]
#[command(about = "Export Trac tickets, comments and attachments to disk")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the configured tickets (default)
    Export,

    /// Print the ticket IDs an export would visit
    Resolve,

    /// Fetch one ticket and print its record without writing anything
    Show {
        /// Ticket ID
        id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TRAC_CRAWLER_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = cli.config.into_config()?;
    let tracker = TracClient::new(config.base_url.clone(), config.credential.clone())?;
    let mut stdout = io::stdout().lock();

    match cli.command.unwrap_or(Commands::Export) {
        Commands::Export => {
            let ids = commands::resolve::run(&tracker, &config.ticket_ids, &config.keywords)?;
            info!(count = ids.len(), "Exporting tickets");
            let summary = commands::export::run(&tracker, &config, &ids, &mut stdout)
                .context("Export aborted")?;
            info!(
                exported = summary.exported,
                skipped = summary.skipped,
                attachment_failures = summary.attachment_failures,
                "Export finished"
            );
            Ok(())
        }

        Commands::Resolve => {
            let ids = commands::resolve::run(&tracker, &config.ticket_ids, &config.keywords)?;
            for id in ids {
                writeln!(stdout, "{}", id)?;
            }
            Ok(())
        }

        Commands::Show { id } => commands::show::run(&tracker, &config, id, &mut stdout),
    }
}
