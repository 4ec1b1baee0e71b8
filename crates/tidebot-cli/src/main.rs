mod chat;
mod cron;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tidebot", about = "Personal AI assistant runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the assistant: interactive console, scheduler and subagents
    Agent {
        /// Send a single message, print the reply and exit
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Manage scheduled jobs
    Cron {
        #[command(subcommand)]
        command: cron::CronCommand,
    },
    /// Show configuration and scheduler status
    Status,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with console replies.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Agent { message } => rt.block_on(chat::run_agent(message))?,
        Commands::Cron { command } => rt.block_on(cron::run_cron(command))?,
        Commands::Status => rt.block_on(cron::run_status())?,
    }

    Ok(())
}
