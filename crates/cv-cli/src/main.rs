//! ContentVault CLI - Main entry point

use clap::Parser;
use cv_cli::{ChecksumCommand, Cli, Commands, DeadLetterCommand};
use cv_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Verbose mode logs debug events; otherwise only warnings reach the console
    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("cvault")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI keeps working when the subscriber cannot be installed
    let _guard = init_logging(&log_config).ok().flatten();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli) -> cv_cli::Result<()> {
    use cv_cli::commands;

    // Checksum commands work on plain directories and never load configuration
    let config = || commands::load_config(cli.config.as_deref(), cli.database.as_deref());

    match &cli.command {
        Commands::Extract {
            types,
            workers,
            resume,
            no_sweep,
            base_url,
        } => {
            commands::extract::run(
                config()?,
                types.clone(),
                *workers,
                *resume,
                *no_sweep,
                base_url.clone(),
            )
            .await
        },

        Commands::Restore {
            target_url,
            target_token,
            instance,
            types,
            dry_run,
        } => {
            commands::restore::run(
                config()?,
                target_url.clone(),
                target_token.clone(),
                instance.clone(),
                types.clone(),
                *dry_run,
            )
            .await
        },

        Commands::Sessions { limit } => commands::sessions::list(config()?, *limit).await,

        Commands::Checkpoints { session_id } => {
            commands::sessions::checkpoints(config()?, session_id.clone()).await
        },

        Commands::DeadLetter { command } => match command {
            DeadLetterCommand::List {
                r#type,
                session,
                all,
                limit,
            } => {
                commands::dead_letter::list(config()?, r#type.clone(), session.clone(), *all, *limit)
                    .await
            },
            DeadLetterCommand::Resolve { id } => commands::dead_letter::resolve(config()?, *id).await,
            DeadLetterCommand::Purge => commands::dead_letter::purge(config()?).await,
        },

        Commands::Stats => commands::stats::run(config()?).await,

        Commands::Checksum { command } => match command {
            ChecksumCommand::Compute { dir, write } => commands::checksum::compute(dir, *write),
            ChecksumCommand::Verify { dir, expected } => {
                commands::checksum::verify(dir, expected.as_deref())
            },
        },
    }
}
