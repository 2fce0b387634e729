//! CLI for the Mergen download manager.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mergen_core::config;
use mergen_core::resume_db::ResumeDb;
use std::path::PathBuf;

use commands::{run_add, run_cancel, run_pause, run_remove, run_resume, run_scheduler, run_status};

/// Top-level CLI for the Mergen download manager.
#[derive(Debug, Parser)]
#[command(name = "mergen")]
#[command(about = "Mergen: segmented download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a download.
    Add {
        /// HTTP/HTTPS URL, platform video page, or HLS/DASH manifest.
        url: String,
        /// Destination file or directory (default: configured download_dir, else current directory).
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Connections for this download (default from config).
        #[arg(short = 'c', long, value_name = "N")]
        connections: Option<usize>,
        /// Filename to use when the destination is a directory.
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
    },

    /// Run queued downloads until none are left.
    Run {
        /// Downloads active at once (default: max_active_downloads from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
    },

    /// Show all tasks.
    Status {
        /// Print the task list as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Pause a task; a running `mergen run` stops it after the current chunk.
    Pause {
        /// Task identifier.
        id: i64,
    },

    /// Resume a paused task.
    Resume {
        /// Task identifier.
        id: i64,
    },

    /// Retry a failed task, reusing its progress when the remote is unchanged.
    Retry {
        /// Task identifier.
        id: i64,
    },

    /// Cancel a task and delete its partial file.
    Cancel {
        /// Task identifier.
        id: i64,
    },

    /// Remove a task from history.
    Remove {
        /// Task identifier.
        id: i64,
        /// Also delete the downloaded file and any partial file.
        #[arg(long)]
        delete_files: bool,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = ResumeDb::open_default().await?;

        match cli.command {
            CliCommand::Add {
                url,
                output,
                connections,
                name,
            } => run_add(&db, &cfg, &url, output, connections, name).await?,
            CliCommand::Run { jobs } => run_scheduler(&db, cfg, jobs).await?,
            CliCommand::Status { json } => run_status(&db, json).await?,
            CliCommand::Pause { id } => run_pause(&db, id).await?,
            CliCommand::Resume { id } => run_resume(&db, cfg, id, false).await?,
            CliCommand::Retry { id } => run_resume(&db, cfg, id, true).await?,
            CliCommand::Cancel { id } => run_cancel(&db, cfg, id).await?,
            CliCommand::Remove { id, delete_files } => run_remove(&db, id, delete_files).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
