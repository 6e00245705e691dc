use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ensemble", version, about = "Multi-pipeline agentic orchestration runtime")]
pub struct Cli {
    /// Path to the TOML config file. Missing file = defaults.
    #[arg(long, global = true, default_value = "ensemble.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP gateway (default).
    Serve,

    /// Run one pipeline to completion and print its event stream.
    Run {
        /// Pipeline name: coding, chat, or rag.
        #[arg(long)]
        pipeline: String,
        /// Task text or user message.
        #[arg(long, default_value = "")]
        task: String,
        /// Session to run under; a fresh one is minted when omitted.
        #[arg(long)]
        session: Option<String>,
        /// Replay seed for a reproducible run id.
        #[arg(long)]
        seed: Option<String>,
        /// GitHub issue reference (`owner/repo#N`) for the coding pipeline.
        #[arg(long)]
        github: Option<String>,
        /// Jira issue key for the coding pipeline.
        #[arg(long)]
        jira: Option<String>,
    },

    /// Re-execute a recorded reasoning-graph journal and report any
    /// divergence from the original run.
    Replay {
        /// Path to a `<session>.jsonl` journal file.
        #[arg(long)]
        journal: PathBuf,
        /// Fall back to a sentinel instead of failing when recorded
        /// completions run out.
        #[arg(long)]
        lenient: bool,
    },
}
