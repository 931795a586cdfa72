//! CLI definitions and command implementations for notesync.

pub mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// notesync - Offline-first notes, synced to GitHub
#[derive(Parser)]
#[command(name = "ns")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/notesync/notesync.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Optional note fields shared by `add` and `edit`.
#[derive(Args, Debug, Default)]
pub struct NoteFields {
    /// Note body ("-" reads stdin)
    #[arg(short, long)]
    pub body: Option<String>,

    /// One-line summary
    #[arg(short, long)]
    pub summary: Option<String>,

    /// Source URL
    #[arg(short = 'u', long)]
    pub url: Option<String>,

    /// Category (used to group the weekly digest)
    #[arg(short, long)]
    pub category: Option<String>,

    /// Tag (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Keep {
    Local,
    Remote,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture a new note
    Add {
        title: String,

        #[command(flatten)]
        fields: NoteFields,
    },

    /// List notes, newest first
    List {
        /// Maximum number of notes
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one note (id or unique id prefix)
    Show { id: String },

    /// Case-insensitive search over title, summary, body and tags
    Search { query: String },

    /// Edit an existing note
    Edit {
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        fields: NoteFields,
    },

    /// Delete a note
    Rm { id: String },

    /// Push local changes, then pull remote ones
    Sync,

    /// Push queued local changes only
    Push,

    /// Pull remote changes only
    Pull,

    /// Show configuration, network and queue status
    Status,

    /// List notes held in conflict
    Conflicts,

    /// Settle a conflict
    Resolve {
        id: String,

        /// Which side wins
        #[arg(long, value_enum)]
        keep: Keep,
    },

    /// Store a GitHub token (prompted when not given)
    Login {
        /// Personal access token with contents:write
        #[arg(long)]
        token: Option<String>,

        /// Repository as owner/repo
        #[arg(short, long)]
        repo: Option<String>,
    },

    /// Forget the stored GitHub token
    Logout,

    /// Bootstrap an empty remote repository
    InitRemote {
        /// Repository as owner/repo
        repo: Option<String>,
    },

    /// Render the weekly digest of recent notes
    Digest {
        /// Window in days
        #[arg(short, long, default_value = "7")]
        days: i64,

        /// Write to a file (directory or path) instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Publish the weekly digest to the remote
    Publish {
        /// Window in days
        #[arg(short, long, default_value = "7")]
        days: i64,

        /// Replace whatever is published now
        #[arg(long)]
        force: bool,
    },

    /// Keep syncing in the foreground until Ctrl-C
    Watch,
}
