use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rowsync", about = "Offline-first row replication between peers", version)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human-readable output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Log session progress to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Override the data directory (default: ./.rowsync or ROWSYNC_HOME)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new replica in the data directory
    Init {
        /// Human-friendly label for the replica
        #[arg(long)]
        label: Option<String>,

        /// Equal-clock resolution policy
        #[arg(long, value_enum, default_value = "symmetric")]
        resolution: ResolutionArg,

        /// Records per delta page
        #[arg(long)]
        batch_size: Option<usize>,

        /// Address the daemon listens on (host:port)
        #[arg(long)]
        listen: Option<String>,
    },

    /// Local row edits
    Row {
        #[command(subcommand)]
        cmd: RowCommand,
    },

    /// Show the change log
    Log {
        /// Only records from this origin (hex id)
        #[arg(long)]
        origin: Option<String>,

        /// Only records above this clock (requires --origin)
        #[arg(long, default_value = "0", requires = "origin")]
        since: u64,

        /// Maximum number of records to show
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run a sync session with a peer's daemon
    Sync {
        /// Peer name or replica id
        peer: String,

        /// Override the peer's address (host:port)
        #[arg(long)]
        address: Option<String>,

        /// Timeout for each transport call in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Peer management
    Peer {
        #[command(subcommand)]
        cmd: PeerCommand,
    },

    /// Sync cursor inspection
    Cursor {
        #[command(subcommand)]
        cmd: CursorCommand,
    },

    /// List recorded conflicts
    Conflicts {
        /// Only conflicts in this table
        #[arg(long)]
        table: Option<String>,

        /// Only conflicts on this row (requires --table)
        #[arg(long, requires = "table")]
        key: Option<String>,
    },

    /// Database maintenance
    Db {
        #[command(subcommand)]
        cmd: DbCommand,
    },

    /// Export the replica as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ResolutionArg {
    Symmetric,
    DeleteWins,
}

#[derive(Clone, Subcommand)]
pub enum RowCommand {
    /// Insert or update a row
    Put {
        table: String,
        key: String,

        /// Column values as name=value (null, true/false, numbers, else text)
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Delete a row
    Delete { table: String, key: String },

    /// Show a row and the version that produced it
    Get { table: String, key: String },

    /// List the rows of a table
    List { table: String },

    /// Show every stored change to a row
    History { table: String, key: String },
}

#[derive(Clone, Subcommand)]
pub enum PeerCommand {
    /// Register a peer
    Add {
        /// Local name for the peer
        name: String,

        /// The peer's replica id (hex)
        peer_id: String,

        /// The peer daemon's address (host:port)
        #[arg(long)]
        address: Option<String>,
    },

    /// List registered peers
    List,

    /// Forget a peer
    Remove { name: String },
}

#[derive(Clone, Subcommand)]
pub enum CursorCommand {
    /// Show stored cursors
    Show {
        /// Peer name or replica id (default: all)
        peer: Option<String>,
    },

    /// Forget a peer's cursor so the next sync starts from scratch
    Reset { peer: String },
}

#[derive(Clone, Subcommand)]
pub enum DbCommand {
    /// Show database statistics
    Stats,

    /// Check change log integrity
    Check,
}
