use clap::{Parser, Subcommand};

/// Maintenance commands for the asset service.
///
/// Settings are read the same way the server reads them: `config/config.toml`
/// (or the file named by `ASSETS_CONFIG`) overridden by `ASSETS__*` variables.
#[derive(Parser, Debug)]
#[command(name = "assetctl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evict chunk sessions nobody has touched for a while
    Sweep {
        /// Idle time in seconds after which a session is removed.
        /// Defaults to `upload.session_max_age_secs`.
        #[arg(long)]
        older_than: Option<u64>,
    },

    /// Print identifiers from a generator configured like the server
    NextId {
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Also print timestamp, datacenter, worker and sequence
        #[arg(long)]
        decompose: bool,
    },

    /// Download a remote file into the asset store and print its URL
    Import {
        url: String,

        /// Owning module name or legacy code
        #[arg(long)]
        module: Option<String>,

        /// Explicit directory, takes precedence over --module
        #[arg(long)]
        path: Option<String>,
    },

    /// Move stored references from one public prefix to another
    RewritePrefix {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },
}
