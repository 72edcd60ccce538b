use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// linkhub — linked service registry and code runner
#[derive(Parser)]
#[command(name = "linkhub", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Port to bind (defaults to LINKHUB_PORT or 5000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a source file through the sandbox and print its output
    Exec {
        /// File whose contents are submitted
        file: PathBuf,
    },

    /// Run the database connection probe once
    Probe {
        #[arg(long)]
        server: String,
        #[arg(long)]
        database: String,
        /// SQL authentication user; omit for Windows authentication
        #[arg(long, requires = "password")]
        username: Option<String>,
        #[arg(long, env = "LINKHUB_PROBE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Validate the server certificate instead of trusting it
        #[arg(long)]
        no_trust_cert: bool,
    },
}
