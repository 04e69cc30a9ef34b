use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "dbnet",
    version,
    about = "Database client backend: HTTP API, connections and SQL",
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP and websocket API
    Serve(ServeArgs),

    /// List or test the configured connections
    Conns {
        #[command(subcommand)]
        command: ConnsCommand,
    },

    /// Execute SQL against a connection
    Exec(ExecArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind (defaults to DBNET_HOST, then 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (defaults to DBNET_PORT, then 5987)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Subcommand, Debug)]
pub enum ConnsCommand {
    /// Show every known connection
    List,

    /// Connect and run a trivial query
    Test {
        /// Connection name
        name: String,
    },
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Connection name
    pub conn: String,

    /// SQL text to run
    #[arg(short, long, conflicts_with = "file")]
    pub query: Option<String>,

    /// File holding the SQL to run
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}
