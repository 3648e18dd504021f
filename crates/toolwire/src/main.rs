//! toolwire - command-line client for stdio MCP servers.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    init_logging, list_servers, load_config, parse_json_arg, parse_tool_arguments,
    run_session_command, select_server, ServerSelection, SessionCommand,
};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "toolwire")]
#[command(author, version, about = "Talk to stdio MCP servers", long_about = None)]
struct Cli {
    /// Config file (JSON or JSONC)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Configured server to use
    #[arg(short, long, global = true, conflicts_with = "exec")]
    server: Option<String>,

    /// Launch this program as an ad hoc server
    #[arg(long, global = true)]
    exec: Option<String>,

    /// Argument for --exec (repeatable)
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    exec_args: Vec<String>,

    /// Working directory for the server process
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers
    Servers,
    /// Connect and list the server's tools
    Tools {
        /// Print the tool list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call a tool via tools/call
    Call {
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
        /// Print only the JSON payload of the result
        #[arg(long)]
        json_payload: bool,
    },
    /// Run a SPARQL query via execute_sparql
    Sparql {
        /// Query text
        query: String,
    },
    /// Send an arbitrary request after the handshake
    Raw {
        /// JSON-RPC method
        method: String,
        /// Request params as JSON
        #[arg(long)]
        params: Option<String>,
    },
}

impl Commands {
    /// Build the session request, validating JSON inputs before anything
    /// is spawned. `None` for commands that need no server.
    fn session_command(self) -> anyhow::Result<Option<SessionCommand>> {
        let command = match self {
            Commands::Servers => return Ok(None),
            Commands::Tools { json } => SessionCommand::Tools { json },
            Commands::Call {
                tool,
                args,
                json_payload,
            } => SessionCommand::Call {
                tool,
                arguments: parse_tool_arguments(args.as_deref())?,
                json_payload,
            },
            Commands::Sparql { query } => SessionCommand::Sparql { query },
            Commands::Raw { method, params } => SessionCommand::Raw {
                method,
                params: parse_json_arg("--params", params.as_deref())?,
            },
        };
        Ok(Some(command))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(path) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        debug!(path = %path.display(), "Logging to file");
    }

    let cwd = std::env::current_dir()?;
    let (config, source) = load_config(cli.config.as_deref(), &cwd).await?;
    debug!(source = %source, servers = config.servers.len(), "Configuration loaded");

    let Some(command) = cli.command.session_command()? else {
        list_servers(&config, &source);
        return Ok(());
    };

    let selection = ServerSelection {
        server: cli.server,
        exec: cli.exec,
        args: cli.exec_args,
        cwd: cli.cwd,
    };
    let server = select_server(&selection, &config)?;

    run_session_command(server, command).await
}
