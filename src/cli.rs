use std::net::SocketAddr;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "outlook-mcp",
    version,
    about = "Microsoft Graph tool suite with an MCP stdio server and demo chat client"
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive chat client backed by a spawned MCP tool server.
    Chat {
        /// Command used to launch the tool server subprocess.
        server_command: String,
        /// Arguments passed to the tool server command.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        server_args: Vec<String>,
    },
    /// Serve the Microsoft Graph tools over stdio (MCP transport).
    ServeStdio,
    /// Serve the HTTP control surface (health, mail, tool catalog).
    ServeHttp {
        /// Listen address; overrides the configured one.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
}
