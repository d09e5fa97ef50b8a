//! Command line argument parsing
//!
//! Subcommands map one to one onto engine operations:
//! - `start` / `stop`: bring services up or down, printing progress
//! - `status`: running state of every service
//! - `cmd`: run a project command
//! - `exec`: open a shell (or run one command) in a running service
//! - `pull`: pull every image the project references
//! - `show-config`: show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "devstack")]
#[command(author = "Devstack Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a project's services and commands in containers")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Project directory (defaults to the current directory)
    #[arg(short = 'p', long = "project", global = true)]
    pub project: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Engine backend, overriding the configured one
    #[arg(short = 'e', long = "engine", global = true)]
    pub engine: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start services (all if none are named)
    Start {
        services: Vec<String>,
    },
    /// Stop services (all if none are named)
    Stop {
        services: Vec<String>,
    },
    /// Show which services are running
    Status {
        /// Print JSON instead of a table
        #[arg(long = "json")]
        json: bool,
    },
    /// Run a project command
    Cmd {
        /// Command name
        name: String,
        /// Run inside this running service instead of a new container
        #[arg(short = 's', long = "service")]
        service: Option<String>,
        /// Arguments appended to the command line
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        arguments: Vec<String>,
    },
    /// Open a shell in a running service
    Exec {
        /// Service name
        service: String,
        /// Run this command instead of an interactive shell
        #[arg(long = "command")]
        command: Option<String>,
        /// Run as root
        #[arg(long = "root")]
        root: bool,
        /// Terminal columns
        #[arg(long = "cols")]
        cols: Option<u16>,
        /// Terminal lines
        #[arg(long = "lines")]
        lines: Option<u16>,
    },
    /// Run a service in the foreground
    Fg {
        /// Service name
        service: String,
        /// Arguments appended to the service command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        arguments: Vec<String>,
    },
    /// Pull every image the project references
    Pull,
    /// Show configuration discovery information
    ShowConfig,
}
