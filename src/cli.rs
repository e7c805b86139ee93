use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    actions::{Command, CommandReply, LineEvent},
    config::Config,
};

/// The command line interface for serial hub.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// The HTTP port, overrides the configuration
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level on stdout
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also write the server's own logs to daily files in this directory
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[command(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON request of sending a command to a device.
    Command,

    /// Show an example JSON message (from server to user) of a line a device printed.
    LineEvent,

    /// Show an example JSON response to a command which failed.
    ErrorReply,
}

impl Examples {
    /// The example as it would appear on the wire or on disk.
    pub fn render(&self) -> String {
        let pretty = |value: serde_json::Value| {
            serde_json::to_string_pretty(&value).expect("Serialize should work")
        };

        match self {
            Examples::Config => Config::example().serialize_pretty(),
            Examples::Command => pretty(serde_json::json!(Command::example())),
            Examples::LineEvent => pretty(serde_json::json!(LineEvent::example())),
            Examples::ErrorReply => pretty(serde_json::json!(CommandReply::example_error())),
        }
    }
}

/// Print what the command asks for.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(example) => println!("{}", example.render()),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn arguments() {
        let cli = Cli::parse_from(["serial-hub", "hub.ron", "--port", "9000", "--log-level", "debug"]);

        assert_eq!(cli.config, Some(PathBuf::from("hub.ron")));
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.log_level, Level::DEBUG);
        assert!(cli.command.is_none());
    }

    #[test]
    fn examples_parse_back() {
        let command: Command = serde_json::from_str(&Examples::Command.render()).unwrap();
        assert_eq!(command, Command::example());

        let reply: CommandReply = serde_json::from_str(&Examples::ErrorReply.render()).unwrap();
        assert!(!reply.is_ok());

        Config::deserialize(&Examples::Config.render()).unwrap();
    }
}
