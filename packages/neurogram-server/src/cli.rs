use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Neurogram Server - EEG session cache and event detection over HTTP
#[derive(Parser)]
#[command(name = "neurogram-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server (default)
    Serve,

    /// File key registry commands
    #[command(subcommand)]
    Key(KeyCommands),

    /// Print the metadata of a recording file
    Inspect {
        /// Path to the recording
        path: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Register a path and print its token
    Generate {
        /// Path to register
        path: PathBuf,
    },

    /// Print the path registered under a token
    Resolve {
        /// Token returned by `key generate`
        token: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["neurogram-server"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_key_resolve_parses() {
        let cli = Cli::try_parse_from(["neurogram-server", "key", "resolve", "abcd"]).unwrap();
        match cli.command {
            Some(Commands::Key(KeyCommands::Resolve { token })) => assert_eq!(token, "abcd"),
            _ => panic!("expected key resolve"),
        }
    }
}
