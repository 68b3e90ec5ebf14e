use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "bookdrop",
    about = "Place downloaded e-books in your library and push them to your Tolino cloud",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional subcommand; defaults to a health check when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Manage the stored cloud-account credentials.
    #[command(subcommand)]
    Credentials(CredentialsCommand),
    /// Move a downloaded book into the ingest folder.
    Ingest {
        /// Downloaded book file.
        file: PathBuf,
        /// Aggregator id of the book.
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "epub")]
        format: String,
        /// Upload to the cloud account once ingested.
        #[arg(long)]
        upload: bool,
    },
    /// Upload a book file to the cloud account using stored credentials.
    Upload {
        file: PathBuf,
    },
    /// Check that the vault can encrypt, persist, and decrypt.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CredentialsCommand {
    /// Encrypt and store account credentials, replacing any existing ones.
    Set {
        /// Account e-mail used to log in.
        #[arg(long)]
        email: String,
        /// Read the password from the first line of stdin instead of prompting.
        #[arg(long)]
        password_stdin: bool,
    },
    /// Show whether credentials are stored (never prints the password).
    Status,
    /// Delete stored credentials.
    Clear,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
    /// Print the effective configuration with secrets redacted.
    Show,
}
