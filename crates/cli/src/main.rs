use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod commands;
mod config;

use commands::{execute_keys_show, execute_keys_verify, execute_serve_command, ServeArgs, VerifyArgs};

#[derive(Parser)]
#[command(name = "rssx")]
#[command(about = "RSSX - federated social instance")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, global = true, default_value = "config.json")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an RSSX instance
    Serve(ServeCommandArgs),
    /// Inspect the instance keys and verify signatures
    Keys(KeysArgs),
}

#[derive(Args)]
pub struct ServeCommandArgs {
    /// Host to bind
    #[arg(long)]
    pub host: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Local database path
    #[arg(long)]
    pub db: Option<String>,
    /// Host peers reach this instance at
    #[arg(long)]
    pub public_host: Option<String>,
}

#[derive(Args)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysCommands,
}

#[derive(Subcommand)]
pub enum KeysCommands {
    /// Print the instance public key
    Show,
    /// Verify a detached content signature
    Verify {
        #[arg(long)]
        timestamp: i64,
        #[arg(long)]
        author: String,
        #[arg(long)]
        content: String,
        /// Hex-encoded signature
        #[arg(long)]
        signature: String,
        /// PEM file with the signer's public key
        #[arg(long)]
        public_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            execute_serve_command(ServeArgs {
                config: cli.config,
                host: args.host,
                port: args.port,
                db: args.db,
                public_host: args.public_host,
            })
            .await
        }
        Commands::Keys(args) => match args.command {
            KeysCommands::Show => execute_keys_show(&cli.config),
            KeysCommands::Verify {
                timestamp,
                author,
                content,
                signature,
                public_key,
            } => execute_keys_verify(VerifyArgs {
                timestamp,
                author,
                content,
                signature,
                public_key,
            }),
        },
    }
}
