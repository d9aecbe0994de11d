//! CLI for the ESDM entropy source and DRNG manager.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "esdm")]
#[command(about = "esdm: entropy source and DRNG manager")]
#[command(version = esdm_core::VERSION)]
struct Cli {
    /// JSON configuration file (missing fields take their defaults)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the DRNG and show seeding state, counters and per-source entropy
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print random bytes from the DRNG
    Bytes {
        /// Number of bytes
        #[arg(long, short = 'n', default_value = "32")]
        count: usize,

        /// Output format
        #[arg(long, default_value = "hex", value_parser = ["hex", "raw"])]
        format: String,

        /// Only wait for minimal seeding instead of full seeding
        #[arg(long)]
        min: bool,
    },

    /// Start an HTTP server serving DRNG output
    Server {
        /// Port to listen on
        #[arg(long, default_value = "8042")]
        port: u16,

        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Accept entropy for the auxiliary pool via POST /api/v1/entropy
        #[arg(long)]
        allow_insert: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Status { json } => commands::status::run(config, json),
        Commands::Bytes { count, format, min } => commands::bytes::run(config, count, &format, min),
        Commands::Server {
            port,
            host,
            allow_insert,
        } => commands::server::run(config, &host, port, allow_insert),
    }
}
