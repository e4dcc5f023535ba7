mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "chromepilot")]
#[command(about = "A browser-automation assistant driving Chrome through DevTools MCP", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Make sure an attachable Chrome is listening on the DevTools port
    Bootstrap {
        /// DevTools port (overrides MCP_DEVTOOLS_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Isolated user-data directory (overrides MCP_USER_DATA_DIR)
        #[arg(long)]
        user_data_dir: Option<String>,

        /// Profile directory inside the user-data dir (overrides MCP_PROFILE_DIR)
        #[arg(long)]
        profile_directory: Option<String>,

        /// How long to wait for the endpoint, in milliseconds (overrides MCP_READY_TIMEOUT)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Chrome channel: stable, beta, dev or canary
        #[arg(long)]
        channel: Option<String>,
    },

    /// Find the Chrome profile signed in with an account
    Profile {
        /// Account email to look for
        #[arg(short, long)]
        email: String,

        /// Chrome channel: stable, beta, dev or canary
        #[arg(long, default_value = "stable")]
        channel: String,
    },

    /// Chat with the assistant in the terminal
    Chat {
        /// Message to send (interactive mode if not provided)
        #[arg(short, long)]
        message: Option<String>,

        /// Keep conversation state under this key instead of the default slot
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Serve the web console
    Web {
        /// Host to bind to (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries command output; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Bootstrap {
            port,
            user_data_dir,
            profile_directory,
            timeout_ms,
            channel,
        } => {
            let overrides = commands::bootstrap::Overrides {
                port,
                user_data_dir,
                profile_directory,
                timeout_ms,
                channel,
            };
            commands::bootstrap::run(overrides).await?;
        }
        Commands::Profile { email, channel } => {
            commands::profile::run(&email, &channel)?;
        }
        Commands::Chat { message, session } => {
            commands::chat::run(message, session).await?;
        }
        Commands::Web { host, port } => {
            commands::web::run(host, port).await?;
        }
    }

    Ok(())
}
