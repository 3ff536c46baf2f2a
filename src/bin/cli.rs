//! # Crow Server CLI
//!
//! Command-line companion to the desktop client: logs in against a Crow
//! photo server and uploads a single image, refreshing an expired access
//! token on the way when the server asks for it.
//!
//! ## Usage
//!
//! ```bash
//! # Check credentials
//! crow-cli -u admin -p 1234 login
//!
//! # Upload a photo into a folder on the server
//! crow-cli -u admin -p 1234 upload ./beach.jpg -d holidays/2025
//!
//! # Point the client at another server (persisted)
//! crow-cli config --server http://photos.local:8080
//! ```
//!
//! ## Authentication
//!
//! Credentials can be provided via:
//! - Command-line arguments: `--username`, `--password`, `--token`, `--refresh-token`
//! - Environment variables: `CROW_USERNAME`, `CROW_PASSWORD`, `CROW_TOKEN`, `CROW_REFRESH_TOKEN`

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use crow_client::{CrowClient, Outcome, Session, Settings, UploadRequest};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit code indicating successful completion.
const EXIT_SUCCESS: u8 = 0;
/// Exit code indicating a general error occurred.
const EXIT_ERROR: u8 = 1;

// =============================================================================
// CLI Definition
// =============================================================================

#[derive(Parser)]
#[command(name = "crow-cli")]
#[command(author, version, about = "Crow Server CLI - login and photo upload")]
struct Cli {
    /// Enable verbose logging (can also use RUST_LOG env var)
    #[arg(short, long)]
    verbose: bool,

    /// Server base URL - defaults to the saved setting
    #[arg(short, long, env = "CROW_SERVER_URL")]
    server: Option<String>,

    /// Username - can also use CROW_USERNAME env var
    #[arg(short, long, env = "CROW_USERNAME")]
    username: Option<String>,

    /// Password - can also use CROW_PASSWORD env var
    #[arg(short, long, env = "CROW_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Access token to use instead of logging in
    #[arg(short, long, env = "CROW_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Refresh token paired with --token
    #[arg(long, env = "CROW_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and report whether the server accepted the credentials
    Login,

    /// Upload one image
    Upload {
        /// Image file to upload
        file: PathBuf,

        /// Target folder on the server (optional)
        #[arg(short = 'd', long = "path", default_value = "")]
        target_folder: String,
    },

    /// Show or change the saved server URL
    Config {
        /// New server base URL
        #[arg(long)]
        server: Option<String>,
    },

    /// Show version information
    About,
}

/// Builds a session from a token pair, or by logging in with username/password.
async fn authenticate(
    client: &CrowClient,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    refresh_token: Option<String>,
) -> anyhow::Result<Session> {
    if let Some(token) = token {
        return Ok(Session::with_tokens(token, refresh_token.unwrap_or_default()));
    }

    let (Some(user), Some(pass)) = (username, password) else {
        bail!(
            "Authentication required! Provide:\n  \
             • --username and --password, or\n  \
             • --token (optionally with --refresh-token), or\n  \
             • Set CROW_USERNAME/CROW_PASSWORD environment variables"
        );
    };

    let mut session = Session::new();
    let request = session.login(user, pass);
    let outcome = client
        .execute(&mut session, request, |_| {}, |_| {})
        .await
        .context("Login request could not be sent")?;

    match outcome {
        Outcome::LoggedIn => {
            println!("✓ {outcome}");
            Ok(session)
        }
        other => Err(anyhow!("{other}")),
    }
}

/// Application entry point.
#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Main application logic.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("crow_client=debug,crow_cli=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("crow_client=warn,crow_cli=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let mut settings = Settings::load();
    let server_url = cli
        .server
        .clone()
        .unwrap_or_else(|| settings.server_url.clone());
    let client = CrowClient::new(server_url);

    match cli.command {
        Commands::Login => {
            // A supplied token would skip the server entirely.
            if cli.username.is_none() || cli.password.is_none() {
                bail!("login needs --username and --password (--token is only used by upload)");
            }
            authenticate(&client, cli.username, cli.password, None, None).await?;
        }

        Commands::Upload {
            file,
            target_folder,
        } => {
            let mut session = authenticate(
                &client,
                cli.username,
                cli.password,
                cli.token,
                cli.refresh_token,
            )
            .await?;

            let request = session.upload(UploadRequest::new(&file, target_folder))?;

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::with_template(
                    "  [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%)",
                )?
                .progress_chars("█▓░"),
            );

            println!("📤 Uploading {}...", file.display());
            let bar = pb.clone();
            let outcome = client
                .execute(
                    &mut session,
                    request,
                    move |progress| {
                        if progress.total > 0 {
                            bar.set_length(progress.total as u64);
                            bar.set_position(progress.sent.max(0) as u64);
                        }
                    },
                    |outcome| {
                        if outcome.next_request().is_some() {
                            pb.set_position(0);
                            pb.println(format!("  {outcome}"));
                        }
                    },
                )
                .await
                .with_context(|| format!("Could not upload {}", file.display()))?;
            pb.finish_and_clear();

            let Outcome::Uploaded { body } = &outcome else {
                bail!("{outcome}");
            };
            println!("✓ {outcome}");
            if !body.is_empty() {
                tracing::debug!(%body, "server response");
            }
        }

        Commands::Config { server } => {
            if let Some(url) = server {
                settings.set_server_url(&url)?;
                settings.save().context("Could not save settings")?;
                println!("✓ Server URL set to {}", settings.server_url);
            } else {
                println!("Server URL: {}", settings.server_url);
                if let Some(path) = Settings::default_path() {
                    println!("Settings:   {}", path.display());
                }
            }
        }

        Commands::About => {
            println!("Crow Server Client v{}", env!("CARGO_PKG_VERSION"));
            println!("{}", env!("CARGO_PKG_DESCRIPTION").replace('\n', " ").trim());
            println!("Authors: {}", env!("CARGO_PKG_AUTHORS"));
        }
    }

    Ok(())
}
