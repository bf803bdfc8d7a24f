//! drivekey - command-line front end for the drivekey backend.
//!
//! Restores the saved session at startup, then logs in, logs out or
//! registers vehicles. Expired access tokens are refreshed transparently.

mod commands;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use drivekey_core::api::{ApiClient, AuthService, CarService};
use drivekey_core::auth::{SessionPhase, SessionStore};
use drivekey_core::config::{Config, ENV_STORAGE_PASSPHRASE};
use drivekey_core::models::Credentials;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{Command, USAGE};

/// Directory for rolling log files, if file logging is wanted
const ENV_LOG_DIR: &str = "DRIVEKEY_LOG_DIR";

/// Log file name prefix
const LOG_FILE_PREFIX: &str = "drivekey.log";

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("Error: {}\n\n{}", message, USAGE);
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    let passphrase = std::env::var(ENV_STORAGE_PASSPHRASE).ok();
    let storage = config.open_storage(passphrase.as_deref())?;

    let session = Arc::new(SessionStore::with_policy(storage, config.restore_policy));
    session.initialize().await;
    info!(phase = ?session.phase(), "drivekey starting");

    let api = ApiClient::new(&config.client_config(), Arc::clone(&session))
        .context("Failed to create API client")?;

    run(command, api).await
}

async fn run(command: Command, api: ApiClient) -> Result<()> {
    match command {
        Command::Status => print_status(&api).await,
        Command::Login { email } => {
            let password = rpassword::prompt_password("Password: ")?;
            let user = AuthService::new(api)
                .login(&Credentials::new(email, password))
                .await
                .context("Login failed")?;
            println!("Logged in as {}", user.email);
        }
        Command::SignUp { email } => {
            let password = rpassword::prompt_password("Choose a password: ")?;
            let message = AuthService::new(api)
                .sign_up(&Credentials::new(email, password))
                .await
                .context("Sign-up failed")?;
            println!("{}", message);
        }
        Command::Logout => {
            AuthService::new(api).logout().await;
            println!("Logged out");
        }
        Command::AddCar(car) => {
            if api.session().access_token().await.is_none() {
                anyhow::bail!("Not logged in. Run `drivekey login <email>` first.");
            }
            let reply = CarService::new(api)
                .register(&car)
                .await
                .context("Vehicle registration failed")?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Command::Help => println!("{}", USAGE),
    }
    Ok(())
}

async fn print_status(api: &ApiClient) {
    let data = api.session().snapshot().await;
    match data.phase {
        SessionPhase::Authenticated => {
            let who = data
                .user
                .as_ref()
                .map(|u| u.email.as_str())
                .unwrap_or("restored session");
            println!("Logged in ({})", who);
        }
        SessionPhase::Unauthenticated if data.has_tokens() => {
            println!("Saved credentials found; log in to confirm your identity");
        }
        _ => println!("Not logged in"),
    }
    if let Some(at) = data.authenticated_at {
        println!("  since:     {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(at) = data.refreshed_at {
        println!("  refreshed: {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    println!("  server:    {}", api.base_url());
}
