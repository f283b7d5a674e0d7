use clap::Parser;
use gauth_helper::args::{Args, Command};
use gauth_helper::{commands, Config, Result};
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().home().path();

    let _: () = match args.command() {
        Command::Init(init_args) => commands::init(
            home,
            init_args.client_secret(),
            init_args.scopes(),
            init_args.port(),
        )
        .await?
        .print(),

        Command::Auth(auth_args) => {
            let config = Config::load(home)
                .await?
                .with_overrides(auth_args.overrides());
            if auth_args.verify() {
                commands::auth_verify(&config).await?.print()
            } else {
                commands::auth(&config).await?.print()
            }
        }

        Command::Clear => commands::clear(&Config::load(home).await?).await?.print(),
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for the library and binary only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
