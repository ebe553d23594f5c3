mod compose;
mod credentials;
mod error;
mod logging;
mod mail_session;
mod message_view;
mod settings;
mod signing;
mod terminal;
mod workflow;


use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use crate::mail_session::{MailSession, NetworkConnector, SessionOptions};
use crate::signing::Signer;
use crate::terminal::Terminal;

/// Terminal email client: IMAP reading, SMTP sending, PGP signing.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (default: <config dir>/postbox/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log file (default: <config dir>/postbox/postbox.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[cfg(feature = "gpgme")]
fn signer() -> Box<dyn Signer> {
    Box::new(signing::GpgmeSigner)
}

#[cfg(not(feature = "gpgme"))]
fn signer() -> Box<dyn Signer> {
    Box::new(signing::GpgSigner::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => settings::default_config_path()?,
    };
    let log_path = cli
        .log_file
        .unwrap_or_else(|| config_path.with_file_name(format!("{}.log", settings::APP_DIR)));
    logging::init(&log_path, cli.verbose).context("cannot set up logging")?;

    let (config, created) = settings::load_or_create(&config_path)?;
    let mut terminal = Terminal::stdio(&config);
    if created {
        terminal.notice(&format!("Created default config at {}", config_path.display()))?;
    }
    config
        .validate()
        .with_context(|| format!("edit {} and start again", config_path.display()))?;

    let credentials = credentials::prompt_credentials(&config.email)?;
    let connector = NetworkConnector::from_config(&config);
    let options = SessionOptions {
        round_trip_timeout: config.round_trip_timeout(),
        signing_key: config.gpg_recipient.clone(),
    };
    let mut session = MailSession::open(&connector, &credentials, signer(), options)
        .await
        .inspect_err(|err| error!("Startup failed: {}", err))?;

    let outcome = tokio::select! {
        outcome = workflow::run(&mut session, &config, &mut terminal) => outcome,
        signal = tokio::signal::ctrl_c() => {
            println!();
            info!("Interrupted, closing session");
            signal.context("cannot listen for Ctrl-C")
        }
    };
    if let Err(err) = session.close().await {
        error!("Closing session failed: {}", err);
        terminal.failure(&err)?;
    }
    println!("Goodbye!");
    info!("Exiting");
    outcome
}
