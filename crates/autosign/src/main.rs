//! Puppet policy executable.
//!
//! Puppet runs `autosign <certname>` for every signing request and pipes
//! the PEM request to stdin. Exit status 0 signs, anything else refuses.
//! Nothing is written to stdout; diagnostics go to the `global.debug` log
//! file when one is configured.

use std::{fs::OpenOptions, path::PathBuf, process::ExitCode, sync::Mutex};

use anyhow::Context;
use autosign::{CONFIG_CANDIDATES, Config};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

/// Decide whether Puppet should sign a certificate request read from stdin.
#[derive(Parser, Debug)]
#[command(name = "autosign")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: first of /etc/puppet/autosign.toml,
    /// /etc/puppetlabs/puppet/autosign.toml that exists)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hostname the certificate is requested for
    hostname: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "autosign failed");
            eprintln!("autosign: {err:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let path = Config::locate(cli.config.as_deref(), &CONFIG_CANDIDATES)?;
    let config =
        Config::load(&path).with_context(|| format!("loading {}", path.display()))?;

    if let Some(debug) = &config.global.debug {
        init_tracing(debug)?;
    }
    tracing::debug!(config = %path.display(), hostname = %cli.hostname, "starting");

    let mut csr = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut csr)
        .await
        .context("reading certificate request from stdin")?;

    let signer = config.autosigner().context("building autosigner")?;
    let result = signer.authorize(&cli.hostname, &csr).await;
    Ok(result.is_approved())
}

/// Appends log records to `path`.
fn init_tracing(path: &std::path::Path) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening debug log {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))
}
