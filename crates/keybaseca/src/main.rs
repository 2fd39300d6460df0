mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kssh_ca::audit::AuditLine;
use kssh_ca::config::CaConfig;
use kssh_ca::error::CaError;
use kssh_channel::fs::{self, FsChannel};
use kssh_channel::Channel;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Command};

/// Maximum time to wait for orderly shutdown before forcing exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Hold the non-blocking guards for the lifetime of main so logs flush on exit.
    let _log_guards = init_logging(env_filter, cli.log_file.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Generate {
            overwrite_existing_key,
        } => generate(&load_config(&cli)?, *overwrite_existing_key),
        Command::Service => run_service(&load_config(&cli)?).await,
        Command::Backup => backup(&load_config(&cli)?).await,
        Command::Audit { user } => audit(&load_config(&cli)?, user.as_deref()).await,
        Command::AddMember { team, identity } => {
            let root = fs::default_root();
            fs::add_member(&root, team, identity)?;
            println!("Added {identity} to {team} under {}", root.display());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CaConfig> {
    let path = cli.config_path();
    CaConfig::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

/// The directory channel, speaking as the CA bot.
fn bot_channel(config: &CaConfig) -> Arc<dyn Channel> {
    Arc::new(FsChannel::new(fs::default_root(), config.bot_name.clone()))
}

// ── Commands ────────────────────────────────────────────────────────

fn generate(config: &CaConfig, overwrite: bool) -> anyhow::Result<()> {
    let key = kssh_ca::ca::generate(config, overwrite)?;
    println!("{}", key.public_key_openssh()?);
    eprintln!(
        "Wrote the CA key to {}. Point TrustedUserCAKeys at the public key above on every host.",
        config.ca_key_location.display()
    );
    Ok(())
}

async fn run_service(config: &CaConfig) -> anyhow::Result<()> {
    let (service, _ledger) = kssh_ca::build_service(config, bot_channel(config))?;

    let cancel = CancellationToken::new();
    let handle = service.start(cancel.clone()).await?;
    tracing::info!(teams = ?handle.published_teams(), "Ready.");

    shutdown_signal().await?;
    tracing::info!("Shutting down...");
    cancel.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.join()).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!("Shutdown timed out after {:?}; forcing exit", SHUTDOWN_TIMEOUT),
    }
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

async fn backup(config: &CaConfig) -> anyhow::Result<()> {
    // Check before asking, so nobody confirms an export of nothing.
    if !kssh_ca::ca::is_initialized(config) {
        return Err(CaError::KeyNotInitialized(config.ca_key_location.clone()).into());
    }
    eprintln!(
        "This prints the CA private key. Anyone holding it can sign certificates for every team this CA serves."
    );
    eprintln!("Type 'yes' to continue:");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let answer = lines.next_line().await?.unwrap_or_default();
    if answer.trim() != "yes" {
        anyhow::bail!("Aborted; the CA key was not exported.");
    }

    let ledger = kssh_ca::open_ledger(config, bot_channel(config));
    let operator = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let key = kssh_ca::backup::export_ca_key(config, &ledger, &operator).await?;
    print!("{}", key.as_str());
    Ok(())
}

async fn audit(config: &CaConfig, user: Option<&str>) -> anyhow::Result<()> {
    let ledger = kssh_ca::open_ledger(config, bot_channel(config));
    for line in ledger.read_lines().await? {
        if let Some(user) = user {
            match &line {
                AuditLine::Signed(entry) if entry.requester == user => {}
                _ => continue,
            }
        }
        println!("{line}");
    }
    Ok(())
}

// ── Logging ─────────────────────────────────────────────────────────

fn init_logging(
    env_filter: tracing_subscriber::EnvFilter,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Vec<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    // Non-blocking stderr so a service whose stderr nobody reads never stalls.
    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(nb_stderr);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (nb_file, file_guard) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(nb_file);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();

        Ok(vec![stderr_guard, file_guard])
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();

        Ok(vec![stderr_guard])
    }
}
