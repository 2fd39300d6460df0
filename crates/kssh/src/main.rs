mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kssh_channel::fs::FsChannel;
use kssh_channel::Channel;
use kssh_client::cache::CachedCredential;
use kssh_client::lock::DEFAULT_LOCK_TIMEOUT;
use kssh_client::provision::{ProvisioningAdapter, SshAddAgent};
use kssh_client::{local_config, CaRequester, CertificateCache, ClientError, ClientPaths, TeamConfigResolver};

use cli::Cli;

/// Exit status when kssh fails for a reason that is not a [`ClientError`].
const GENERIC_FAILURE: u8 = 1;

fn main() -> ExitCode {
    let (own_args, ssh_args) = cli::split_args(std::env::args_os());
    let cli = Cli::parse_from(own_args);

    let level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    // Hold the non-blocking guards for the lifetime of main so logs flush on exit.
    let _log_guards = match init_logging(env_filter, cli.log_file.as_deref()) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("kssh: {e:#}");
            return ExitCode::from(GENERIC_FAILURE);
        }
    };

    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|rt| rt.block_on(async_main(cli, ssh_args)));

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("kssh: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Distinct exit status per client failure kind.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ClientError>()
        .and_then(|e| u8::try_from(e.exit_code()).ok())
        .unwrap_or(GENERIC_FAILURE)
}

async fn async_main(cli: Cli, ssh_args: Vec<std::ffi::OsString>) -> anyhow::Result<u8> {
    let paths = ClientPaths::from_env();

    // ── Local config commands (no CA traffic) ───────────────────────
    if cli.clear_default_team {
        local_config::clear_default_team(&paths, DEFAULT_LOCK_TIMEOUT).await?;
        eprintln!("Cleared the default team.");
        return Ok(0);
    }
    if let Some(team) = &cli.set_default_team {
        local_config::set_default_team(&paths, team, DEFAULT_LOCK_TIMEOUT).await?;
        eprintln!("Set default team to {team}.");
        return Ok(0);
    }

    // ── Resolve the team and obtain a credential ────────────────────
    let channel: Arc<dyn Channel> = Arc::new(FsChannel::from_env().map_err(ClientError::from)?);
    let default_team = local_config::default_team(&paths, DEFAULT_LOCK_TIMEOUT).await?;
    let config = TeamConfigResolver::new(channel.as_ref())
        .resolve(cli.team.as_deref(), default_team.as_deref())
        .await?;

    let requester = CaRequester::new(channel.clone()).with_timeout(Duration::from_secs(cli.timeout));
    let cache = CertificateCache::new(paths, requester);

    if cli.provision {
        let credential = ProvisioningAdapter::new(&cache, SshAddAgent::default())
            .provision(&config)
            .await?;
        eprintln!(
            "Provisioned a certificate for {} into ssh-agent; it expires at unix time {}.",
            credential.team, credential.valid_before
        );
        return Ok(0);
    }

    let credential = cache.ensure(&config).await?;
    run_ssh(&cli.ssh, &credential, ssh_args).await
}

/// Run ssh with the cached key and certificate and return its exit status.
async fn run_ssh(
    program: &std::path::Path,
    credential: &CachedCredential,
    ssh_args: Vec<std::ffi::OsString>,
) -> anyhow::Result<u8> {
    let mut certificate_file = std::ffi::OsString::from("CertificateFile=");
    certificate_file.push(credential.paths.certificate());

    tracing::debug!(program = %program.display(), team = %credential.team, "Running ssh");
    let status = tokio::process::Command::new(program)
        .arg("-i")
        .arg(credential.paths.private_key())
        .arg("-o")
        .arg(certificate_file)
        .args(ssh_args)
        .status()
        .await
        .map_err(|e| anyhow::anyhow!("failed to run {}: {e}", program.display()))?;

    // A signal-terminated ssh has no code; report it as a plain failure.
    Ok(status
        .code()
        .and_then(|c| u8::try_from(c).ok())
        .unwrap_or(GENERIC_FAILURE))
}

// ── Logging ─────────────────────────────────────────────────────────

fn init_logging(
    env_filter: tracing_subscriber::EnvFilter,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Vec<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    // ssh owns the terminal once it starts, so keep diagnostics off stdout.
    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(nb_stderr);

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
