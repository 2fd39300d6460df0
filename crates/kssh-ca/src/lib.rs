//! Kssh CA: the SSH certificate authority behind a team channel.
//!
//! Serves every configured team: publishes a client config into each,
//! authorizes requesters by team membership, signs short-lived user
//! certificates with the CA key, and records every signature in an
//! append-only ledger.

pub mod audit;
pub mod backup;
pub mod ca;
pub mod config;
pub mod engine;
pub mod error;
pub mod policy;
pub mod service;
pub mod teamconfig;

use std::sync::Arc;

use kssh_channel::Channel;

use audit::{AuditLedger, AuditSink};
use config::CaConfig;
use engine::SigningEngine;
use policy::AuthorizationPolicy;
use service::CaService;

pub use error::CaError;

/// Open the ledger the config points at: the local `audit_file` when set,
/// otherwise the `audit_object` inside `audit_team`.
pub fn open_ledger(config: &CaConfig, channel: Arc<dyn Channel>) -> AuditLedger {
    let sink = match &config.audit_file {
        Some(path) => AuditSink::File(path.clone()),
        None => AuditSink::Channel {
            channel,
            team: config.audit_team().to_string(),
            object: config.audit_object.clone(),
        },
    };
    tracing::debug!(sink = ?sink, "Audit ledger opened");
    AuditLedger::new(sink)
}

/// Assemble a service from config. The channel must speak as `bot_name`.
pub fn build_service(
    config: &CaConfig,
    channel: Arc<dyn Channel>,
) -> Result<(CaService, Arc<AuditLedger>), CaError> {
    if channel.identity() != config.bot_name {
        return Err(CaError::Config(format!(
            "channel identity {} does not match bot_name {}",
            channel.identity(),
            config.bot_name
        )));
    }

    let ca_key = ca::load(config)?;
    let ledger = Arc::new(open_ledger(config, channel.clone()));
    let engine = Arc::new(SigningEngine::new(
        ca_key,
        AuthorizationPolicy::from_config(config),
        config.max_validity_secs()?,
        ledger.clone(),
        channel.clone(),
    ));
    Ok((CaService::new(channel, engine, config.address()), ledger))
}
