//! CA service loop.
//!
//! Watches the routing channel of every served team, hands each signature
//! request to the [`SigningEngine`] on its own task, and replies on the
//! team and channel the request arrived on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kssh_channel::Channel;
use kssh_common::protocol::WireMessage;
use kssh_common::types::CaAddress;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::engine::SigningEngine;
use crate::error::CaError;
use crate::teamconfig;

/// Default interval between channel polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct CaService {
    channel: Arc<dyn Channel>,
    engine: Arc<SigningEngine>,
    address: CaAddress,
    poll_interval: Duration,
}

/// A started service. Configs are published by the time this exists.
pub struct ServiceHandle {
    published: Vec<String>,
    task: JoinHandle<Result<(), CaError>>,
}

impl ServiceHandle {
    /// Teams a client config was published into.
    pub fn published_teams(&self) -> &[String] {
        &self.published
    }

    /// Wait for the loop to stop (after cancellation) and configs to be
    /// withdrawn.
    pub async fn join(self) -> Result<(), CaError> {
        self.task
            .await
            .map_err(|e| CaError::Internal(format!("service task failed: {e}")))?
    }
}

impl CaService {
    pub fn new(channel: Arc<dyn Channel>, engine: Arc<SigningEngine>, address: CaAddress) -> Self {
        Self {
            channel,
            engine,
            address,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Publish client configs and start serving.
    ///
    /// Channel positions are captured before publication, so any request
    /// sent by a client that has read a published config is seen.
    pub async fn start(self, cancel: CancellationToken) -> Result<ServiceHandle, CaError> {
        let topic = &self.address.channel_name;
        let mut cursors = HashMap::new();
        for team in self.engine.policy().teams() {
            let head = self.channel.head(team, topic).await?;
            cursors.insert(team.to_string(), head);
        }

        let ca_public_key = self.engine.ca_public_key_openssh()?;
        let published = teamconfig::publish(
            self.channel.as_ref(),
            self.engine.policy(),
            &self.address,
            &ca_public_key,
        )
        .await?;

        tracing::info!(
            ca = %self.address,
            teams = published.len(),
            "CA service started"
        );

        let withdraw_teams = published.clone();
        let task = tokio::spawn(async move {
            let result = self.serve(cursors, cancel).await;
            teamconfig::withdraw(self.channel.as_ref(), &withdraw_teams).await;
            tracing::info!("CA service stopped");
            result
        });

        Ok(ServiceHandle { published, task })
    }

    async fn serve(
        &self,
        mut cursors: HashMap<String, u64>,
        cancel: CancellationToken,
    ) -> Result<(), CaError> {
        let mut in_flight = JoinSet::new();
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for (team, cursor) in cursors.iter_mut() {
                        if let Err(e) = self.poll_team(team, cursor, &mut in_flight).await {
                            tracing::warn!(team = %team, error = %e, "Channel poll failed");
                        }
                    }
                    while let Some(done) = in_flight.try_join_next() {
                        if let Err(e) = done {
                            tracing::error!(error = %e, "Request task panicked");
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("Service loop cancelled");
                    break;
                }
            }
        }

        // Let in-flight requests finish so every signed certificate is
        // both audited and delivered.
        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                tracing::error!(error = %e, "Request task panicked");
            }
        }
        Ok(())
    }

    async fn poll_team(
        &self,
        team: &str,
        cursor: &mut u64,
        in_flight: &mut JoinSet<()>,
    ) -> Result<(), CaError> {
        let topic = &self.address.channel_name;
        let messages = self.channel.read(team, topic, *cursor).await?;

        for message in messages {
            *cursor = (*cursor).max(message.seq);
            if message.sender == self.channel.identity() {
                continue;
            }

            let request = match WireMessage::from_bytes(&message.body) {
                Ok(WireMessage::SignatureRequest(request)) => request,
                Ok(WireMessage::SignatureResponse(_)) => continue,
                Err(e) => {
                    tracing::debug!(team, sender = %message.sender, error = %e, "Ignoring malformed message");
                    continue;
                }
            };

            tracing::debug!(
                team,
                sender = %message.sender,
                id = %kssh_common::id::short(&request.correlation_id),
                "Signature request received"
            );

            let engine = self.engine.clone();
            let channel = self.channel.clone();
            let team = team.to_string();
            let topic = topic.clone();
            in_flight.spawn(async move {
                let response = engine.handle(&message.sender, &request).await;
                let body = match WireMessage::SignatureResponse(response).to_bytes() {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode response");
                        return;
                    }
                };
                if let Err(e) = channel.deliver(&team, &topic, body).await {
                    tracing::warn!(team = %team, error = %e, "Failed to deliver response");
                }
            });
        }
        Ok(())
    }
}
