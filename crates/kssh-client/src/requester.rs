//! Correlated signing round trip to a team's CA.
//!
//! The request is posted on the CA's routing channel inside the resolved
//! team. Replies are read back from the same channel; only messages the
//! channel attributes to the CA bot are considered, and each is matched to
//! its request through the pending-request table. A request that is not
//! answered before the deadline is cancelled, so a late reply is dropped.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use kssh_channel::correlator::Correlator;
use kssh_channel::Channel;
use kssh_common::protocol::{SignatureOutcome, SignatureRequest, SignatureResponse, WireMessage};
use kssh_common::types::TeamConfig;

use crate::error::{ClientError, Result};

/// Default bound on a signing round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct CaRequester {
    channel: Arc<dyn Channel>,
    pending: Correlator<SignatureResponse>,
    timeout: Duration,
    poll_interval: Duration,
}

impl CaRequester {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            pending: Correlator::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn identity(&self) -> &str {
        self.channel.identity()
    }

    /// Ask the CA behind `config` to certify `public_key`. Returns the
    /// certificate in OpenSSH form.
    pub async fn request_signature(
        &self,
        config: &TeamConfig,
        public_key: String,
        principals: BTreeSet<String>,
        validity_secs: u64,
    ) -> Result<String> {
        let request = SignatureRequest {
            correlation_id: kssh_common::id::generate_correlation_id(),
            requester: self.channel.identity().to_string(),
            public_key,
            principals,
            validity_secs,
            team: config.team.clone(),
        };
        let id = request.correlation_id.clone();
        let topic = &config.ca.channel_name;

        // Position first, so a fast reply cannot land before our cursor.
        let mut cursor = self.channel.head(&config.team, topic).await?;
        let body = WireMessage::SignatureRequest(request)
            .to_bytes()
            .map_err(|e| ClientError::Internal(format!("encode request: {e}")))?;

        let mut rx = self.pending.register(&id);
        if let Err(e) = self.channel.deliver(&config.team, topic, body).await {
            self.pending.cancel(&id);
            return Err(e.into());
        }
        tracing::debug!(
            team = %config.team,
            ca = %config.ca,
            id = %kssh_common::id::short(&id),
            "Signature request sent"
        );

        let wait = async {
            loop {
                tokio::select! {
                    response = &mut rx => {
                        return response.map_err(|_| {
                            ClientError::Internal("pending request dropped".to_string())
                        });
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {
                        // A failed read leaves the cursor where it was; the
                        // next poll retries it until the deadline.
                        if let Err(e) = self.pump(config, &mut cursor).await {
                            tracing::debug!(error = %e, "Reading the CA channel failed; retrying");
                        }
                    }
                }
            }
        };

        let response = match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                self.pending.cancel(&id);
                tracing::warn!(team = %config.team, id = %kssh_common::id::short(&id), "Signature request timed out");
                return Err(ClientError::RequestTimeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.pending.cancel(&id);
                return Err(e);
            }
        };

        match response.outcome {
            SignatureOutcome::Signed { certificate } => Ok(certificate),
            SignatureOutcome::Denied { code, message } => {
                tracing::warn!(team = %config.team, code = %code, message = %message, "CA denied the request");
                Err(ClientError::from_denial(&config.team, code, message))
            }
        }
    }

    /// Read new messages from the routing channel and complete any pending
    /// request they answer.
    async fn pump(&self, config: &TeamConfig, cursor: &mut u64) -> Result<()> {
        let messages = self
            .channel
            .read(&config.team, &config.ca.channel_name, *cursor)
            .await?;
        for message in messages {
            *cursor = (*cursor).max(message.seq);
            if message.sender != config.ca.bot_name {
                continue;
            }
            match WireMessage::from_bytes(&message.body) {
                Ok(WireMessage::SignatureResponse(response)) => {
                    let id = response.correlation_id.clone();
                    if !self.pending.complete(&id, response) {
                        tracing::trace!(id = %kssh_common::id::short(&id), "Response for another request");
                    }
                }
                Ok(WireMessage::SignatureRequest(_)) => {}
                Err(e) => tracing::debug!(error = %e, "Ignoring malformed message from CA"),
            }
        }
        Ok(())
    }
}
