//! Wire types carried as channel message bodies.
//!
//! Every message is a JSON [`WireMessage`] tagged by `type`. Requests and
//! responses are paired by `correlation_id`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Client request for a signed certificate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureRequest {
    pub correlation_id: String,
    /// Self-declared requester; the CA checks it against the channel sender.
    pub requester: String,
    /// Public key to certify, OpenSSH format.
    pub public_key: String,
    /// Principals the client expects. Informational: the CA signs its grant set.
    #[serde(default)]
    pub principals: BTreeSet<String>,
    pub validity_secs: u64,
    /// Team whose config routed this request.
    pub team: String,
}

/// Result of a signing attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignatureOutcome {
    Signed { certificate: String },
    Denied { code: ErrorCode, message: String },
}

/// CA reply to a [`SignatureRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureResponse {
    pub correlation_id: String,
    pub outcome: SignatureOutcome,
}

/// Envelope for everything sent over a team channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    SignatureRequest(SignatureRequest),
    SignatureResponse(SignatureResponse),
}

impl WireMessage {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::SignatureRequest(r) => &r.correlation_id,
            Self::SignatureResponse(r) => &r.correlation_id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
