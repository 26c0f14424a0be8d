//! Wire messages exchanged between a client and its server-side session.
//!
//! Every frame is a JSON object `{"type": ..., "payload": ...}`. Field names
//! inside payloads are camelCase and load-bearing for interoperability.

use crate::chain::StateChainLink;
use crate::challenge::DrmChallenge;
use crate::solver::DrmResponse;
use crate::state::ClientStateSummary;
use crate::verifier::VerificationResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Opens the session and announces the client version.
    Init(InitRequest),
    /// Asks for a fresh challenge of the given work type.
    ChallengeRequest(ChallengeRequest),
    /// Answers an outstanding challenge.
    Response(DrmResponse),
    /// Requests a gated resource.
    ResourceRequest(ResourceRequest),
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Reply to `init`.
    InitAck(InitAck),
    /// A new challenge.
    Challenge(DrmChallenge),
    /// Outcome of verifying a response.
    VerifyResult(VerifyResultMessage),
    /// Outcome of a resource request.
    ResourceResponse(ResourceResponse),
    /// The message could not be processed.
    Error(ErrorMessage),
}

/// `init` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    /// Version the client runs.
    pub client_version: String,
}

/// `challenge-request` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    /// Work type name.
    pub work_type: String,
}

/// `init-ack` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitAck {
    /// Manifest version of the server build.
    pub server_version: String,
    /// Whether the announced client version matches.
    pub version_match: bool,
    /// Current record for the session.
    pub client_state: ClientStateSummary,
    /// First challenge, issued only when versions match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_challenge: Option<DrmChallenge>,
}

/// `verify-result` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResultMessage {
    /// Flags and errors of the verification.
    #[serde(flatten)]
    pub result: VerificationResult,
    /// Record after the trust update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_state: Option<ClientStateSummary>,
    /// Access token issued after a valid response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// `resource-request` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    /// Requested resource.
    pub resource_id: String,
    /// Token from the last valid verification.
    pub access_token: String,
    /// Most recent links of the client chain.
    #[serde(default)]
    pub state_proof: Vec<StateChainLink>,
}

/// `resource-response` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResponse {
    /// Whether access was granted.
    pub granted: bool,
    /// Granted resource id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Resource payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Denial reason with a hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Expiry of the token that authorised the grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<u64>,
}

impl ResourceResponse {
    /// Denial carrying `error`.
    pub fn denied(error: impl Into<String>) -> Self {
        Self {
            granted: false,
            resource_id: None,
            data: None,
            error: Some(error.into()),
            valid_until: None,
        }
    }
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Human-readable reason.
    pub error: String,
}
