//! Per-client protocol state and the trust policy applied to it.

use crate::hashing::GENESIS_HASH;
use crate::verifier::VerificationResult;
use serde::{Deserialize, Serialize};

/// Trust assigned at first contact.
pub const INITIAL_TRUST: u32 = 50;
/// Upper bound of the trust score.
pub const MAX_TRUST: u32 = 100;
/// Reward for a fully valid response.
pub const SUCCESS_REWARD: u32 = 5;
/// Base penalty for any invalid response.
pub const FAILURE_PENALTY: u32 = 20;
/// Additional penalty when the client version disagrees with the manifest.
pub const VERSION_PENALTY: u32 = 30;
/// Additional penalty when shader outputs disagree with recomputation.
pub const SHADER_PENALTY: u32 = 50;

/// Server-side record for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    /// Client or session identifier.
    pub client_id: String,
    /// Version the client last announced.
    pub version: String,
    /// Head of the client's chain as last seen by the verifier.
    pub last_chain_hash: String,
    /// Number of links accepted into the record.
    pub chain_length: u64,
    /// Accumulated work units (work-proof iterations) across responses.
    pub total_work_completed: u64,
    /// Time of the last completed verification, if any.
    pub last_verified_at: Option<u64>,
    /// Bounded trust score in `[0, MAX_TRUST]`.
    pub trust_score: u32,
}

impl ClientState {
    /// Fresh record anchored at genesis with [`INITIAL_TRUST`].
    pub fn new(client_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_trust(client_id, version, INITIAL_TRUST)
    }

    /// Fresh record with an explicit starting trust (clamped to [`MAX_TRUST`]).
    pub fn with_trust(
        client_id: impl Into<String>,
        version: impl Into<String>,
        trust_score: u32,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            version: version.into(),
            last_chain_hash: GENESIS_HASH.to_string(),
            chain_length: 0,
            total_work_completed: 0,
            last_verified_at: None,
            trust_score: trust_score.min(MAX_TRUST),
        }
    }

    /// Applies the trust adjustment for one verification outcome.
    ///
    /// The base step is `+SUCCESS_REWARD` or `-FAILURE_PENALTY`; version and
    /// shader mismatches each add their own surcharge on top. The score is
    /// clamped to `[0, MAX_TRUST]` after every step.
    pub fn apply_verdict(&mut self, result: &VerificationResult) {
        let mut score = if result.valid {
            (self.trust_score + SUCCESS_REWARD).min(MAX_TRUST)
        } else {
            self.trust_score.saturating_sub(FAILURE_PENALTY)
        };
        if !result.version_match {
            score = score.saturating_sub(VERSION_PENALTY);
        }
        if !result.shader_outputs_match {
            score = score.saturating_sub(SHADER_PENALTY);
        }
        self.trust_score = score;
    }

    /// Compact view reported to the client.
    pub fn summary(&self) -> ClientStateSummary {
        ClientStateSummary {
            trust_score: self.trust_score,
            chain_length: self.chain_length,
            total_work_completed: self.total_work_completed,
        }
    }
}

/// Client-visible subset of [`ClientState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStateSummary {
    /// Current trust score.
    pub trust_score: u32,
    /// Accepted chain length.
    pub chain_length: u64,
    /// Accumulated work units.
    pub total_work_completed: u64,
}
