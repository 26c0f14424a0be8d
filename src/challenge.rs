//! Server-side challenge generation.
//!
//! A challenge binds a fresh random id, the client's current chain head and a
//! deterministic shader selection. Each seed is derived as
//! `sha256(lastChainHash + shaderId + challengeId)`, so a seed can be neither
//! reused across challenges nor replayed against a stale chain position.
//! Generating a challenge never touches [`ClientState`].

use crate::hashing::{now_millis, random_token, sha256_hex};
use crate::shader::ShaderId;
use crate::state::ClientState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Validity window of a challenge.
pub const CHALLENGE_TTL_MS: u64 = 60_000;

const MAX_DIFFICULTY: u32 = 5;
const TRUST_PER_DIFFICULTY_STEP: u32 = 20;

/// Kind of work a challenge asks for; selects the required shaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkType {
    /// `version_proof` then `hash_compute`.
    ShaderVerify,
    /// `folding_energy` then `version_proof`.
    FoldingChain,
    /// `entropy`, `hash_compute`, then `version_proof`.
    EntropyChain,
    /// Any other name; falls back to `version_proof` alone.
    Other(String),
}

impl WorkType {
    /// Parses a wire name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "shader_verify" => WorkType::ShaderVerify,
            "folding_chain" => WorkType::FoldingChain,
            "entropy_chain" => WorkType::EntropyChain,
            other => WorkType::Other(other.to_string()),
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &str {
        match self {
            WorkType::ShaderVerify => "shader_verify",
            WorkType::FoldingChain => "folding_chain",
            WorkType::EntropyChain => "entropy_chain",
            WorkType::Other(name) => name,
        }
    }

    /// Shaders required by this work type, in execution order.
    pub fn required_shaders(&self) -> Vec<ShaderId> {
        match self {
            WorkType::ShaderVerify => vec![ShaderId::VersionProof, ShaderId::HashCompute],
            WorkType::FoldingChain => vec![ShaderId::FoldingEnergy, ShaderId::VersionProof],
            WorkType::EntropyChain => vec![
                ShaderId::Entropy,
                ShaderId::HashCompute,
                ShaderId::VersionProof,
            ],
            WorkType::Other(_) => vec![ShaderId::VersionProof],
        }
    }
}

/// A challenge issued to one client.
///
/// On the wire `inputSeeds` is an explicit list of `{key, value}` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrmChallenge {
    /// Fresh random token identifying the challenge.
    pub challenge_id: String,
    /// Shaders the client must execute, in order.
    pub required_shaders: Vec<String>,
    /// Seed per required shader.
    #[serde(with = "seed_list")]
    pub input_seeds: BTreeMap<String, String>,
    /// Client chain head the response must extend.
    pub previous_chain_hash: String,
    /// Required leading zero characters in the work result.
    pub difficulty: u32,
    /// Expiry in milliseconds since the Unix epoch.
    pub expires_at: u64,
    /// Work type name the shaders were selected from.
    pub work_type: String,
}

impl DrmChallenge {
    /// Returns `true` once `now` is past the expiry.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires_at
    }

    /// Returns `true` if the challenge has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Seed for a required shader.
    pub fn seed_for(&self, shader_id: &str) -> Option<&str> {
        self.input_seeds.get(shader_id).map(String::as_str)
    }
}

mod seed_list {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct SeedEntry {
        key: String,
        value: String,
    }

    pub fn serialize<S: Serializer>(
        seeds: &BTreeMap<String, String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        seeds
            .iter()
            .map(|(key, value)| SeedEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, String>, D::Error> {
        let entries = Vec::<SeedEntry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect())
    }
}

/// Required leading zeros for a trust score: `max(1, 5 - floor(trust / 20))`.
pub fn difficulty_for_trust(trust_score: u32) -> u32 {
    MAX_DIFFICULTY
        .saturating_sub(trust_score / TRUST_PER_DIFFICULTY_STEP)
        .max(1)
}

/// Derives the seed of `shader_id` for a challenge.
pub fn derive_seed(last_chain_hash: &str, shader_id: &str, challenge_id: &str) -> String {
    sha256_hex(&format!("{last_chain_hash}{shader_id}{challenge_id}"))
}

/// Issues challenges; holds no per-client state.
#[derive(Debug, Clone)]
pub struct ChallengeGenerator {
    ttl_ms: u64,
}

impl Default for ChallengeGenerator {
    fn default() -> Self {
        Self::new(CHALLENGE_TTL_MS)
    }
}

impl ChallengeGenerator {
    /// Generator whose challenges live for `ttl_ms`.
    pub fn new(ttl_ms: u64) -> Self {
        Self { ttl_ms }
    }

    /// Issues a challenge for `state` at the current time.
    pub fn generate(&self, state: &ClientState, work_type: &str) -> DrmChallenge {
        self.generate_at(state, work_type, now_millis())
    }

    /// Issues a challenge for `state` as of `now`.
    pub fn generate_at(&self, state: &ClientState, work_type: &str, now: u64) -> DrmChallenge {
        let challenge_id = random_token();
        let work_type = WorkType::from_name(work_type);
        let shaders = work_type.required_shaders();
        let input_seeds = shaders
            .iter()
            .map(|id| {
                let seed = derive_seed(&state.last_chain_hash, id.as_str(), &challenge_id);
                (id.as_str().to_string(), seed)
            })
            .collect();
        let challenge = DrmChallenge {
            challenge_id,
            required_shaders: shaders.iter().map(|id| id.as_str().to_string()).collect(),
            input_seeds,
            previous_chain_hash: state.last_chain_hash.clone(),
            difficulty: difficulty_for_trust(state.trust_score),
            expires_at: now.saturating_add(self.ttl_ms),
            work_type: work_type.as_str().to_string(),
        };
        debug!(
            client = %state.client_id,
            challenge = %challenge.challenge_id,
            work_type = %challenge.work_type,
            difficulty = challenge.difficulty,
            "issued challenge"
        );
        challenge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::GENESIS_HASH;
    use proptest::prelude::*;

    #[test]
    fn difficulty_tracks_trust() {
        assert_eq!(difficulty_for_trust(0), 5);
        assert_eq!(difficulty_for_trust(19), 5);
        assert_eq!(difficulty_for_trust(20), 4);
        assert_eq!(difficulty_for_trust(50), 3);
        assert_eq!(difficulty_for_trust(79), 2);
        assert_eq!(difficulty_for_trust(80), 1);
        assert_eq!(difficulty_for_trust(100), 1);
    }

    #[test]
    fn work_types_select_shaders() {
        assert_eq!(
            WorkType::from_name("shader_verify").required_shaders(),
            vec![ShaderId::VersionProof, ShaderId::HashCompute]
        );
        assert_eq!(
            WorkType::from_name("folding_chain").required_shaders(),
            vec![ShaderId::FoldingEnergy, ShaderId::VersionProof]
        );
        assert_eq!(
            WorkType::from_name("entropy_chain").required_shaders(),
            vec![ShaderId::Entropy, ShaderId::HashCompute, ShaderId::VersionProof]
        );
        assert_eq!(
            WorkType::from_name("mystery").required_shaders(),
            vec![ShaderId::VersionProof]
        );
    }

    #[test]
    fn challenge_reflects_client_state() {
        let state = ClientState::new("client", "1.0.0");
        let challenge = ChallengeGenerator::default().generate_at(&state, "shader_verify", 1_000);
        assert_eq!(challenge.difficulty, 3);
        assert_eq!(challenge.expires_at, 61_000);
        assert_eq!(challenge.previous_chain_hash, GENESIS_HASH);
        assert_eq!(challenge.work_type, "shader_verify");
        assert_eq!(challenge.required_shaders, vec!["version_proof", "hash_compute"]);
        for shader in &challenge.required_shaders {
            assert_eq!(
                challenge.seed_for(shader),
                Some(derive_seed(GENESIS_HASH, shader, &challenge.challenge_id).as_str())
            );
        }
    }

    #[test]
    fn unknown_work_type_keeps_its_name() {
        let state = ClientState::new("client", "1.0.0");
        let challenge = ChallengeGenerator::default().generate_at(&state, "mystery", 0);
        assert_eq!(challenge.work_type, "mystery");
        assert_eq!(challenge.required_shaders, vec!["version_proof"]);
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let state = ClientState::new("client", "1.0.0");
        let challenge = ChallengeGenerator::new(10).generate_at(&state, "shader_verify", 100);
        assert!(!challenge.is_expired_at(110));
        assert!(challenge.is_expired_at(111));
    }

    #[test]
    fn seeds_serialize_as_key_value_list() {
        let state = ClientState::new("client", "1.0.0");
        let challenge = ChallengeGenerator::default().generate_at(&state, "shader_verify", 0);
        let value = serde_json::to_value(&challenge).unwrap();
        let seeds = value["inputSeeds"].as_array().unwrap();
        assert_eq!(seeds.len(), 2);
        assert!(seeds[0].get("key").is_some());
        assert!(seeds[0].get("value").is_some());
        let parsed: DrmChallenge = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, challenge);
    }

    proptest! {
        #[test]
        fn distinct_challenges_never_share_seeds(
            head in "[0-9a-f]{64}",
            id_a in "[0-9a-f]{32}",
            id_b in "[0-9a-f]{32}",
        ) {
            prop_assume!(id_a != id_b);
            for shader in ShaderId::ALL {
                prop_assert_ne!(
                    derive_seed(&head, shader.as_str(), &id_a),
                    derive_seed(&head, shader.as_str(), &id_b)
                );
            }
        }
    }

    #[test]
    fn same_state_yields_fresh_seeds() {
        let state = ClientState::new("client", "1.0.0");
        let generator = ChallengeGenerator::default();
        let a = generator.generate_at(&state, "shader_verify", 0);
        let b = generator.generate_at(&state, "shader_verify", 0);
        assert_ne!(a.challenge_id, b.challenge_id);
        assert_ne!(a.seed_for("version_proof"), b.seed_for("version_proof"));
    }
}
