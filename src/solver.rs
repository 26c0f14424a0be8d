//! Client-side challenge solving.
//!
//! For every required shader the solver burns `10^difficulty` hash
//! iterations as a work proof, then appends the shader's execution to its
//! local [`StateChain`]. It finally searches for a nonce such that
//! `sha256(chainHead + nonce)` carries `difficulty` leading zeros and signs
//! the result.
//!
//! Both loops are CPU-bound with no built-in timeout. Hosts should run
//! [`ClientSolver::solve_challenge`] off any latency-sensitive thread.

use crate::chain::{StateChain, StateChainLink};
use crate::challenge::DrmChallenge;
use crate::error::SolveError;
use crate::hashing::{has_leading_zeros, now_millis, sha256_hex, HASH_HEX_LEN};
use crate::shader::{ShaderId, ShaderRegistry};
use crate::verifier::work_units;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Answer to exactly one [`DrmChallenge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrmResponse {
    /// Challenge being answered.
    pub challenge_id: String,
    /// Version the client runs.
    pub client_version: String,
    /// Links appended while solving this challenge only.
    pub state_chain: Vec<StateChainLink>,
    /// Proof-of-work digest.
    pub work_result: String,
    /// Nonce that produced `work_result`.
    pub nonce: u64,
    /// Hash of client id, work result and signing time.
    pub client_signature: String,
}

/// Iterates `sha256(proof + shader_id)` `10^difficulty` times starting from `seed`.
pub fn compute_work_proof(shader_id: &str, seed: &str, difficulty: u32) -> String {
    let mut proof = seed.to_string();
    for _ in 0..work_units(difficulty, 1) {
        proof = sha256_hex(&format!("{proof}{shader_id}"));
    }
    proof
}

/// Finds the smallest nonce whose `sha256(data + nonce)` has `difficulty` leading zeros.
pub fn find_nonce(data: &str, difficulty: u32) -> (u64, String) {
    let mut nonce = 0u64;
    loop {
        let result = sha256_hex(&format!("{data}{nonce}"));
        if has_leading_zeros(&result, difficulty) {
            return (nonce, result);
        }
        nonce += 1;
    }
}

/// Executes challenges and owns the client's state chain.
#[derive(Debug, Clone)]
pub struct ClientSolver {
    client_id: String,
    version: String,
    registry: ShaderRegistry,
    chain: StateChain,
}

impl ClientSolver {
    /// Solver with an empty chain.
    pub fn new(
        client_id: impl Into<String>,
        version: impl Into<String>,
        registry: ShaderRegistry,
    ) -> Self {
        let version = version.into();
        Self {
            client_id: client_id.into(),
            chain: StateChain::new(version.clone()),
            version,
            registry,
        }
    }

    /// Solver resuming a previously exported chain.
    pub fn with_chain(client_id: impl Into<String>, registry: ShaderRegistry, chain: StateChain) -> Self {
        Self {
            client_id: client_id.into(),
            version: chain.version().to_string(),
            registry,
            chain,
        }
    }

    /// Client identifier used in signatures.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Version reported in responses.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The local chain.
    pub fn chain(&self) -> &StateChain {
        &self.chain
    }

    /// Replaces the local chain, e.g. to roll back links the server never accepted.
    pub fn reset_chain(&mut self, chain: StateChain) {
        self.chain = chain;
    }

    /// Solves `challenge`, extending the local chain.
    ///
    /// The difficulty and every required shader are checked before any work
    /// starts, so an unsatisfiable challenge leaves the chain untouched.
    pub fn solve_challenge(&mut self, challenge: &DrmChallenge) -> Result<DrmResponse, SolveError> {
        let max = HASH_HEX_LEN as u32;
        if challenge.difficulty > max {
            return Err(SolveError::DifficultyTooHigh {
                difficulty: challenge.difficulty,
                max,
            });
        }
        let mut plan = Vec::with_capacity(challenge.required_shaders.len());
        for shader in &challenge.required_shaders {
            if shader.parse::<ShaderId>().is_err() {
                return Err(SolveError::MissingSeed(shader.clone()));
            }
            let seed = challenge
                .seed_for(shader)
                .ok_or_else(|| SolveError::MissingSeed(shader.clone()))?;
            plan.push((shader.as_str(), seed));
        }

        let mut links = Vec::with_capacity(plan.len());
        for (shader, seed) in plan {
            let work_proof = compute_work_proof(shader, seed, challenge.difficulty);
            let link = self
                .chain
                .add_link(&self.registry, shader, seed, &work_proof)
                .map_err(|_| SolveError::MissingSeed(shader.to_string()))?;
            links.push(link);
        }

        let (nonce, work_result) = find_nonce(self.chain.chain_hash(), challenge.difficulty);
        debug!(
            challenge = %challenge.challenge_id,
            links = links.len(),
            nonce,
            "solved challenge"
        );
        Ok(DrmResponse {
            challenge_id: challenge.challenge_id.clone(),
            client_version: self.version.clone(),
            state_chain: links,
            client_signature: self.sign(&work_result),
            work_result,
            nonce,
        })
    }

    fn sign(&self, work_result: &str) -> String {
        sha256_hex(&format!("{}{}{}", self.client_id, work_result, now_millis()))
    }
}
