//! Response verification and trust bookkeeping.
//!
//! [`Verifier::verify`] is the trust boundary. Two conditions stop it early
//! with nothing but a single error: an expired challenge and a response for a
//! different challenge. Otherwise every check runs, each failure appends one
//! error in check order, and the response is valid only if all four flags
//! hold:
//!
//! 1. `versionMatch`: the client reports the manifest version.
//! 2. `chainIntegrity`: the submitted links extend the challenged chain head,
//!    recompute, and are continuous.
//! 3. `shaderOutputsMatch`: each required shader's submitted output equals an
//!    independent recomputation on the challenge seed.
//! 4. `workValid`: the work result carries `difficulty` leading zeros. In
//!    strict mode the result must also equal `sha256(head + nonce)`.
//!
//! Verification never mutates anything. [`update_client_state`] applies the
//! outcome when the caller decides to.

use crate::chain::verify_links;
use crate::challenge::DrmChallenge;
use crate::hashing::{has_leading_zeros, now_millis, sha256_hex};
use crate::manifest::VersionManifest;
use crate::shader::ShaderRegistry;
use crate::solver::DrmResponse;
use crate::state::ClientState;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Error reported for a challenge past its expiry.
pub const CHALLENGE_EXPIRED: &str = "Challenge expired";
/// Error reported for a response answering another challenge.
pub const CHALLENGE_ID_MISMATCH: &str = "Challenge ID mismatch";

/// Outcome of one verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Conjunction of the four check flags.
    pub valid: bool,
    /// Client version equals the manifest version.
    pub version_match: bool,
    /// Submitted chain extends the challenge head and recomputes.
    pub chain_integrity: bool,
    /// Work result satisfies the difficulty.
    pub work_valid: bool,
    /// Every required shader output matches recomputation.
    pub shader_outputs_match: bool,
    /// One human-readable message per failed check, in check order.
    pub errors: Vec<String>,
}

impl VerificationResult {
    /// Returns `true` for a hard stop (expired challenge or id mismatch)
    /// where no check ran.
    pub fn is_protocol_rejection(&self) -> bool {
        !self.valid
            && matches!(self.errors.as_slice(), [only] if only == CHALLENGE_EXPIRED || only == CHALLENGE_ID_MISMATCH)
    }

    fn rejected(error: &str) -> Self {
        Self {
            valid: false,
            version_match: false,
            chain_integrity: false,
            work_valid: false,
            shader_outputs_match: false,
            errors: vec![error.to_string()],
        }
    }
}

/// Validates responses against one build's manifest.
#[derive(Debug, Clone)]
pub struct Verifier {
    manifest: VersionManifest,
    registry: ShaderRegistry,
    strict_work: bool,
}

impl Verifier {
    /// Verifier for `manifest`, recomputing shader outputs with `registry`.
    pub fn new(manifest: VersionManifest, registry: ShaderRegistry) -> Self {
        Self {
            manifest,
            registry,
            strict_work: false,
        }
    }

    /// Enables or disables recomputation of the work result from the nonce.
    pub fn with_strict_work(mut self, strict_work: bool) -> Self {
        self.strict_work = strict_work;
        self
    }

    /// Manifest this verifier validates against.
    pub fn manifest(&self) -> &VersionManifest {
        &self.manifest
    }

    /// Registry used for recomputation.
    pub fn registry(&self) -> &ShaderRegistry {
        &self.registry
    }

    /// Verifies `response` against `challenge` at the current time.
    pub fn verify(&self, challenge: &DrmChallenge, response: &DrmResponse) -> VerificationResult {
        self.verify_at(challenge, response, now_millis())
    }

    /// Verifies `response` against `challenge` as of `now`.
    pub fn verify_at(
        &self,
        challenge: &DrmChallenge,
        response: &DrmResponse,
        now: u64,
    ) -> VerificationResult {
        if challenge.is_expired_at(now) {
            warn!(challenge = %challenge.challenge_id, "rejected expired challenge");
            return VerificationResult::rejected(CHALLENGE_EXPIRED);
        }
        if response.challenge_id != challenge.challenge_id {
            warn!(
                challenge = %challenge.challenge_id,
                answered = %response.challenge_id,
                "rejected response for another challenge"
            );
            return VerificationResult::rejected(CHALLENGE_ID_MISMATCH);
        }

        let mut errors = Vec::new();

        let version_match = response.client_version == self.manifest.version;
        if !version_match {
            errors.push(format!(
                "Version mismatch: expected {}, got {}",
                self.manifest.version, response.client_version
            ));
        }

        let chain_integrity =
            match verify_links(&response.state_chain, &challenge.previous_chain_hash) {
                Ok(()) => true,
                Err(err) => {
                    errors.push(format!("Chain integrity failed: {err}"));
                    false
                }
            };

        let shader_errors = self.check_shader_outputs(challenge, response);
        let shader_outputs_match = shader_errors.is_empty();
        errors.extend(shader_errors);

        let work_valid = self.check_work(challenge, response, &mut errors);

        let valid = version_match && chain_integrity && work_valid && shader_outputs_match;
        if valid {
            info!(challenge = %challenge.challenge_id, "response verified");
        } else {
            warn!(
                challenge = %challenge.challenge_id,
                version_match,
                chain_integrity,
                work_valid,
                shader_outputs_match,
                "response failed verification"
            );
        }
        VerificationResult {
            valid,
            version_match,
            chain_integrity,
            work_valid,
            shader_outputs_match,
            errors,
        }
    }

    fn check_shader_outputs(&self, challenge: &DrmChallenge, response: &DrmResponse) -> Vec<String> {
        let mut errors = Vec::new();
        for shader in &challenge.required_shaders {
            let Some(seed) = challenge.seed_for(shader) else {
                errors.push(format!("Shader output mismatch: {shader} has no seed"));
                continue;
            };
            let expected = match self.registry.execute(shader, seed) {
                Ok(output) => output,
                Err(err) => {
                    errors.push(format!("Shader output mismatch: {err}"));
                    continue;
                }
            };
            let submitted = response
                .state_chain
                .iter()
                .find(|link| link.shader_fingerprint.shader_id == *shader);
            match submitted {
                None => errors.push(format!("Shader output missing: {shader}")),
                Some(link) if link.shader_fingerprint.output_hash != expected => {
                    errors.push(format!("Shader output mismatch: {shader}"))
                }
                Some(_) => {}
            }
        }
        errors
    }

    fn check_work(
        &self,
        challenge: &DrmChallenge,
        response: &DrmResponse,
        errors: &mut Vec<String>,
    ) -> bool {
        let mut work_valid = has_leading_zeros(&response.work_result, challenge.difficulty);
        if !work_valid {
            errors.push(format!(
                "Insufficient proof of work: expected {} leading zeros",
                challenge.difficulty
            ));
        }
        if self.strict_work {
            let head = response
                .state_chain
                .last()
                .map_or(challenge.previous_chain_hash.as_str(), |link| {
                    link.link_hash.as_str()
                });
            if sha256_hex(&format!("{head}{}", response.nonce)) != response.work_result {
                errors.push("Work result does not match nonce".to_string());
                work_valid = false;
            }
        }
        work_valid
    }
}

/// Work units represented by `links` work proofs at `difficulty`.
pub fn work_units(difficulty: u32, links: usize) -> u64 {
    10u64
        .checked_pow(difficulty)
        .unwrap_or(u64::MAX)
        .saturating_mul(links as u64)
}

/// Folds one completed verification into the client's record.
///
/// Trust moves per [`ClientState::apply_verdict`]; the chain head advances to
/// the last submitted link (unchanged when none was submitted) and the chain
/// length and work counters accumulate.
pub fn update_client_state(
    state: &mut ClientState,
    challenge: &DrmChallenge,
    response: &DrmResponse,
    result: &VerificationResult,
    now: u64,
) {
    state.apply_verdict(result);
    if let Some(last) = response.state_chain.last() {
        state.last_chain_hash = last.link_hash.clone();
    }
    let submitted = response.state_chain.len();
    state.chain_length = state.chain_length.saturating_add(submitted as u64);
    state.total_work_completed = state
        .total_work_completed
        .saturating_add(work_units(challenge.difficulty, submitted));
    state.last_verified_at = Some(now);
    info!(
        client = %state.client_id,
        trust = state.trust_score,
        chain_length = state.chain_length,
        "client state updated"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeGenerator;
    use crate::solver::ClientSolver;

    const VERSION: &str = "1.0.0";

    fn verifier() -> Verifier {
        let registry = ShaderRegistry::new("build");
        let manifest = VersionManifest::build(&registry, VERSION, "signing");
        Verifier::new(manifest, registry)
    }

    fn solved(trust: u32, work_type: &str) -> (ClientState, DrmChallenge, DrmResponse) {
        let state = ClientState::with_trust("client", VERSION, trust);
        let challenge = ChallengeGenerator::default().generate_at(&state, work_type, now_millis());
        let mut solver = ClientSolver::new("client", VERSION, ShaderRegistry::new("build"));
        let response = solver.solve_challenge(&challenge).unwrap();
        (state, challenge, response)
    }

    #[test]
    fn honest_response_verifies() {
        let (_, challenge, response) = solved(80, "entropy_chain");
        let result = verifier().verify(&challenge, &response);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn strict_mode_accepts_honest_nonce() {
        let (_, challenge, response) = solved(80, "shader_verify");
        let result = verifier().with_strict_work(true).verify(&challenge, &response);
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn strict_mode_rejects_borrowed_work_result() {
        let (_, challenge, mut response) = solved(80, "shader_verify");
        response.work_result = format!("0{}", "a".repeat(63));
        let lenient = verifier().verify(&challenge, &response);
        assert!(lenient.work_valid);
        let strict = verifier().with_strict_work(true).verify(&challenge, &response);
        assert!(!strict.work_valid);
        assert!(!strict.valid);
        assert_eq!(strict.errors, vec!["Work result does not match nonce"]);
    }

    #[test]
    fn expired_challenge_is_a_hard_stop() {
        let (_, challenge, response) = solved(80, "shader_verify");
        let result = verifier().verify_at(&challenge, &response, challenge.expires_at + 1);
        assert!(!result.valid);
        assert!(!result.version_match && !result.chain_integrity);
        assert!(!result.work_valid && !result.shader_outputs_match);
        assert_eq!(result.errors, vec![CHALLENGE_EXPIRED]);
        assert!(result.is_protocol_rejection());
    }

    #[test]
    fn foreign_challenge_id_is_a_hard_stop() {
        let (_, challenge, mut response) = solved(80, "shader_verify");
        response.challenge_id = "someone-else".to_string();
        let result = verifier().verify(&challenge, &response);
        assert!(!result.valid);
        assert_eq!(result.errors, vec![CHALLENGE_ID_MISMATCH]);
        assert!(result.is_protocol_rejection());
    }

    #[test]
    fn every_failure_is_reported_in_order() {
        let (_, challenge, mut response) = solved(80, "shader_verify");
        response.client_version = "0.9.0".to_string();
        response.state_chain[1].shader_fingerprint.output_hash = "0".repeat(64);
        response.work_result = "f".repeat(64);
        let result = verifier().verify(&challenge, &response);
        assert!(!result.valid);
        assert!(!result.version_match);
        assert!(!result.chain_integrity);
        assert!(!result.shader_outputs_match);
        assert!(!result.work_valid);
        assert_eq!(result.errors.len(), 4);
        assert!(result.errors[0].starts_with("Version mismatch"));
        assert!(result.errors[1].starts_with("Chain integrity failed"));
        assert_eq!(result.errors[2], "Shader output mismatch: hash_compute");
        assert!(result.errors[3].starts_with("Insufficient proof of work"));
    }

    #[test]
    fn missing_shader_link_fails_outputs() {
        let (_, challenge, mut response) = solved(80, "shader_verify");
        response.state_chain.pop();
        let result = verifier().verify(&challenge, &response);
        assert!(result.chain_integrity);
        assert!(!result.shader_outputs_match);
        assert!(result
            .errors
            .contains(&"Shader output missing: hash_compute".to_string()));
    }

    #[test]
    fn empty_chain_fails_integrity() {
        let (_, challenge, mut response) = solved(80, "shader_verify");
        response.state_chain.clear();
        let result = verifier().verify(&challenge, &response);
        assert!(!result.chain_integrity);
        assert!(!result.valid);
    }

    #[test]
    fn salted_build_mismatch_is_tamper_evidence() {
        let state = ClientState::with_trust("client", VERSION, 80);
        let challenge = ChallengeGenerator::default().generate_at(&state, "shader_verify", now_millis());
        let mut solver = ClientSolver::new("client", VERSION, ShaderRegistry::new("patched"));
        let response = solver.solve_challenge(&challenge).unwrap();
        let result = verifier().verify(&challenge, &response);
        assert!(result.version_match);
        assert!(result.chain_integrity);
        assert!(result.work_valid);
        assert!(!result.shader_outputs_match);
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["Shader output mismatch: version_proof"]);
    }

    #[test]
    fn update_advances_head_and_rewards() {
        let (mut state, challenge, response) = solved(50, "shader_verify");
        assert_eq!(challenge.difficulty, 3);
        let result = verifier().verify(&challenge, &response);
        update_client_state(&mut state, &challenge, &response, &result, 42);
        assert_eq!(state.trust_score, 55);
        assert_eq!(state.chain_length, 2);
        assert_eq!(state.total_work_completed, 2_000);
        assert_eq!(state.last_chain_hash, response.state_chain[1].link_hash);
        assert_eq!(state.last_verified_at, Some(42));
    }

    #[test]
    fn empty_submission_keeps_head() {
        let (mut state, challenge, mut response) = solved(80, "shader_verify");
        response.state_chain.clear();
        let result = verifier().verify(&challenge, &response);
        let head = state.last_chain_hash.clone();
        update_client_state(&mut state, &challenge, &response, &result, 1);
        assert_eq!(state.last_chain_hash, head);
        assert_eq!(state.chain_length, 0);
        assert_eq!(state.trust_score, 10);
    }

    #[test]
    fn work_units_saturate() {
        assert_eq!(work_units(3, 2), 2_000);
        assert_eq!(work_units(40, 1), u64::MAX);
    }
}
