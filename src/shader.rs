//! Deterministic compute registry.
//!
//! A shader is a pure function from a seed string to a hex digest. The set is
//! closed: [`ShaderId`] enumerates every registered shader and dispatch is an
//! exhaustive `match`, so "unknown shader" only arises when parsing an id that
//! arrived as text.
//!
//! Every shader is sensitive to its internal constants. `version_proof` is
//! additionally salted with a per-build secret, so two builds disagree on its
//! output for the same seed while agreeing on everything else.
//!
//! Each registry records one test vector per shader at construction. The
//! vectors seed the [`VersionManifest`](crate::VersionManifest); they are
//! never used to answer live challenges. [`REFERENCE_OUTPUTS`] pins the
//! known answers of the default build, so [`ShaderRegistry::self_check`]
//! catches a changed shader constant even though the recorded vectors would
//! silently follow it.

use crate::error::ShaderError;
use crate::hashing::sha256_hex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Build salt mixed into `version_proof` when no other salt is configured.
pub const DEFAULT_BUILD_SALT: &str = "shader_chain_v1.0.0_build_2026";

/// Seed used when deriving a shader's fingerprint.
pub const FINGERPRINT_SEED: &str = "FINGERPRINT_TEST";

/// Version recorded in every shader definition.
pub const SHADER_VERSION: &str = "1.0.0";
const HASH_COMPUTE_ROUNDS: u32 = 1000;
const VERSION_PROOF_ROUNDS: u32 = 500;
const VERSION_MARKER: &str = "SHADER_CHAIN_V1";
const ENTROPY_ROUNDS: u32 = 100;
const ENTROPY_LANES: usize = 16;
const ENTROPY_PRIME: u32 = 0x0100_0193;
const FOLDING_SOFTENING: f64 = 1.0;
const EMPTY_ENTROPY_INPUT: &[u8] = &[0];

/// Known answers of every shader on its [`test_seed`] under [`DEFAULT_BUILD_SALT`].
pub const REFERENCE_OUTPUTS: [(ShaderId, &str); 4] = [
    (
        ShaderId::HashCompute,
        "97aff6b70eed412923a73db428f5d49b68c74093524df537275d173b3ffe3678",
    ),
    (
        ShaderId::FoldingEnergy,
        "6a8e9a6c2b93de869f82830783242f0d3bfee78e53cfadc2f40ab4c4f3015116",
    ),
    (
        ShaderId::Entropy,
        "061f2e8a69f9e3db9e78068f2f6e096a363e024d1556f78d990a28f569acb498",
    ),
    (
        ShaderId::VersionProof,
        "9fdae0de6c8af69337f040eb0b241bf44f732a17b0a4a4bd1a06b3192c2d2f88",
    ),
];

/// Identifier of a registered shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderId {
    /// Iterated SHA-256 over the seed and a round counter.
    HashCompute,
    /// Pairwise Lennard-Jones style energy over positions derived from the seed bytes.
    FoldingEnergy,
    /// Sixteen-lane xor-shift mixing of the seed bytes.
    Entropy,
    /// Iterated SHA-256 salted with a version marker and the build salt.
    VersionProof,
}

impl ShaderId {
    /// Every registered shader, in registration order.
    pub const ALL: [ShaderId; 4] = [
        ShaderId::HashCompute,
        ShaderId::FoldingEnergy,
        ShaderId::Entropy,
        ShaderId::VersionProof,
    ];

    /// Wire name of the shader.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShaderId::HashCompute => "hash_compute",
            ShaderId::FoldingEnergy => "folding_energy",
            ShaderId::Entropy => "entropy",
            ShaderId::VersionProof => "version_proof",
        }
    }
}

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShaderId {
    type Err = ShaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShaderId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ShaderError::Unknown(s.to_string()))
    }
}

/// Serializable description of a shader's implementation.
///
/// Changing any constant a shader depends on changes its definition and
/// therefore its manifest hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderDefinition {
    /// Shader identifier.
    pub id: ShaderId,
    /// Implementation version.
    pub version: String,
    /// Number of mixing rounds.
    pub rounds: u32,
    /// Remaining constants rendered as text.
    pub constants: Vec<String>,
}

impl ShaderDefinition {
    /// Digest of the canonical JSON rendering of the definition.
    pub fn digest(&self) -> String {
        let canonical = json!({
            "id": self.id.as_str(),
            "version": self.version,
            "rounds": self.rounds,
            "constants": self.constants,
        });
        sha256_hex(&canonical.to_string())
    }
}

/// Registered self-validation input and output for a shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVector {
    /// Fixed test seed.
    pub seed: String,
    /// Output recorded for `seed` when the registry was built.
    pub expected: String,
}

/// The closed set of deterministic shaders for one build.
#[derive(Debug, Clone)]
pub struct ShaderRegistry {
    build_salt: String,
    test_vectors: BTreeMap<ShaderId, TestVector>,
}

impl Default for ShaderRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_SALT)
    }
}

impl ShaderRegistry {
    /// Builds the registry for a build salt and records its test vectors.
    pub fn new(build_salt: impl Into<String>) -> Self {
        let mut registry = Self {
            build_salt: build_salt.into(),
            test_vectors: BTreeMap::new(),
        };
        for id in ShaderId::ALL {
            let seed = test_seed(id);
            let expected = registry.run(id, &seed);
            registry
                .test_vectors
                .insert(id, TestVector { seed, expected });
        }
        registry
    }

    /// Salt mixed into `version_proof`.
    pub fn build_salt(&self) -> &str {
        &self.build_salt
    }

    /// Executes the shader named `shader_id` on `seed`.
    pub fn execute(&self, shader_id: &str, seed: &str) -> Result<String, ShaderError> {
        let id = shader_id.parse::<ShaderId>()?;
        Ok(self.run(id, seed))
    }

    /// Executes a registered shader.
    pub fn run(&self, id: ShaderId, seed: &str) -> String {
        run_shader(id, seed, &self.build_salt)
    }

    /// Implementation description of a shader.
    pub fn definition(&self, id: ShaderId) -> ShaderDefinition {
        let (rounds, constants) = match id {
            ShaderId::HashCompute => (HASH_COMPUTE_ROUNDS, vec!["sha256".to_string()]),
            ShaderId::FoldingEnergy => (
                1,
                vec![
                    "positions:sin(c*0.1)*10,cos(c*0.1)*10,sin(c*0.2)*10".to_string(),
                    format!("softening:{FOLDING_SOFTENING}"),
                    "energy:1/r6-2/r12".to_string(),
                    "format:.10".to_string(),
                ],
            ),
            ShaderId::Entropy => (
                ENTROPY_ROUNDS,
                vec![
                    format!("lanes:{ENTROPY_LANES}"),
                    format!("prime:{ENTROPY_PRIME:#010x}"),
                    "mix:a^(b<<7)^(c>>3)".to_string(),
                ],
            ),
            ShaderId::VersionProof => (
                VERSION_PROOF_ROUNDS,
                vec![
                    format!("marker:{VERSION_MARKER}"),
                    format!("salt:{}", sha256_hex(&self.build_salt)),
                ],
            ),
        };
        ShaderDefinition {
            id,
            version: SHADER_VERSION.to_string(),
            rounds,
            constants,
        }
    }

    /// Fingerprint binding a shader's id, version and behaviour.
    pub fn fingerprint(&self, id: ShaderId) -> String {
        sha256_hex(&format!(
            "{}|{}|{}",
            id.as_str(),
            SHADER_VERSION,
            self.run(id, FINGERPRINT_SEED)
        ))
    }

    /// Registered test vector for a shader.
    pub fn test_vector(&self, id: ShaderId) -> Option<&TestVector> {
        self.test_vectors.get(&id)
    }

    /// All registered test vectors, ordered by shader id.
    pub fn test_vectors(&self) -> impl Iterator<Item = (ShaderId, &TestVector)> {
        self.test_vectors.iter().map(|(id, vector)| (*id, vector))
    }

    /// Runs each listed shader on its [`test_seed`] under this registry's salt
    /// and returns the ids whose output differs from the given answer.
    pub fn drift_from(&self, expected: &[(ShaderId, &str)]) -> Vec<ShaderId> {
        expected
            .iter()
            .filter(|(id, output)| self.run(*id, &test_seed(*id)) != *output)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Checks every shader against [`REFERENCE_OUTPUTS`] and re-executes the
    /// recorded test vectors, returning the shaders that drifted.
    ///
    /// The reference comparison always uses [`DEFAULT_BUILD_SALT`], so a
    /// registry built with another salt is still held to the pinned answers.
    pub fn self_check(&self) -> Vec<ShaderId> {
        let mut drifted: Vec<ShaderId> = REFERENCE_OUTPUTS
            .iter()
            .filter(|(id, output)| {
                run_shader(*id, &test_seed(*id), DEFAULT_BUILD_SALT) != *output
            })
            .map(|(id, _)| *id)
            .collect();
        for (id, vector) in &self.test_vectors {
            if self.run(*id, &vector.seed) != vector.expected && !drifted.contains(id) {
                drifted.push(*id);
            }
        }
        drifted.sort();
        drifted
    }
}

fn run_shader(id: ShaderId, seed: &str, build_salt: &str) -> String {
    match id {
        ShaderId::HashCompute => hash_compute(seed),
        ShaderId::FoldingEnergy => folding_energy(seed),
        ShaderId::Entropy => entropy(seed),
        ShaderId::VersionProof => version_proof(seed, build_salt),
    }
}

/// Fixed self-validation seed for a shader.
pub fn test_seed(id: ShaderId) -> String {
    format!("selftest:{}", id.as_str())
}

fn hash_compute(seed: &str) -> String {
    let mut state = seed.to_string();
    for round in 0..HASH_COMPUTE_ROUNDS {
        state = sha256_hex(&format!("{state}{round}"));
    }
    state
}

fn folding_energy(sequence: &str) -> String {
    let residues: Vec<[f64; 3]> = sequence
        .bytes()
        .map(|b| {
            let c = f64::from(b);
            [
                (c * 0.1).sin() * 10.0,
                (c * 0.1).cos() * 10.0,
                (c * 0.2).sin() * 10.0,
            ]
        })
        .collect();
    let mut energy = 0.0f64;
    for (i, a) in residues.iter().enumerate() {
        for b in &residues[i + 1..] {
            let dx = a[0] - b[0];
            let dy = a[1] - b[1];
            let dz = a[2] - b[2];
            let r2 = dx * dx + dy * dy + dz * dz + FOLDING_SOFTENING;
            let r6 = r2 * r2 * r2;
            energy += 1.0 / r6 - 2.0 / (r6 * r6);
        }
    }
    sha256_hex(&format!("{energy:.10}{sequence}"))
}

fn entropy(input: &str) -> String {
    let bytes = match input.as_bytes() {
        [] => EMPTY_ENTROPY_INPUT,
        bytes => bytes,
    };
    let mut state = [0u32; ENTROPY_LANES];
    for (i, lane) in state.iter_mut().enumerate() {
        *lane = u32::from(bytes[i % bytes.len()]).wrapping_mul(ENTROPY_PRIME);
    }
    for _ in 0..ENTROPY_ROUNDS {
        for i in 0..ENTROPY_LANES {
            let a = state[i];
            let b = state[(i + 1) % ENTROPY_LANES];
            let c = state[(i + 5) % ENTROPY_LANES];
            state[i] = a ^ (b << 7) ^ (c >> 3);
        }
    }
    let mut packed = Vec::with_capacity(ENTROPY_LANES * 4);
    for lane in state {
        packed.extend_from_slice(&lane.to_be_bytes());
    }
    sha256_hex(&hex::encode(packed))
}

fn version_proof(seed: &str, build_salt: &str) -> String {
    let mut hash = sha256_hex(&format!("{seed}|{VERSION_MARKER}|{build_salt}"));
    for _ in 0..VERSION_PROOF_ROUNDS {
        hash = sha256_hex(&format!("{hash}{VERSION_MARKER}"));
    }
    hash
}
