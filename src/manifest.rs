//! Signed description of one server build.
//!
//! The manifest records, for every registered shader, the digest of its
//! definition and the output expected for its test seed. It is built once at
//! server start and never mutated; a verifier needs nothing else to know
//! which build it is validating against.

use crate::hashing::{keyed_digest, now_millis};
use crate::shader::{ShaderId, ShaderRegistry};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Canonical, signed build description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    /// Build version string.
    pub version: String,
    /// Shader id to definition digest.
    pub shader_hashes: BTreeMap<String, String>,
    /// Test seed to expected shader output.
    pub expected_outputs: BTreeMap<String, String>,
    /// Build time in milliseconds since the Unix epoch.
    pub build_timestamp: u64,
    /// MAC over the other fields under the server signing secret.
    pub signature: String,
}

impl VersionManifest {
    /// Builds and signs the manifest for `registry` at the current time.
    pub fn build(registry: &ShaderRegistry, version: &str, signing_secret: &str) -> Self {
        Self::build_at(registry, version, signing_secret, now_millis())
    }

    /// Builds and signs the manifest with an explicit build timestamp.
    pub fn build_at(
        registry: &ShaderRegistry,
        version: &str,
        signing_secret: &str,
        build_timestamp: u64,
    ) -> Self {
        let shader_hashes = ShaderId::ALL
            .iter()
            .map(|id| (id.as_str().to_string(), registry.definition(*id).digest()))
            .collect();
        let expected_outputs = registry
            .test_vectors()
            .map(|(_, vector)| (vector.seed.clone(), vector.expected.clone()))
            .collect();
        let mut manifest = Self {
            version: version.to_string(),
            shader_hashes,
            expected_outputs,
            build_timestamp,
            signature: String::new(),
        };
        manifest.signature = keyed_digest(&manifest.signing_payload(), signing_secret);
        manifest
    }

    fn signing_payload(&self) -> String {
        json!({
            "version": self.version,
            "shaderHashes": self.shader_hashes,
            "expectedOutputs": self.expected_outputs,
            "buildTimestamp": self.build_timestamp,
        })
        .to_string()
    }

    /// Returns `true` if the signature verifies under `signing_secret`.
    pub fn verify_signature(&self, signing_secret: &str) -> bool {
        keyed_digest(&self.signing_payload(), signing_secret) == self.signature
    }

    /// Definition digest recorded for a shader.
    pub fn shader_hash(&self, id: ShaderId) -> Option<&str> {
        self.shader_hashes.get(id.as_str()).map(String::as_str)
    }

    /// Expected output recorded for a test seed.
    pub fn expected_output(&self, test_seed: &str) -> Option<&str> {
        self.expected_outputs.get(test_seed).map(String::as_str)
    }

    /// Shaders whose definition or test output in `registry` disagrees with this manifest.
    pub fn mismatched_shaders(&self, registry: &ShaderRegistry) -> Vec<ShaderId> {
        ShaderId::ALL
            .into_iter()
            .filter(|id| {
                let definition_ok =
                    self.shader_hash(*id) == Some(registry.definition(*id).digest().as_str());
                let output_ok = registry.test_vector(*id).map_or(false, |vector| {
                    self.expected_output(&vector.seed)
                        == Some(registry.run(*id, &vector.seed).as_str())
                });
                !(definition_ok && output_ok)
            })
            .collect()
    }
}
