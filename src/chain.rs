//! Append-only, hash-linked state chain.
//!
//! Each executed shader becomes one [`StateChainLink`]. A link commits to its
//! position, its predecessor's hash, the [`ShaderFingerprint`] of the
//! execution and the throwaway work proof:
//!
//! ```text
//! linkHash = sha256(canonical_json({index, previousHash, fingerprint, workProof}))
//! ```
//!
//! The canonical JSON form sorts object keys, so the digest is independent of
//! field declaration order. The first link of every chain points at
//! [`GENESIS_HASH`]. Links are never removed, rewritten or reordered.

use crate::error::{ChainError, ShaderError};
use crate::hashing::{now_millis, sha256_hex, GENESIS_HASH};
use crate::shader::ShaderRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Result of one deterministic shader execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderFingerprint {
    /// Shader that was executed.
    pub shader_id: String,
    /// Client version that executed it.
    pub version: String,
    /// Seed the shader was run on.
    pub input_seed: String,
    /// Shader output.
    pub output_hash: String,
    /// Execution time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ShaderFingerprint {
    fn canonical(&self) -> Value {
        json!({
            "shaderId": self.shader_id,
            "version": self.version,
            "inputSeed": self.input_seed,
            "outputHash": self.output_hash,
            "timestamp": self.timestamp,
        })
    }
}

/// One link of a state chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChainLink {
    /// Zero-based position within the chain that produced the link.
    pub index: u64,
    /// `linkHash` of the predecessor, or [`GENESIS_HASH`].
    pub previous_hash: String,
    /// Execution record committed to by this link.
    pub shader_fingerprint: ShaderFingerprint,
    /// Throwaway work proof computed before the link was added.
    pub work_proof: String,
    /// Digest over the other four fields.
    pub link_hash: String,
}

impl StateChainLink {
    /// Computes the link hash for the given fields.
    pub fn compute_hash(
        index: u64,
        previous_hash: &str,
        fingerprint: &ShaderFingerprint,
        work_proof: &str,
    ) -> String {
        let preimage = json!({
            "index": index,
            "previousHash": previous_hash,
            "fingerprint": fingerprint.canonical(),
            "workProof": work_proof,
        });
        sha256_hex(&preimage.to_string())
    }

    /// Recomputes the hash from the stored fields.
    pub fn recompute_hash(&self) -> String {
        Self::compute_hash(
            self.index,
            &self.previous_hash,
            &self.shader_fingerprint,
            &self.work_proof,
        )
    }

    /// Returns `true` if the stored hash matches the recomputed one.
    pub fn is_self_consistent(&self) -> bool {
        self.recompute_hash() == self.link_hash
    }
}

/// Checks a run of links that must extend `anchor`.
///
/// Every link hash is recomputed rather than trusted, and every link after the
/// first must point at its predecessor.
pub fn verify_links(links: &[StateChainLink], anchor: &str) -> Result<(), ChainError> {
    let first = links.first().ok_or(ChainError::Empty)?;
    if first.previous_hash != anchor {
        return Err(ChainError::AnchorMismatch {
            expected: anchor.to_string(),
            found: first.previous_hash.clone(),
        });
    }
    for (position, link) in links.iter().enumerate() {
        if !link.is_self_consistent() {
            return Err(ChainError::HashMismatch { index: link.index });
        }
        if position > 0 && link.previous_hash != links[position - 1].link_hash {
            return Err(ChainError::Broken { index: link.index });
        }
    }
    Ok(())
}

/// Serialized form of a whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainExport {
    /// Client version that built the chain.
    pub version: String,
    /// Every link, in order.
    pub links: Vec<StateChainLink>,
    /// Head hash at export time.
    pub current_hash: String,
}

impl ChainExport {
    /// Renders the export as JSON.
    pub fn to_json_string(&self) -> Result<String, ChainError> {
        serde_json::to_string(self).map_err(|err| ChainError::Encode(err.to_string()))
    }

    /// Parses an export produced by [`ChainExport::to_json_string`].
    pub fn from_json_str(input: &str) -> Result<Self, ChainError> {
        serde_json::from_str(input).map_err(|err| ChainError::Decode(err.to_string()))
    }
}

/// Append-only chain of shader executions owned by a single writer.
#[derive(Debug, Clone)]
pub struct StateChain {
    version: String,
    links: Vec<StateChainLink>,
    current_hash: String,
}

impl StateChain {
    /// Creates an empty chain anchored at [`GENESIS_HASH`].
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            links: Vec::new(),
            current_hash: GENESIS_HASH.to_string(),
        }
    }

    /// Executes `shader_id` on `input_seed` and appends the resulting link.
    pub fn add_link(
        &mut self,
        registry: &ShaderRegistry,
        shader_id: &str,
        input_seed: &str,
        work_proof: &str,
    ) -> Result<StateChainLink, ShaderError> {
        let output_hash = registry.execute(shader_id, input_seed)?;
        let fingerprint = ShaderFingerprint {
            shader_id: shader_id.to_string(),
            version: self.version.clone(),
            input_seed: input_seed.to_string(),
            output_hash,
            timestamp: now_millis(),
        };
        let index = self.links.len() as u64;
        let link_hash =
            StateChainLink::compute_hash(index, &self.current_hash, &fingerprint, work_proof);
        let link = StateChainLink {
            index,
            previous_hash: self.current_hash.clone(),
            shader_fingerprint: fingerprint,
            work_proof: work_proof.to_string(),
            link_hash: link_hash.clone(),
        };
        self.links.push(link.clone());
        self.current_hash = link_hash;
        Ok(link)
    }

    /// Current head hash.
    pub fn chain_hash(&self) -> &str {
        &self.current_hash
    }

    /// Version the chain was built for.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All links, oldest first.
    pub fn links(&self) -> &[StateChainLink] {
        &self.links
    }

    /// The most recent `count` links.
    pub fn tail(&self, count: usize) -> &[StateChainLink] {
        let start = self.links.len().saturating_sub(count);
        &self.links[start..]
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns `true` if no link has been added.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Rechecks the whole chain from genesis.
    pub fn verify_integrity(&self) -> bool {
        self.links.is_empty() || verify_links(&self.links, GENESIS_HASH).is_ok()
    }

    /// Copies the chain out for transmission or persistence.
    pub fn export(&self) -> ChainExport {
        ChainExport {
            version: self.version.clone(),
            links: self.links.clone(),
            current_hash: self.current_hash.clone(),
        }
    }

    /// Rebuilds a chain from an export, refusing anything that does not verify.
    pub fn import(export: ChainExport) -> Result<Self, ChainError> {
        for (position, link) in export.links.iter().enumerate() {
            if link.index != position as u64 {
                return Err(ChainError::IndexGap {
                    position,
                    index: link.index,
                });
            }
        }
        let head = match export.links.last() {
            Some(last) => {
                verify_links(&export.links, GENESIS_HASH)?;
                last.link_hash.clone()
            }
            None => GENESIS_HASH.to_string(),
        };
        if head != export.current_hash {
            return Err(ChainError::HeadMismatch {
                expected: head,
                found: export.current_hash,
            });
        }
        Ok(Self {
            version: export.version,
            links: export.links,
            current_hash: head,
        })
    }
}
