//! Protocol configuration.
//!
//! Values come from [`ProtocolConfig::default`], then an optional JSON file,
//! then `SHADER_CHAIN_*` environment variables.

use crate::access::ACCESS_TOKEN_TTL_MS;
use crate::challenge::CHALLENGE_TTL_MS;
use crate::error::ConfigError;
use crate::shader::{DEFAULT_BUILD_SALT, SHADER_VERSION};
use crate::state::INITIAL_TRUST;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

const DEFAULT_SIGNING_SECRET: &str = "shader_chain_manifest_secret";
const DEFAULT_TOKEN_SECRET: &str = "shader_chain_token_secret";
const DEFAULT_STATE_PROOF_LINKS: usize = 3;

/// Server and client settings shared by the protocol components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Build version announced in the manifest.
    pub version: String,
    /// Salt mixed into `version_proof`.
    pub build_salt: String,
    /// Secret for manifest signatures.
    pub signing_secret: String,
    /// Secret for access-token MACs.
    pub token_secret: String,
    /// Challenge lifetime.
    pub challenge_ttl_ms: u64,
    /// Access-token lifetime.
    pub token_ttl_ms: u64,
    /// Trust score of a newly registered client.
    pub initial_trust: u32,
    /// Recompute the proof-of-work digest from the nonce during verification.
    pub strict_work: bool,
    /// Links a client attaches as `stateProof` on resource requests.
    pub state_proof_links: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: SHADER_VERSION.to_string(),
            build_salt: DEFAULT_BUILD_SALT.to_string(),
            signing_secret: DEFAULT_SIGNING_SECRET.to_string(),
            token_secret: DEFAULT_TOKEN_SECRET.to_string(),
            challenge_ttl_ms: CHALLENGE_TTL_MS,
            token_ttl_ms: ACCESS_TOKEN_TTL_MS,
            initial_trust: INITIAL_TRUST,
            strict_work: false,
            state_proof_links: DEFAULT_STATE_PROOF_LINKS,
        }
    }
}

impl ProtocolConfig {
    /// Load from JSON; missing file -> defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Applies `SHADER_CHAIN_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides looked up by variable name.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("SHADER_CHAIN_VERSION") {
            self.version = v;
        }
        if let Some(v) = lookup("SHADER_CHAIN_BUILD_SALT") {
            self.build_salt = v;
        }
        if let Some(v) = lookup("SHADER_CHAIN_SIGNING_SECRET") {
            self.signing_secret = v;
        }
        if let Some(v) = lookup("SHADER_CHAIN_TOKEN_SECRET") {
            self.token_secret = v;
        }
        if let Some(v) = lookup("SHADER_CHAIN_STRICT_WORK") {
            self.strict_work = parse_flag(&v)?;
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Parse(format!(
            "SHADER_CHAIN_STRICT_WORK expects a boolean, got {other:?}"
        ))),
    }
}
