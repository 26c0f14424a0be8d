//! Error taxonomy for the protocol.
//!
//! Verification failures are never errors: they are reported through
//! [`VerificationResult`](crate::VerificationResult). The types here cover
//! malformed or impossible inputs, chain import failures, access policy
//! denials and the plumbing around them.

use thiserror::Error;

/// Raised by the shader registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderError {
    #[error("unknown shader: {0}")]
    /// The shader id is not registered.
    Unknown(String),
}

/// Raised by the client solver before any response is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("missing seed for shader: {0}")]
    /// The challenge names a shader the solver cannot seed or does not recognize.
    MissingSeed(String),
    #[error("difficulty {difficulty} exceeds the {max} hex digits of a work result")]
    /// No digest can carry more leading zeros than it has hex digits.
    DifficultyTooHigh {
        /// Difficulty carried by the challenge.
        difficulty: u32,
        /// Largest satisfiable difficulty.
        max: u32,
    },
}

/// Problems found while checking or importing a sequence of chain links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("state chain is empty")]
    /// No links were supplied.
    Empty,
    #[error("first link does not extend {expected} (found {found})")]
    /// The first link's `previousHash` does not match the expected anchor.
    AnchorMismatch {
        /// Anchor the chain was expected to extend.
        expected: String,
        /// `previousHash` carried by the first link.
        found: String,
    },
    #[error("link {index} hash does not recompute")]
    /// A link's stored hash differs from the hash of its own fields.
    HashMismatch {
        /// Index of the offending link.
        index: u64,
    },
    #[error("link {index} does not follow its predecessor")]
    /// A link's `previousHash` differs from its predecessor's `linkHash`.
    Broken {
        /// Index of the offending link.
        index: u64,
    },
    #[error("link at position {position} carries index {index}")]
    /// Link indices are not the consecutive positions `0..n`.
    IndexGap {
        /// Position within the exported list.
        position: usize,
        /// Index stored in the link.
        index: u64,
    },
    #[error("exported head {found} does not match last link {expected}")]
    /// The exported head hash disagrees with the links.
    HeadMismatch {
        /// Hash implied by the links.
        expected: String,
        /// Head hash carried by the export.
        found: String,
    },
    #[error("chain encode error: {0}")]
    /// The export could not be rendered as JSON.
    Encode(String),
    #[error("chain decode error: {0}")]
    /// The export could not be parsed.
    Decode(String),
}

/// Policy errors surfaced at resource-request time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("invalid access token; complete a challenge to obtain a new one")]
    /// Token is malformed or its MAC does not verify.
    InvalidToken,
    #[error("access token expired; complete a challenge to refresh it")]
    /// Token MAC verifies but the token is past its expiry.
    TokenExpired,
    #[error("access token was issued to another session")]
    /// Token belongs to a different session.
    SessionMismatch,
    #[error(
        "insufficient trust: requires {required}, have {actual}; complete more challenges to increase trust"
    )]
    /// Client trust score is below the resource threshold.
    InsufficientTrust {
        /// Threshold configured for the resource.
        required: u32,
        /// Current client trust score.
        actual: u32,
    },
    #[error("unknown resource: {0}")]
    /// Resource id is not in the catalog.
    UnknownResource(String),
}

/// Failures of the shared challenge/client store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} lock poisoned")]
    /// A writer panicked while holding the named lock.
    Poisoned(&'static str),
}

/// Configuration loading failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    /// Filesystem failure while reading the config file.
    Io(String),
    #[error("config parse error: {0}")]
    /// The config file or an environment override could not be parsed.
    Parse(String),
}

/// Errors returned by the server session driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    #[error(transparent)]
    /// Shared store failure.
    Store(#[from] StoreError),
    #[error("session {0} has not sent init")]
    /// A message other than `init` arrived before `init`.
    UnknownSession(String),
}
