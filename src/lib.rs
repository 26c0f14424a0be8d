#![deny(missing_docs)]

//! # shader_chain
//!
//! **shader_chain** implements a tamper-evidence and progressive-trust
//! protocol. A remote client proves it runs unmodified, version-correct code
//! by executing deterministic "shader" computations and assembling the
//! results into a hash-linked state chain. The server recomputes every
//! expected output, checks chain continuity, a proof-of-work nonce and
//! version agreement, and then moves a per-client trust score that gates
//! access to restricted resources.
//!
//! ## Components
//!
//! * **Shaders**: the [`shader`](shader/index.html) module holds the four
//!   deterministic computations (`hash_compute`, `folding_energy`, `entropy`,
//!   `version_proof`) behind [`ShaderRegistry`]. `version_proof` mixes in a
//!   build salt, so builds with different salts disagree on its output.
//! * **State chain**: [`StateChain`] appends one [`StateChainLink`] per shader
//!   execution; each link hash commits to its index, its predecessor, the
//!   execution fingerprint and a work proof.
//! * **Manifest**: [`VersionManifest`] records shader definition hashes and
//!   expected test-vector outputs under a keyed signature.
//! * **Challenges**: [`ChallengeGenerator`] issues [`DrmChallenge`]s whose
//!   difficulty falls as trust rises; [`ClientSolver`] answers them.
//! * **Verification**: [`Verifier`] produces a [`VerificationResult`] and
//!   [`update_client_state`] folds it into a [`ClientState`].
//! * **Sessions**: [`DrmServer`] and [`ClientSession`] drive the message
//!   exchange in-process; the `net` feature adds a TCP transport.
//!
//! ## Usage
//!
//! ```rust
//! use shader_chain::{
//!     update_client_state, ChallengeGenerator, ClientSolver, ClientState, ShaderRegistry,
//!     Verifier, VersionManifest,
//! };
//!
//! let registry = ShaderRegistry::default();
//! let manifest = VersionManifest::build(&registry, "1.0.0", "signing-secret");
//! let verifier = Verifier::new(manifest, registry.clone());
//!
//! let mut state = ClientState::new("client-1", "1.0.0");
//! let challenge = ChallengeGenerator::default().generate(&state, "shader_verify");
//! assert_eq!(challenge.difficulty, 3);
//!
//! let mut solver = ClientSolver::new("client-1", "1.0.0", registry);
//! let response = solver.solve_challenge(&challenge).unwrap();
//! let result = verifier.verify(&challenge, &response);
//! assert!(result.valid);
//!
//! update_client_state(&mut state, &challenge, &response, &result, 0);
//! assert_eq!(state.trust_score, 55);
//! assert_eq!(state.chain_length, 2);
//! ```

pub mod access;
pub mod chain;
pub mod challenge;
pub mod client;
pub mod config;
pub mod error;
pub mod hashing;
pub mod manifest;
pub mod messages;
#[cfg(feature = "net")]
pub mod net;
pub mod server;
pub mod shader;
pub mod solver;
pub mod state;
pub mod store;
pub mod verifier;

pub use access::{GatedResource, ResourceCatalog, TokenAuthority, TokenClaims};
pub use chain::{verify_links, ChainExport, ShaderFingerprint, StateChain, StateChainLink};
pub use challenge::{difficulty_for_trust, ChallengeGenerator, DrmChallenge, WorkType};
pub use client::ClientSession;
pub use config::ProtocolConfig;
pub use error::{
    AccessError, ChainError, ConfigError, ServerError, ShaderError, SolveError, StoreError,
};
pub use hashing::{sha256_hex, GENESIS_HASH};
pub use manifest::VersionManifest;
pub use messages::{ClientMessage, ServerMessage};
pub use server::DrmServer;
pub use shader::{ShaderId, ShaderRegistry};
pub use solver::{ClientSolver, DrmResponse};
pub use state::{ClientState, ClientStateSummary};
pub use store::ProtocolStore;
pub use verifier::{update_client_state, VerificationResult, Verifier};
