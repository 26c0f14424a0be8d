//! In-process server driver for the challenge/response exchange.
//!
//! [`DrmServer`] owns the manifest, verifier, token authority, resource
//! catalog and [`ProtocolStore`]. Transports hand it one decoded
//! [`ClientMessage`] per call together with the session id of the
//! connection it arrived on.

use crate::access::{ResourceCatalog, TokenAuthority};
use crate::chain::verify_links;
use crate::challenge::{ChallengeGenerator, DrmChallenge};
use crate::config::ProtocolConfig;
use crate::error::ServerError;
use crate::hashing::now_millis;
use crate::manifest::VersionManifest;
use crate::messages::{
    ClientMessage, ErrorMessage, InitAck, InitRequest, ResourceRequest, ResourceResponse,
    ServerMessage, VerifyResultMessage,
};
use crate::shader::ShaderRegistry;
use crate::solver::DrmResponse;
use crate::state::ClientState;
use crate::store::ProtocolStore;
use crate::verifier::{update_client_state, Verifier};
use tracing::{info, warn};

/// Work type of the challenge attached to `init-ack`.
pub const INITIAL_WORK_TYPE: &str = "shader_verify";
/// Error reported for a response to an unknown, consumed or foreign challenge.
pub const UNKNOWN_CHALLENGE: &str = "Unknown or already consumed challenge";
/// Denial reason when the attached state proof does not end at the verified head.
pub const STALE_STATE_PROOF: &str = "State proof does not match the verified chain";

/// Server side of the protocol.
#[derive(Debug)]
pub struct DrmServer {
    config: ProtocolConfig,
    verifier: Verifier,
    generator: ChallengeGenerator,
    tokens: TokenAuthority,
    catalog: ResourceCatalog,
    store: ProtocolStore,
}

impl DrmServer {
    /// Server for the build described by `config`, using the reference catalog.
    pub fn new(config: ProtocolConfig) -> Self {
        let registry = ShaderRegistry::new(config.build_salt.clone());
        let manifest = VersionManifest::build(&registry, &config.version, &config.signing_secret);
        info!(
            version = %manifest.version,
            strict_work = config.strict_work,
            "server manifest built"
        );
        Self {
            verifier: Verifier::new(manifest, registry).with_strict_work(config.strict_work),
            generator: ChallengeGenerator::new(config.challenge_ttl_ms),
            tokens: TokenAuthority::new(config.token_secret.clone(), config.token_ttl_ms),
            catalog: ResourceCatalog::reference(),
            store: ProtocolStore::new(),
            config,
        }
    }

    /// Replaces the resource catalog.
    pub fn with_catalog(mut self, catalog: ResourceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Manifest of this build.
    pub fn manifest(&self) -> &VersionManifest {
        self.verifier.manifest()
    }

    /// Challenge and client store.
    pub fn store(&self) -> &ProtocolStore {
        &self.store
    }

    /// Handles one message at the current time.
    pub fn handle(&self, session: &str, message: ClientMessage) -> Result<ServerMessage, ServerError> {
        self.handle_at(session, message, now_millis())
    }

    /// Handles one message as of `now`.
    pub fn handle_at(
        &self,
        session: &str,
        message: ClientMessage,
        now: u64,
    ) -> Result<ServerMessage, ServerError> {
        match message {
            ClientMessage::Init(req) => self.on_init(session, req, now),
            ClientMessage::ChallengeRequest(req) => {
                let state = self.known_client(session)?;
                Ok(ServerMessage::Challenge(self.issue(session, &state, &req.work_type, now)?))
            }
            ClientMessage::Response(resp) => self.on_response(session, resp, now),
            ClientMessage::ResourceRequest(req) => self.on_resource_request(session, req, now),
        }
    }

    fn known_client(&self, session: &str) -> Result<ClientState, ServerError> {
        self.store
            .client(session)?
            .ok_or_else(|| ServerError::UnknownSession(session.to_string()))
    }

    fn issue(
        &self,
        session: &str,
        state: &ClientState,
        work_type: &str,
        now: u64,
    ) -> Result<DrmChallenge, ServerError> {
        self.store.purge_expired(now)?;
        let challenge = self.generator.generate_at(state, work_type, now);
        self.store.insert_challenge(session, challenge.clone())?;
        Ok(challenge)
    }

    fn on_init(&self, session: &str, req: InitRequest, now: u64) -> Result<ServerMessage, ServerError> {
        let initial_trust = self.config.initial_trust;
        self.store.register_client(session, || {
            ClientState::with_trust(session, req.client_version.clone(), initial_trust)
        })?;
        let state = self
            .store
            .with_client(session, |state| {
                state.version = req.client_version.clone();
                state.clone()
            })?
            .ok_or_else(|| ServerError::UnknownSession(session.to_string()))?;

        let version_match = req.client_version == self.manifest().version;
        info!(session, client_version = %req.client_version, version_match, "client init");
        let initial_challenge = if version_match {
            Some(self.issue(session, &state, INITIAL_WORK_TYPE, now)?)
        } else {
            None
        };
        Ok(ServerMessage::InitAck(InitAck {
            server_version: self.manifest().version.clone(),
            version_match,
            client_state: state.summary(),
            initial_challenge,
        }))
    }

    fn on_response(
        &self,
        session: &str,
        resp: DrmResponse,
        now: u64,
    ) -> Result<ServerMessage, ServerError> {
        let Some(pending) = self.store.take_challenge_for(&resp.challenge_id, session)? else {
            warn!(session, challenge = %resp.challenge_id, "response for unknown challenge");
            return Ok(ServerMessage::Error(ErrorMessage {
                error: UNKNOWN_CHALLENGE.to_string(),
            }));
        };
        let challenge = pending.challenge;
        let outcome = self.store.with_client(session, |state| {
            let result = self.verifier.verify_at(&challenge, &resp, now);
            if result.is_protocol_rejection() {
                return (result, None, None);
            }
            update_client_state(state, &challenge, &resp, &result, now);
            let token = if result.valid {
                Some(self.tokens.issue(state, now).0)
            } else {
                None
            };
            (result, Some(state.summary()), token)
        })?;
        let (result, updated_state, access_token) =
            outcome.ok_or_else(|| ServerError::UnknownSession(session.to_string()))?;
        Ok(ServerMessage::VerifyResult(VerifyResultMessage {
            result,
            updated_state,
            access_token,
        }))
    }

    fn on_resource_request(
        &self,
        session: &str,
        req: ResourceRequest,
        now: u64,
    ) -> Result<ServerMessage, ServerError> {
        let state = self.known_client(session)?;
        if let Some(first) = req.state_proof.first() {
            let ends_at_head = req
                .state_proof
                .last()
                .is_some_and(|last| last.link_hash == state.last_chain_hash);
            if !ends_at_head || verify_links(&req.state_proof, &first.previous_hash).is_err() {
                warn!(session, resource = %req.resource_id, "stale state proof");
                return Ok(ServerMessage::ResourceResponse(ResourceResponse::denied(
                    STALE_STATE_PROOF,
                )));
            }
        }
        let response = match self.catalog.authorize(
            &self.tokens,
            &req.resource_id,
            session,
            &req.access_token,
            state.trust_score,
            now,
        ) {
            Ok(grant) => {
                info!(session, resource = %grant.resource.id, "resource granted");
                ResourceResponse {
                    granted: true,
                    resource_id: Some(grant.resource.id.clone()),
                    data: Some(grant.resource.data.clone()),
                    error: None,
                    valid_until: grant.valid_until,
                }
            }
            Err(err) => {
                warn!(session, resource = %req.resource_id, %err, "resource denied");
                ResourceResponse::denied(err.to_string())
            }
        };
        Ok(ServerMessage::ResourceResponse(response))
    }
}
