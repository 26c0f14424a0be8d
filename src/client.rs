//! Client-side session bookkeeping around [`ClientSolver`].
//!
//! The session answers challenges as they arrive and remembers what the
//! server last reported: trust score, accepted chain length and the current
//! access token. Responses awaiting a verdict are tracked in send order.
//! Links from a response the server hard-rejected, or answered with an error
//! instead of a verdict, are rolled back so the local chain keeps matching
//! the server's view of its head.

use crate::chain::StateChain;
use crate::challenge::DrmChallenge;
use crate::error::SolveError;
use crate::messages::{
    ChallengeRequest, ClientMessage, InitRequest, ResourceRequest, ServerMessage,
};
use crate::solver::ClientSolver;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct AwaitingVerdict {
    challenge_id: String,
    chain_before: StateChain,
}

/// One client's view of its session with a server.
#[derive(Debug, Clone)]
pub struct ClientSession {
    solver: ClientSolver,
    state_proof_links: usize,
    trust_score: Option<u32>,
    chain_length: u64,
    access_token: Option<String>,
    awaiting: VecDeque<AwaitingVerdict>,
}

impl ClientSession {
    /// Session driving `solver`; resource requests attach the last
    /// `state_proof_links` links.
    pub fn new(solver: ClientSolver, state_proof_links: usize) -> Self {
        Self {
            solver,
            state_proof_links,
            trust_score: None,
            chain_length: 0,
            access_token: None,
            awaiting: VecDeque::new(),
        }
    }

    /// The underlying solver.
    pub fn solver(&self) -> &ClientSolver {
        &self.solver
    }

    /// Trust score last reported by the server.
    pub fn trust_score(&self) -> Option<u32> {
        self.trust_score
    }

    /// Chain length last reported by the server.
    pub fn chain_length(&self) -> u64 {
        self.chain_length
    }

    /// Current access token, if any.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Responses sent but not yet answered by a `verify-result`.
    pub fn awaiting_verdicts(&self) -> usize {
        self.awaiting.len()
    }

    /// Opening message.
    pub fn init_message(&self) -> ClientMessage {
        ClientMessage::Init(InitRequest {
            client_version: self.solver.version().to_string(),
        })
    }

    /// Asks for a challenge of `work_type`.
    pub fn challenge_request(&self, work_type: &str) -> ClientMessage {
        ClientMessage::ChallengeRequest(ChallengeRequest {
            work_type: work_type.to_string(),
        })
    }

    /// Requests `resource_id` with the current token and a short state proof.
    pub fn resource_request(&self, resource_id: &str) -> ClientMessage {
        ClientMessage::ResourceRequest(ResourceRequest {
            resource_id: resource_id.to_string(),
            access_token: self.access_token.clone().unwrap_or_default(),
            state_proof: self.solver.chain().tail(self.state_proof_links).to_vec(),
        })
    }

    /// Processes a server message, returning the reply to send, if any.
    ///
    /// Challenges are solved synchronously; hosts with latency constraints
    /// should call this off their event loop.
    pub fn handle(&mut self, message: ServerMessage) -> Result<Option<ClientMessage>, SolveError> {
        match message {
            ServerMessage::InitAck(ack) => {
                self.trust_score = Some(ack.client_state.trust_score);
                self.chain_length = ack.client_state.chain_length;
                if !ack.version_match {
                    warn!(server_version = %ack.server_version, "server reports version mismatch");
                }
                match ack.initial_challenge {
                    Some(challenge) => self.answer(&challenge).map(Some),
                    None => Ok(None),
                }
            }
            ServerMessage::Challenge(challenge) => self.answer(&challenge).map(Some),
            ServerMessage::VerifyResult(verdict) => {
                let sent = self.awaiting.pop_front();
                if verdict.result.is_protocol_rejection() {
                    if let Some(sent) = sent {
                        warn!(challenge = %sent.challenge_id, "response rejected, rolling back links");
                        self.solver.reset_chain(sent.chain_before);
                    }
                }
                if let Some(state) = verdict.updated_state {
                    self.trust_score = Some(state.trust_score);
                    self.chain_length = state.chain_length;
                }
                if let Some(token) = verdict.access_token {
                    self.access_token = Some(token);
                }
                debug!(valid = verdict.result.valid, trust = ?self.trust_score, "verdict received");
                Ok(None)
            }
            ServerMessage::ResourceResponse(response) => {
                if !response.granted {
                    warn!(error = ?response.error, "resource denied");
                }
                Ok(None)
            }
            ServerMessage::Error(err) => {
                warn!(error = %err.error, "server error");
                // The server never looked at the oldest pending response.
                if let Some(sent) = self.awaiting.pop_front() {
                    warn!(challenge = %sent.challenge_id, "response not accepted, rolling back links");
                    self.solver.reset_chain(sent.chain_before);
                }
                Ok(None)
            }
        }
    }

    fn answer(&mut self, challenge: &DrmChallenge) -> Result<ClientMessage, SolveError> {
        let chain_before = self.solver.chain().clone();
        let response = self.solver.solve_challenge(challenge)?;
        self.awaiting.push_back(AwaitingVerdict {
            challenge_id: challenge.challenge_id.clone(),
            chain_before,
        });
        Ok(ClientMessage::Response(response))
    }
}
