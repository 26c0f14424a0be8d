//! Shared store of active challenges and client records.
//!
//! Challenges are keyed by id and consumed at most once. Client records sit
//! behind their own mutex so that verifications for one client serialize
//! while different clients proceed in parallel.

use crate::challenge::DrmChallenge;
use crate::error::StoreError;
use crate::state::ClientState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A challenge waiting for its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    /// Session the challenge was issued to.
    pub client_id: String,
    /// The challenge itself.
    pub challenge: DrmChallenge,
}

type SharedClient = Arc<Mutex<ClientState>>;

/// Owned store passed to the server driver; no global state.
#[derive(Debug, Default)]
pub struct ProtocolStore {
    challenges: Mutex<HashMap<String, PendingChallenge>>,
    clients: Mutex<HashMap<String, SharedClient>>,
}

impl ProtocolStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `client_id`, creating it with `init` if absent.
    pub fn register_client(
        &self,
        client_id: &str,
        init: impl FnOnce() -> ClientState,
    ) -> Result<ClientState, StoreError> {
        let shared = {
            let mut clients = self
                .clients
                .lock()
                .map_err(|_| StoreError::Poisoned("clients"))?;
            clients
                .entry(client_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(init())))
                .clone()
        };
        let state = shared
            .lock()
            .map_err(|_| StoreError::Poisoned("client record"))?;
        Ok(state.clone())
    }

    /// Snapshot of a client record.
    pub fn client(&self, client_id: &str) -> Result<Option<ClientState>, StoreError> {
        match self.shared(client_id)? {
            Some(shared) => {
                let state = shared
                    .lock()
                    .map_err(|_| StoreError::Poisoned("client record"))?;
                Ok(Some(state.clone()))
            }
            None => Ok(None),
        }
    }

    /// Runs `f` with exclusive access to one client record.
    ///
    /// Returns `Ok(None)` when the client is unknown.
    pub fn with_client<R>(
        &self,
        client_id: &str,
        f: impl FnOnce(&mut ClientState) -> R,
    ) -> Result<Option<R>, StoreError> {
        let Some(shared) = self.shared(client_id)? else {
            return Ok(None);
        };
        let mut state = shared
            .lock()
            .map_err(|_| StoreError::Poisoned("client record"))?;
        Ok(Some(f(&mut state)))
    }

    fn shared(&self, client_id: &str) -> Result<Option<SharedClient>, StoreError> {
        let clients = self
            .clients
            .lock()
            .map_err(|_| StoreError::Poisoned("clients"))?;
        Ok(clients.get(client_id).cloned())
    }

    /// Records an issued challenge.
    pub fn insert_challenge(
        &self,
        client_id: &str,
        challenge: DrmChallenge,
    ) -> Result<(), StoreError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|_| StoreError::Poisoned("challenges"))?;
        challenges.insert(
            challenge.challenge_id.clone(),
            PendingChallenge {
                client_id: client_id.to_string(),
                challenge,
            },
        );
        Ok(())
    }

    /// Removes and returns the challenge with `challenge_id`.
    ///
    /// A second call for the same id returns `None`.
    pub fn take_challenge(&self, challenge_id: &str) -> Result<Option<PendingChallenge>, StoreError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|_| StoreError::Poisoned("challenges"))?;
        Ok(challenges.remove(challenge_id))
    }

    /// Removes and returns the challenge only if it was issued to `client_id`.
    ///
    /// A challenge answered from a foreign session stays pending for its owner.
    pub fn take_challenge_for(
        &self,
        challenge_id: &str,
        client_id: &str,
    ) -> Result<Option<PendingChallenge>, StoreError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|_| StoreError::Poisoned("challenges"))?;
        match challenges.get(challenge_id) {
            Some(pending) if pending.client_id == client_id => Ok(challenges.remove(challenge_id)),
            _ => Ok(None),
        }
    }

    /// Number of challenges awaiting a response.
    pub fn pending_challenges(&self) -> Result<usize, StoreError> {
        let challenges = self
            .challenges
            .lock()
            .map_err(|_| StoreError::Poisoned("challenges"))?;
        Ok(challenges.len())
    }

    /// Drops every challenge expired as of `now`; returns how many were removed.
    pub fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|_| StoreError::Poisoned("challenges"))?;
        let before = challenges.len();
        challenges.retain(|_, pending| !pending.challenge.is_expired_at(now));
        let purged = before - challenges.len();
        if purged > 0 {
            debug!(purged, "purged expired challenges");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeGenerator;
    use std::thread;

    fn challenge(now: u64) -> DrmChallenge {
        let state = ClientState::new("a", "1.0.0");
        ChallengeGenerator::new(10).generate_at(&state, "shader_verify", now)
    }

    #[test]
    fn challenges_are_taken_once() {
        let store = ProtocolStore::new();
        let ch = challenge(0);
        let id = ch.challenge_id.clone();
        store.insert_challenge("a", ch.clone()).unwrap();
        let pending = store.take_challenge(&id).unwrap().unwrap();
        assert_eq!(pending.client_id, "a");
        assert_eq!(pending.challenge, ch);
        assert_eq!(store.take_challenge(&id).unwrap(), None);
    }

    #[test]
    fn foreign_session_cannot_take() {
        let store = ProtocolStore::new();
        let ch = challenge(0);
        let id = ch.challenge_id.clone();
        store.insert_challenge("a", ch).unwrap();
        assert_eq!(store.take_challenge_for(&id, "b").unwrap(), None);
        assert!(store.take_challenge_for(&id, "a").unwrap().is_some());
        assert_eq!(store.take_challenge_for(&id, "a").unwrap(), None);
    }

    #[test]
    fn purge_drops_only_expired() {
        let store = ProtocolStore::new();
        let old = challenge(0);
        let fresh = challenge(100);
        let fresh_id = fresh.challenge_id.clone();
        store.insert_challenge("a", old).unwrap();
        store.insert_challenge("a", fresh).unwrap();
        assert_eq!(store.purge_expired(50).unwrap(), 1);
        assert_eq!(store.pending_challenges().unwrap(), 1);
        assert!(store.take_challenge(&fresh_id).unwrap().is_some());
    }

    #[test]
    fn register_keeps_existing_record() {
        let store = ProtocolStore::new();
        store
            .register_client("a", || ClientState::with_trust("a", "1.0.0", 70))
            .unwrap();
        let again = store
            .register_client("a", || ClientState::new("a", "2.0.0"))
            .unwrap();
        assert_eq!(again.trust_score, 70);
        assert_eq!(store.client("b").unwrap(), None);
        assert_eq!(store.with_client("b", |_| ()).unwrap(), None);
    }

    #[test]
    fn per_client_updates_serialize() {
        let store = Arc::new(ProtocolStore::new());
        store
            .register_client("a", || ClientState::new("a", "1.0.0"))
            .unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store
                            .with_client("a", |state| state.chain_length += 1)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.client("a").unwrap().unwrap().chain_length, 800);
    }
}
