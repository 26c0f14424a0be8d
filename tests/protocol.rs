use shader_chain::verifier::CHALLENGE_EXPIRED;
use shader_chain::{
    update_client_state, ChallengeGenerator, ClientMessage, ClientSession, ClientSolver,
    ClientState, DrmServer, ProtocolConfig, ServerMessage, ShaderId, ShaderRegistry, StateChain,
    Verifier, VersionManifest,
};

const VERSION: &str = "1.0.0";
const SIGNING_SECRET: &str = "integration-secret";

fn build() -> (ShaderRegistry, Verifier) {
    let registry = ShaderRegistry::new("integration_build");
    let manifest = VersionManifest::build(&registry, VERSION, SIGNING_SECRET);
    (registry.clone(), Verifier::new(manifest, registry))
}

#[test]
fn trust_fifty_client_completes_shader_verify() {
    let (registry, verifier) = build();
    let mut state = ClientState::new("client-a", VERSION);
    assert_eq!(state.trust_score, 50);

    let challenge = ChallengeGenerator::default().generate(&state, "shader_verify");
    assert_eq!(challenge.difficulty, 3);

    let mut solver = ClientSolver::new("client-a", VERSION, registry);
    let response = solver.solve_challenge(&challenge).unwrap();
    assert!(response.work_result.starts_with("000"));

    let result = verifier.verify(&challenge, &response);
    assert!(result.valid, "{:?}", result.errors);
    assert!(result.errors.is_empty());

    update_client_state(&mut state, &challenge, &response, &result, 1);
    assert_eq!(state.trust_score, 55);
    assert_eq!(state.chain_length, 2);
    assert_eq!(state.last_chain_hash, solver.chain().chain_hash());
    assert_eq!(state.last_verified_at, Some(1));
}

#[test]
fn repeated_rounds_keep_chain_and_record_in_step() {
    let (registry, verifier) = build();
    let mut state = ClientState::new("client-b", VERSION);
    let mut solver = ClientSolver::new("client-b", VERSION, registry);
    let generator = ChallengeGenerator::default();

    for (round, work_type) in ["shader_verify", "folding_chain", "entropy_chain"]
        .into_iter()
        .enumerate()
    {
        let challenge = generator.generate(&state, work_type);
        let response = solver.solve_challenge(&challenge).unwrap();
        let result = verifier.verify(&challenge, &response);
        assert!(result.valid, "round {round}: {:?}", result.errors);
        update_client_state(&mut state, &challenge, &response, &result, round as u64);
    }

    assert_eq!(state.trust_score, 65);
    assert_eq!(state.chain_length, 7);
    assert_eq!(solver.chain().len(), 7);
    assert!(solver.chain().verify_integrity());

    let restored = StateChain::import(solver.chain().export()).unwrap();
    assert_eq!(restored.chain_hash(), state.last_chain_hash);
}

#[test]
fn different_build_salt_is_detected() {
    let (_, verifier) = build();
    let mut state = ClientState::new("client-c", VERSION);
    let challenge = ChallengeGenerator::default().generate(&state, "shader_verify");
    let mut solver = ClientSolver::new("client-c", VERSION, ShaderRegistry::new("patched_build"));
    let response = solver.solve_challenge(&challenge).unwrap();

    let result = verifier.verify(&challenge, &response);
    assert!(!result.valid);
    assert!(!result.shader_outputs_match);
    assert!(result.version_match && result.chain_integrity && result.work_valid);
    assert_eq!(
        result.errors,
        vec![format!("Shader output mismatch: {}", ShaderId::VersionProof)]
    );

    update_client_state(&mut state, &challenge, &response, &result, 0);
    assert_eq!(state.trust_score, 0);
}

#[test]
fn expired_challenge_reports_only_expiry() {
    let (registry, verifier) = build();
    let state = ClientState::new("client-d", VERSION);
    let challenge = ChallengeGenerator::new(0).generate_at(&state, "shader_verify", 1_000);
    let mut solver = ClientSolver::new("client-d", VERSION, registry);
    let response = solver.solve_challenge(&challenge).unwrap();

    let result = verifier.verify_at(&challenge, &response, 1_001);
    assert!(!result.valid);
    assert_eq!(result.errors, vec![CHALLENGE_EXPIRED]);
    assert!(!result.version_match && !result.chain_integrity);
    assert!(!result.work_valid && !result.shader_outputs_match);
}

#[test]
fn response_cannot_be_replayed_against_new_challenge() {
    let (registry, verifier) = build();
    let state = ClientState::with_trust("client-e", VERSION, 80);
    let generator = ChallengeGenerator::default();
    let first = generator.generate(&state, "shader_verify");
    let second = generator.generate(&state, "shader_verify");
    assert_ne!(
        first.seed_for("hash_compute"),
        second.seed_for("hash_compute")
    );

    let mut solver = ClientSolver::new("client-e", VERSION, registry);
    let mut response = solver.solve_challenge(&first).unwrap();
    response.challenge_id = second.challenge_id.clone();
    let result = verifier.verify(&second, &response);
    assert!(!result.valid);
    assert!(!result.shader_outputs_match);
}

#[test]
fn manifests_are_reproducible() {
    let registry = ShaderRegistry::new("integration_build");
    let a = VersionManifest::build_at(&registry, VERSION, SIGNING_SECRET, 1);
    let b = VersionManifest::build_at(&registry, VERSION, SIGNING_SECRET, 2);
    assert_eq!(a.shader_hashes, b.shader_hashes);
    assert_eq!(a.expected_outputs, b.expected_outputs);
    assert!(a.verify_signature(SIGNING_SECRET));
    assert!(!a.verify_signature("wrong"));
}

#[test]
fn server_session_gates_resources_by_trust() {
    let cfg = ProtocolConfig::default();
    let server = DrmServer::new(cfg.clone());
    let solver = ClientSolver::new(
        "session",
        cfg.version.clone(),
        ShaderRegistry::new(cfg.build_salt.clone()),
    );
    let mut client = ClientSession::new(solver, cfg.state_proof_links);

    let mut outgoing: Option<ClientMessage> = Some(client.init_message());
    let mut verdicts = 0;
    while let Some(message) = outgoing.take() {
        let reply = server.handle("session", message).unwrap();
        if let ServerMessage::VerifyResult(v) = &reply {
            assert!(v.result.valid, "{:?}", v.result.errors);
            verdicts += 1;
        }
        outgoing = client.handle(reply).unwrap();
        if outgoing.is_none() && verdicts < 3 {
            outgoing = Some(client.challenge_request("entropy_chain"));
        }
    }
    assert_eq!(client.trust_score(), Some(65));
    assert_eq!(client.chain_length(), 2 + 3 + 3);

    let expect = |resource: &str, granted: bool| {
        match server
            .handle("session", client.resource_request(resource))
            .unwrap()
        {
            ServerMessage::ResourceResponse(r) => {
                assert_eq!(r.granted, granted, "{resource}: {:?}", r.error)
            }
            other => panic!("unexpected reply {other:?}"),
        }
    };
    expect("public.status", true);
    expect("tier.standard", true);
    expect("tier.advanced", true);
    expect("tier.supreme", false);
    expect("tier.legendary", false);
}
