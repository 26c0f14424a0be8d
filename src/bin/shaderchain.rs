//! Command-line front end for the shader-chain protocol.
//!
//! Prints the build manifest, re-runs the shader self-check, plays a local
//! client/server exchange, and (with the `net` feature) serves sessions over
//! TCP.

#[cfg(feature = "net")]
use shader_chain::net::{run_drm_server, DrmServerConfig};
use shader_chain::{
    ClientSession, ClientSolver, DrmServer, ProtocolConfig, ServerMessage,
    ShaderRegistry, VersionManifest,
};
#[cfg(feature = "net")]
use std::net::SocketAddr;
use std::{env, path::Path};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_SESSION: &str = "demo-session";
const DEMO_WORK_TYPES: [&str; 3] = ["shader_verify", "folding_chain", "entropy_chain"];
const DEMO_RESOURCES: [&str; 5] = [
    "public.status",
    "tier.standard",
    "tier.advanced",
    "tier.supreme",
    "tier.legendary",
];
const TAMPERED_BUILD_SALT: &str = "patched_build";

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "shader_chain=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_help() {
    println!("Usage: shaderchain [--config <file>] <command> ...");
    println!("  manifest [--version <V>]");
    println!("  self-test");
    println!("  demo [--rounds <N>] [--tamper]");
    #[cfg(feature = "net")]
    println!("  serve --listen <ADDR>");
}

fn main() {
    init_tracing();
    let mut args: Vec<String> = env::args().skip(1).collect();
    let config = take_config(&mut args);
    let mut args = args.into_iter();
    match args.next().as_deref() {
        Some("manifest") => cmd_manifest(config, args.collect()),
        Some("self-test") => cmd_self_test(config),
        Some("demo") => cmd_demo(config, args.collect()),
        #[cfg(feature = "net")]
        Some("serve") => cmd_serve(config, args.collect()),
        Some("-h") | Some("--help") => print_help(),
        _ => {
            print_help();
            std::process::exit(1);
        }
    }
}

fn take_config(args: &mut Vec<String>) -> ProtocolConfig {
    let mut config = match args.iter().position(|a| a == "--config") {
        Some(pos) => {
            if pos + 1 >= args.len() {
                fatal("--config expects a path");
            }
            let path = args.remove(pos + 1);
            args.remove(pos);
            ProtocolConfig::load(Path::new(&path))
                .unwrap_or_else(|err| fatal(&format!("failed to load {path}: {err}")))
        }
        None => ProtocolConfig::default(),
    };
    config
        .apply_env()
        .unwrap_or_else(|err| fatal(&err.to_string()));
    config
}

fn cmd_manifest(mut config: ProtocolConfig, args: Vec<String>) {
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" => {
                config.version = iter
                    .next()
                    .unwrap_or_else(|| fatal("--version expects a value"));
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    let registry = ShaderRegistry::new(config.build_salt.clone());
    let manifest = VersionManifest::build(&registry, &config.version, &config.signing_secret);
    match serde_json::to_string_pretty(&manifest) {
        Ok(json) => println!("{json}"),
        Err(err) => fatal(&format!("failed to encode manifest: {err}")),
    }
}

fn cmd_self_test(config: ProtocolConfig) {
    let registry = ShaderRegistry::new(config.build_salt.clone());
    let drifted = registry.self_check();
    for (id, vector) in registry.test_vectors() {
        let status = if drifted.contains(&id) { "DRIFT" } else { "ok" };
        println!("{:<16} {status:<6} {}", id.as_str(), vector.expected);
    }
    let manifest = VersionManifest::build(&registry, &config.version, &config.signing_secret);
    if !manifest.verify_signature(&config.signing_secret) {
        fatal("manifest signature does not verify");
    }
    if !drifted.is_empty() {
        fatal(&format!("{} shader(s) drifted from their reference outputs", drifted.len()));
    }
    println!("self-test passed for version {}", config.version);
}

fn cmd_demo(config: ProtocolConfig, args: Vec<String>) {
    let mut rounds = 5usize;
    let mut tamper = false;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--rounds" => {
                let value = iter
                    .next()
                    .unwrap_or_else(|| fatal("--rounds expects a value"));
                rounds = value
                    .parse()
                    .unwrap_or_else(|_| fatal("invalid --rounds value"));
            }
            "--tamper" => tamper = true,
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    let server = DrmServer::new(config.clone());
    let salt = if tamper {
        TAMPERED_BUILD_SALT.to_string()
    } else {
        config.build_salt.clone()
    };
    let solver = ClientSolver::new(DEMO_SESSION, config.version.clone(), ShaderRegistry::new(salt));
    let mut client = ClientSession::new(solver, config.state_proof_links);

    let mut outgoing = Some(client.init_message());
    let mut round = 0usize;
    while let Some(message) = outgoing.take() {
        let reply = server
            .handle(DEMO_SESSION, message)
            .unwrap_or_else(|err| fatal(&err.to_string()));
        if let ServerMessage::VerifyResult(verdict) = &reply {
            round += 1;
            let trust = verdict.updated_state.map(|s| s.trust_score);
            println!(
                "round {round}: valid={} trust={} errors={:?}",
                verdict.result.valid,
                trust.map_or_else(|| "-".to_string(), |t| t.to_string()),
                verdict.result.errors
            );
        }
        outgoing = client
            .handle(reply)
            .unwrap_or_else(|err| fatal(&err.to_string()));
        if outgoing.is_none() && round < rounds {
            let work_type = DEMO_WORK_TYPES[round % DEMO_WORK_TYPES.len()];
            outgoing = Some(client.challenge_request(work_type));
        }
    }

    for resource in DEMO_RESOURCES {
        let reply = server
            .handle(DEMO_SESSION, client.resource_request(resource))
            .unwrap_or_else(|err| fatal(&err.to_string()));
        match reply {
            ServerMessage::ResourceResponse(r) if r.granted => println!("{resource:<16} granted"),
            ServerMessage::ResourceResponse(r) => println!(
                "{resource:<16} denied: {}",
                r.error.unwrap_or_default()
            ),
            other => println!("{resource:<16} unexpected reply: {other:?}"),
        }
    }
}

#[cfg(feature = "net")]
fn cmd_serve(config: ProtocolConfig, args: Vec<String>) {
    let mut listen: Option<SocketAddr> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--listen" => {
                let value = iter
                    .next()
                    .unwrap_or_else(|| fatal("--listen expects an address"));
                listen = Some(
                    value
                        .parse()
                        .unwrap_or_else(|_| fatal("invalid --listen address")),
                );
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    let listen = listen.unwrap_or_else(|| fatal("--listen is required"));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| fatal(&format!("failed to start runtime: {err}")));
    if let Err(err) = runtime.block_on(run_drm_server(DrmServerConfig::new(listen, config))) {
        fatal(&format!("server error: {err}"));
    }
}
