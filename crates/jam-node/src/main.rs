//! jamline node binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use jam_crypto::{BandersnatchClient, VrfConfig};
use jam_node::authorize::Authorizer;
use jam_node::config::NodeConfig;
use jam_node::grandpa::{BlockTree, GrandpaConfig, GrandpaEngine, TcpGossip, VoteStore};
use jam_node::keys::{self, KeysFile};
use jam_node::pvm::HttpPvm;
use jam_node::server::{self, AppState, PvmDispatch};
use jam_node::store::StateStore;
use jam_stf::NoopPvm;

#[derive(Parser)]
#[command(name = "jam-node")]
#[command(about = "JAM-style L1 node: STF pipeline, Safrole production, GRANDPA finality")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node: HTTP surface, gossip, finality.
    Run {
        /// Validator index of this node; omit for an observer.
        #[arg(short, long)]
        validator: Option<u16>,

        /// Data directory.
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// HTTP listen address.
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        /// GRANDPA gossip listen address.
        #[arg(long, default_value = "127.0.0.1:7000")]
        gossip_listen: SocketAddr,

        /// GRANDPA peers as `id@host:port`, repeatable.
        #[arg(long = "peer")]
        peers: Vec<String>,

        /// Validator keys file.
        #[arg(long, default_value = "keys.json")]
        keys: PathBuf,

        /// Bandersnatch VRF service base URL.
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        vrf_url: String,

        /// PVM oracle base URL; omit to run without service execution.
        #[arg(long)]
        pvm_url: Option<String>,

        /// GRANDPA stage timeout in milliseconds (both stages).
        #[arg(long, default_value = "4000")]
        stage_timeout_ms: u64,
    },

    /// Generate a fresh validator keys file.
    GenKeys {
        /// Number of validators.
        #[arg(short, long, default_value = "3")]
        validators: u32,

        /// Output path.
        #[arg(short, long, default_value = "keys.json")]
        out: PathBuf,
    },

    /// Run one finality round over the last produced block and exit.
    Finalize {
        /// Data directory (block file, vote store).
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Validator keys file.
        #[arg(long, default_value = "keys.json")]
        keys: PathBuf,

        /// Validator index voting in this round.
        #[arg(short, long, default_value = "0")]
        validator: u16,
    },

    /// Print the current state root and exit.
    Info {
        /// Data directory.
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
}

fn parse_peer(raw: &str) -> anyhow::Result<(u32, SocketAddr)> {
    let (id, addr) = raw
        .split_once('@')
        .with_context(|| format!("peer `{raw}` is not of the form id@host:port"))?;
    Ok((id.parse()?, addr.parse()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "jam_node=info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            validator,
            data_dir,
            listen,
            gossip_listen,
            peers,
            keys,
            vrf_url,
            pvm_url,
            stage_timeout_ms,
        } => {
            let peers = peers
                .iter()
                .map(|p| parse_peer(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let config = NodeConfig {
                validator_index: validator,
                data_dir,
                listen,
                gossip_listen,
                peers,
                keys_file: keys,
                vrf_url,
                vrf_timeout: Duration::from_secs(10),
                pvm_url,
                prevote_timeout: Duration::from_millis(stage_timeout_ms),
                precommit_timeout: Duration::from_millis(stage_timeout_ms),
            };
            run_node(config).await
        }
        Command::GenKeys { validators, out } => {
            let keys = keys::generate(validators);
            std::fs::write(&out, serde_json::to_vec_pretty(&keys)?)?;
            tracing::info!(path = %out.display(), validators, "keys file written");
            Ok(())
        }
        Command::Finalize { data_dir, keys, validator } => finalize_once(data_dir, keys, validator).await,
        Command::Info { data_dir } => {
            let store = StateStore::new(data_dir.join("updated_state.json"));
            let document = store.load().context("no state document; run the node first")?;
            println!("tau: {}", document.state.tau);
            println!("state_root: {}", jam_merkle::state_root(&document.state));
            println!("last_updated: {}", document.metadata.last_updated);
            Ok(())
        }
    }
}

/// One-shot finalization of the last produced block, without gossip peers.
/// Meaningful for single-validator setups and for driving tests.
async fn finalize_once(data_dir: PathBuf, keys_path: PathBuf, validator: u16) -> anyhow::Result<()> {
    let keys = KeysFile::load(&keys_path)?;
    let signing_key = keys.signing_key(validator as u32)?;

    let raw = std::fs::read_to_string(data_dir.join("block_produced.json"))
        .context("no block_produced.json; produce a block first")?;
    let block_file: jam_node::store::BlockFile = serde_json::from_str(&raw)?;

    let tree = Arc::new(Mutex::new(BlockTree::new()));
    let gossip = TcpGossip::new(validator as u32, vec![], Arc::clone(&tree));
    let vote_store = VoteStore::open(
        &data_dir.join("grandpa_votes.jsonl"),
        &data_dir.join("grandpa_finalized.json"),
    )?;

    let mut engine = GrandpaEngine::new(
        GrandpaConfig {
            node_id: validator as u32,
            validators: keys.public_keys(),
            prevote_timeout: Duration::ZERO,
            precommit_timeout: Duration::ZERO,
        },
        signing_key,
        gossip,
        vote_store,
        tree,
    )?;

    engine
        .announce_block(jam_node::grandpa::BlockRecord {
            hash: block_file.block_hash,
            parent: None,
            height: block_file.header.slot as u64,
            state_root: block_file.header.state_root,
            slot: block_file.header.slot,
            author: block_file.header.author_index as u32,
            audited: true,
        })
        .await;

    let outcome = engine.run_round().await?;
    match outcome.finalized {
        Some(hash) => println!("finalized {hash} in round {}", outcome.round),
        None => println!("no finalization in round {}", outcome.round),
    }
    Ok(())
}

async fn run_node(config: NodeConfig) -> anyhow::Result<()> {
    let keys = KeysFile::load(&config.keys_file)
        .with_context(|| format!("loading keys from {}", config.keys_file.display()))?;

    let node_id = config.validator_index.unwrap_or(0) as u32;
    let signing_key = keys.signing_key(node_id)?;

    let vrf = BandersnatchClient::new(VrfConfig {
        base_url: config.vrf_url.clone(),
        timeout: config.vrf_timeout,
    })?;

    let pvm = match &config.pvm_url {
        Some(url) => PvmDispatch::Http(HttpPvm::new(url.clone(), config.vrf_timeout)?),
        None => PvmDispatch::Disabled(NoopPvm),
    };

    // GRANDPA wiring: shared block tree, TCP gossip, persisted votes.
    let tree = Arc::new(Mutex::new(BlockTree::new()));
    let gossip = TcpGossip::new(node_id, config.peers.clone(), Arc::clone(&tree));
    gossip.start(config.gossip_listen).await?;

    let vote_store = VoteStore::open(&config.votes_path(), &config.finalized_path())?;
    let mut grandpa = GrandpaEngine::new(
        GrandpaConfig {
            node_id,
            validators: keys.public_keys(),
            prevote_timeout: config.prevote_timeout,
            precommit_timeout: config.precommit_timeout,
        },
        signing_key,
        gossip,
        vote_store,
        tree,
    )?;
    grandpa.replay_persisted_votes()?;

    let state = Arc::new(AppState {
        state_store: StateStore::new(config.state_path()),
        authorizer: Authorizer::new(),
        vrf,
        pvm,
        grandpa: tokio::sync::Mutex::new(grandpa),
        keys,
        config: config.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!(listen = %config.listen, validator = ?config.validator_index, "node listening");
    axum::serve(listener, server::router(state)).await?;
    Ok(())
}
