//! Node configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the node needs to run; built from CLI arguments.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Our validator index, `None` for observers.
    pub validator_index: Option<u16>,
    /// Data directory: canonical state document, vote store, block files.
    pub data_dir: PathBuf,
    /// HTTP listen address.
    pub listen: SocketAddr,
    /// GRANDPA gossip listen address.
    pub gossip_listen: SocketAddr,
    /// GRANDPA peers: `(node id, address)`.
    pub peers: Vec<(u32, SocketAddr)>,
    /// Path to the validator keys file.
    pub keys_file: PathBuf,
    /// Bandersnatch VRF service base URL.
    pub vrf_url: String,
    /// VRF request timeout.
    pub vrf_timeout: Duration,
    /// PVM oracle base URL; `None` disables service execution.
    pub pvm_url: Option<String>,
    /// GRANDPA prevote collection window.
    pub prevote_timeout: Duration,
    /// GRANDPA precommit collection window.
    pub precommit_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            validator_index: None,
            data_dir: PathBuf::from("./data"),
            listen: "127.0.0.1:8080".parse().expect("static address"),
            gossip_listen: "127.0.0.1:7000".parse().expect("static address"),
            peers: Vec::new(),
            keys_file: PathBuf::from("keys.json"),
            vrf_url: "http://127.0.0.1:3000".into(),
            vrf_timeout: Duration::from_secs(10),
            pvm_url: None,
            prevote_timeout: Duration::from_secs(4),
            precommit_timeout: Duration::from_secs(4),
        }
    }
}

impl NodeConfig {
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("updated_state.json")
    }

    pub fn block_file_path(&self) -> PathBuf {
        self.data_dir.join("block_produced.json")
    }

    pub fn votes_path(&self) -> PathBuf {
        self.data_dir.join("grandpa_votes.jsonl")
    }

    pub fn finalized_path(&self) -> PathBuf {
        self.data_dir.join("grandpa_finalized.json")
    }
}
