//! Vote gossip between finality peers.
//!
//! Plain TCP with length-prefixed bincode frames. Three concerns run as
//! separate tasks: the accept/ingest loop (inbound frames into the stage
//! buffers and the block tree), the peer dialer (reconnect loop), and the
//! round driver (the engine itself, which only touches the transport through
//! [`VoteTransport`]).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

use super::messages::{decode_frame, encode_frame, PeerMessage, Stage, VoteMsg};
use super::tree::BlockTree;

/// Transport seam between the round driver and the network.
///
/// The TCP implementation is [`TcpGossip`]; tests drive the engine with an
/// in-memory implementation.
#[allow(async_fn_in_trait)]
pub trait VoteTransport {
    /// Best-effort broadcast to all connected peers.
    async fn broadcast(&self, message: &PeerMessage);

    /// Feed our own vote into the local buffers so it is tallied alongside
    /// received ones.
    fn enqueue_vote(&self, vote: VoteMsg);

    /// Drain the buffered votes of one stage, keeping only the given round.
    fn collect(&self, stage: Stage, round: u64) -> Vec<VoteMsg>;
}

#[derive(Default)]
struct StageBuffers {
    prevotes: Vec<VoteMsg>,
    precommits: Vec<VoteMsg>,
}

impl StageBuffers {
    fn push(&mut self, vote: VoteMsg) {
        match vote.stage {
            Stage::Prevote => self.prevotes.push(vote),
            Stage::Precommit => self.precommits.push(vote),
        }
    }

    fn drain(&mut self, stage: Stage) -> Vec<VoteMsg> {
        match stage {
            Stage::Prevote => std::mem::take(&mut self.prevotes),
            Stage::Precommit => std::mem::take(&mut self.precommits),
        }
    }
}

/// TCP gossip node.
pub struct TcpGossip {
    node_id: u32,
    peers: Vec<(u32, SocketAddr)>,
    buffers: Arc<Mutex<StageBuffers>>,
    writers: Arc<tokio::sync::Mutex<HashMap<u32, OwnedWriteHalf>>>,
    tree: Arc<Mutex<BlockTree>>,
}

impl TcpGossip {
    pub fn new(node_id: u32, peers: Vec<(u32, SocketAddr)>, tree: Arc<Mutex<BlockTree>>) -> Self {
        Self {
            node_id,
            peers,
            buffers: Arc::new(Mutex::new(StageBuffers::default())),
            writers: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            tree,
        }
    }

    /// Bind the listener and spawn the ingest and dialer tasks.
    pub async fn start(&self, listen: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(listen).await?;
        tracing::info!(node = self.node_id, %listen, "gossip listening");

        let buffers = Arc::clone(&self.buffers);
        let tree = Arc::clone(&self.tree);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "inbound gossip connection");
                        let buffers = Arc::clone(&buffers);
                        let tree = Arc::clone(&tree);
                        tokio::spawn(ingest_connection(stream, buffers, tree));
                    }
                    Err(e) => {
                        tracing::warn!(%e, "gossip accept failed");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        });

        self.spawn_dialer();
        Ok(())
    }

    /// Reconnect loop: keep one outbound connection per peer alive.
    fn spawn_dialer(&self) {
        let peers = self.peers.clone();
        let writers = Arc::clone(&self.writers);
        let node_id = self.node_id;
        tokio::spawn(async move {
            loop {
                for (peer_id, addr) in &peers {
                    if *peer_id == node_id {
                        continue;
                    }
                    let connected = writers.lock().await.contains_key(peer_id);
                    if connected {
                        continue;
                    }
                    match TcpStream::connect(addr).await {
                        Ok(stream) => {
                            tracing::info!(peer = peer_id, %addr, "gossip peer connected");
                            let (_, write_half) = stream.into_split();
                            writers.lock().await.insert(*peer_id, write_half);
                        }
                        Err(e) => {
                            tracing::debug!(peer = peer_id, %e, "gossip dial failed");
                        }
                    }
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
    }

}

async fn ingest_connection(
    stream: TcpStream,
    buffers: Arc<Mutex<StageBuffers>>,
    tree: Arc<Mutex<BlockTree>>,
) {
    let (mut read_half, _) = stream.into_split();
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match decode_frame(&buf) {
                        Ok(Some((consumed, message))) => {
                            buf.drain(..consumed);
                            dispatch(message, &buffers, &tree);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(%e, "malformed gossip frame, dropping connection");
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(%e, "gossip connection closed");
                break;
            }
        }
    }
}

fn dispatch(message: PeerMessage, buffers: &Mutex<StageBuffers>, tree: &Mutex<BlockTree>) {
    match message {
        PeerMessage::Vote(vote) => {
            buffers.lock().expect("gossip buffer lock").push(vote);
        }
        PeerMessage::Block(record) => {
            tracing::debug!(hash = %record.hash, "block imported from gossip");
            tree.lock().expect("block tree lock").add_block(record);
        }
        PeerMessage::Ready { node_id } => {
            tracing::debug!(node_id, "peer ready");
        }
    }
}

impl VoteTransport for TcpGossip {
    async fn broadcast(&self, message: &PeerMessage) {
        let frame = match encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(%e, "failed to encode gossip frame");
                return;
            }
        };

        let mut writers = self.writers.lock().await;
        let mut dead: Vec<u32> = Vec::new();
        for (peer_id, writer) in writers.iter_mut() {
            if let Err(e) = writer.write_all(&frame).await {
                tracing::debug!(peer = peer_id, %e, "gossip write failed, dropping peer");
                dead.push(*peer_id);
            }
        }
        for peer_id in dead {
            writers.remove(&peer_id);
        }
    }

    fn enqueue_vote(&self, vote: VoteMsg) {
        self.buffers.lock().expect("gossip buffer lock").push(vote);
    }

    fn collect(&self, stage: Stage, round: u64) -> Vec<VoteMsg> {
        let drained = self.buffers.lock().expect("gossip buffer lock").drain(stage);
        let (matching, stale): (Vec<_>, Vec<_>) =
            drained.into_iter().partition(|v| v.round == round);
        if !stale.is_empty() {
            tracing::debug!(stage = stage.as_str(), dropped = stale.len(), "stale votes dropped");
        }
        matching
    }
}

#[cfg(test)]
mod tests {
    use jam_types::{Hash, Signature};

    use super::*;

    fn vote(stage: Stage, round: u64, validator: u32) -> VoteMsg {
        VoteMsg {
            round,
            stage,
            block_hash: Some(Hash::from_bytes([1; 32])),
            block_height: Some(1),
            state_root: None,
            validator,
            signature: Signature::zero(),
        }
    }

    #[test]
    fn buffers_separate_stages() {
        let mut buffers = StageBuffers::default();
        buffers.push(vote(Stage::Prevote, 0, 1));
        buffers.push(vote(Stage::Precommit, 0, 2));
        assert_eq!(buffers.drain(Stage::Prevote).len(), 1);
        assert_eq!(buffers.drain(Stage::Prevote).len(), 0);
        assert_eq!(buffers.drain(Stage::Precommit).len(), 1);
    }

    #[tokio::test]
    async fn collect_filters_round() {
        let tree = Arc::new(Mutex::new(BlockTree::new()));
        let gossip = TcpGossip::new(0, vec![], tree);
        gossip.enqueue_vote(vote(Stage::Prevote, 1, 1));
        gossip.enqueue_vote(vote(Stage::Prevote, 2, 2));
        let collected = gossip.collect(Stage::Prevote, 2);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].validator, 2);
    }

    #[tokio::test]
    async fn votes_flow_over_tcp() {
        let tree_a = Arc::new(Mutex::new(BlockTree::new()));
        let tree_b = Arc::new(Mutex::new(BlockTree::new()));

        let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(listen).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let receiver = TcpGossip::new(1, vec![], tree_b);
        receiver.start(addr).await.unwrap();

        let sender = TcpGossip::new(0, vec![(1, addr)], tree_a);
        sender.spawn_dialer();

        // wait for the dialer to connect
        for _ in 0..50 {
            if sender.writers.lock().await.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        sender.broadcast(&PeerMessage::Vote(vote(Stage::Prevote, 0, 7))).await;

        for _ in 0..50 {
            let collected = receiver.collect(Stage::Prevote, 0);
            if !collected.is_empty() {
                assert_eq!(collected[0].validator, 7);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("vote never arrived");
    }
}
