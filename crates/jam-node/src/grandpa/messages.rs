//! Vote and gossip wire messages.
//!
//! Gossip frames are a 4-byte little-endian length prefix followed by the
//! bincode body; votes are signed over the canonical pipe-separated round
//! string so signatures are independent of the frame encoding.

use serde::{Deserialize, Serialize};

use jam_crypto::ed25519;
use jam_types::{Hash, PublicKey, Signature};

use super::tree::BlockRecord;

/// Round stage a vote belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Prevote,
    Precommit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prevote => "prevote",
            Stage::Precommit => "precommit",
        }
    }
}

/// A single validator vote; `block_hash` is `None` for nil votes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMsg {
    pub round: u64,
    pub stage: Stage,
    pub block_hash: Option<Hash>,
    pub block_height: Option<u64>,
    pub state_root: Option<Hash>,
    pub validator: u32,
    pub signature: Signature,
}

/// Canonical signed form: `round|stage|hash|height|root` with `nil` for
/// absent fields.
pub fn vote_canonical(
    round: u64,
    stage: Stage,
    block_hash: Option<&Hash>,
    block_height: Option<u64>,
    state_root: Option<&Hash>,
) -> String {
    let hash = block_hash.map_or_else(|| "nil".to_string(), |h| h.to_hex());
    let height = block_height.map_or_else(|| "nil".to_string(), |h| h.to_string());
    let root = state_root.map_or_else(|| "nil".to_string(), |r| r.to_hex());
    format!("{round}|{}|{hash}|{height}|{root}", stage.as_str())
}

impl VoteMsg {
    pub fn canonical(&self) -> String {
        vote_canonical(
            self.round,
            self.stage,
            self.block_hash.as_ref(),
            self.block_height,
            self.state_root.as_ref(),
        )
    }

    pub fn verify(&self, public_key: &PublicKey) -> bool {
        ed25519::verify(public_key, self.canonical().as_bytes(), &self.signature)
    }
}

/// Justification attached to a finalized block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
    pub round: u64,
    pub block_hash: Hash,
    pub signatures: Vec<JustificationSignature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JustificationSignature {
    pub validator: u32,
    pub signature: Signature,
}

/// Everything that travels between finality peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PeerMessage {
    Vote(VoteMsg),
    Block(BlockRecord),
    Ready { node_id: u32 },
}

/// Frame a peer message: 4-byte little-endian length, then bincode.
pub fn encode_frame(message: &PeerMessage) -> Result<Vec<u8>, bincode::Error> {
    let body = bincode::serialize(message)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one frame from `buf`, returning the consumed length and the
/// message, or `None` if the buffer does not yet hold a full frame.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(usize, PeerMessage)>, bincode::Error> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return Ok(None);
    }
    let message = bincode::deserialize(&buf[4..4 + len])?;
    Ok(Some((4 + len, message)))
}
