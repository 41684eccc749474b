//! Persisted vote table and finalized pointer.
//!
//! Votes are appended as JSON lines through a single writer; the engine
//! persists every vote before counting it, so a crash mid-round can replay
//! the table on restart. The finalized pointer is a small JSON document
//! rewritten on every finalization.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use jam_types::Hash;

use super::messages::VoteMsg;

#[derive(Debug, thiserror::Error)]
pub enum VoteStoreError {
    #[error("vote store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vote store record malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct PersistedVote {
    #[serde(flatten)]
    vote: VoteMsg,
    received_at: String,
}

#[derive(Serialize, Deserialize)]
struct FinalizedPointer {
    block_hash: Hash,
    finalized_at: String,
}

/// Single-writer vote persistence.
pub struct VoteStore {
    votes_path: PathBuf,
    finalized_path: PathBuf,
    writer: Mutex<File>,
}

impl VoteStore {
    pub fn open(votes_path: &Path, finalized_path: &Path) -> Result<Self, VoteStoreError> {
        if let Some(parent) = votes_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = OpenOptions::new().create(true).append(true).open(votes_path)?;
        Ok(Self {
            votes_path: votes_path.to_path_buf(),
            finalized_path: finalized_path.to_path_buf(),
            writer: Mutex::new(writer),
        })
    }

    /// Append one vote; flushed before returning so the record survives a
    /// crash immediately after.
    pub fn persist_vote(&self, vote: &VoteMsg) -> Result<(), VoteStoreError> {
        let record = PersistedVote {
            vote: vote.clone(),
            received_at: chrono::Utc::now().to_rfc3339(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().expect("vote store writer lock");
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }

    /// All persisted votes, oldest first.
    pub fn load_votes(&self) -> Result<Vec<VoteMsg>, VoteStoreError> {
        let file = match File::open(&self.votes_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut votes = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: PersistedVote = serde_json::from_str(&line)?;
            votes.push(record.vote);
        }
        Ok(votes)
    }

    /// Rewrite the finalized pointer.
    pub fn store_finalized(&self, block_hash: &Hash) -> Result<(), VoteStoreError> {
        let pointer = FinalizedPointer {
            block_hash: *block_hash,
            finalized_at: chrono::Utc::now().to_rfc3339(),
        };
        std::fs::write(&self.finalized_path, serde_json::to_vec_pretty(&pointer)?)?;
        Ok(())
    }

    /// The finalized pointer, if one was ever stored.
    pub fn load_finalized(&self) -> Result<Option<Hash>, VoteStoreError> {
        match std::fs::read_to_string(&self.finalized_path) {
            Ok(raw) => {
                let pointer: FinalizedPointer = serde_json::from_str(&raw)?;
                Ok(Some(pointer.block_hash))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use jam_types::Signature;

    use super::super::messages::Stage;
    use super::*;

    fn vote(round: u64, validator: u32) -> VoteMsg {
        VoteMsg {
            round,
            stage: Stage::Prevote,
            block_hash: Some(Hash::from_bytes([1; 32])),
            block_height: Some(1),
            state_root: None,
            validator,
            signature: Signature::zero(),
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> VoteStore {
        VoteStore::open(&dir.path().join("votes.jsonl"), &dir.path().join("finalized.json"))
            .unwrap()
    }

    #[test]
    fn votes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(&dir);
            store.persist_vote(&vote(0, 1)).unwrap();
            store.persist_vote(&vote(0, 2)).unwrap();
        }
        let store = open_store(&dir);
        let votes = store.load_votes().unwrap();
        assert_eq!(votes.len(), 2);
        assert_eq!(votes[0].validator, 1);
        assert_eq!(votes[1].validator, 2);
    }

    #[test]
    fn empty_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.load_votes().unwrap().is_empty());
        assert!(store.load_finalized().unwrap().is_none());
    }

    #[test]
    fn finalized_pointer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let hash = Hash::from_bytes([9; 32]);
        store.store_finalized(&hash).unwrap();
        assert_eq!(store.load_finalized().unwrap(), Some(hash));

        let newer = Hash::from_bytes([10; 32]);
        store.store_finalized(&newer).unwrap();
        assert_eq!(store.load_finalized().unwrap(), Some(newer));
    }
}
