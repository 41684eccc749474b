//! Canonical state document and block file persistence.
//!
//! The state document is rewritten atomically per block (write to a
//! temporary file, then rename); only the orchestrator writes it, STFs see
//! immutable snapshots.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use jam_types::{Block, ChainState, Hash};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state document malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Document metadata stamped on every rewrite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub last_updated: String,
    pub updated_by: String,
}

/// The persisted canonical document: the state plus bookkeeping metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateDocument {
    pub state: ChainState,
    pub metadata: DocumentMetadata,
}

/// File-backed canonical state.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<StateDocument, StoreError> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Atomic rewrite: serialize to `<path>.tmp`, then rename over the
    /// document.
    pub fn save(&self, state: &ChainState, updated_by: &str) -> Result<(), StoreError> {
        let document = StateDocument {
            state: state.clone(),
            metadata: DocumentMetadata {
                last_updated: chrono::Utc::now().to_rfc3339(),
                updated_by: updated_by.to_string(),
            },
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&document)?)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "state document rewritten");
        Ok(())
    }
}

/// Block-file metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockFileMetadata {
    pub produced_at: String,
    pub author_index: u16,
}

/// The emitted `block_produced.json` document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockFile {
    pub header: jam_types::Header,
    pub body: jam_types::Extrinsic,
    pub block_hash: Hash,
    pub metadata: BlockFileMetadata,
}

/// Write the produced-block file next to the state document.
pub fn write_block_file(path: &Path, block: &Block) -> Result<(), StoreError> {
    let file = BlockFile {
        header: block.header.clone(),
        body: block.extrinsic.clone(),
        block_hash: block.hash(),
        metadata: BlockFileMetadata {
            produced_at: chrono::Utc::now().to_rfc3339(),
            author_index: block.header.author_index,
        },
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;
    Ok(())
}
