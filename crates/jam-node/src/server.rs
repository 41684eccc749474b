//! HTTP surface of the node.
//!
//! `POST /process-block` drives the full STF pipeline over the canonical
//! state document; `POST /produce-block` assembles, seals, applies and
//! finalizes a block when this validator leads the slot. Failures return
//! HTTP 500 with the first structured error and leave the state document
//! untouched.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use jam_crypto::BandersnatchClient;
use jam_stf::{AccumulateItem, NoopPvm, PvmError, PvmOracle};
use jam_types::{Block, ChainState, Extrinsic, Hash, TimeSlot};

use crate::authorize::{AuthorizeRequest, Authorizer};
use crate::config::NodeConfig;
use crate::grandpa::{BlockRecord, GrandpaEngine, TcpGossip};
use crate::keys::KeysFile;
use crate::producer;
use crate::store::{write_block_file, StateStore};

/// PVM oracle selection: loopback HTTP when configured, local no-op
/// otherwise.
pub enum PvmDispatch {
    Disabled(NoopPvm),
    Http(crate::pvm::HttpPvm),
}

impl PvmOracle for PvmDispatch {
    async fn accumulate(
        &self,
        slot: TimeSlot,
        service_id: jam_types::ServiceId,
        items: &[AccumulateItem],
    ) -> Result<(), PvmError> {
        match self {
            PvmDispatch::Disabled(inner) => inner.accumulate(slot, service_id, items).await,
            PvmDispatch::Http(inner) => inner.accumulate(slot, service_id, items).await,
        }
    }
}

/// Shared server state.
pub struct AppState {
    pub config: NodeConfig,
    pub keys: KeysFile,
    pub state_store: StateStore,
    pub authorizer: Authorizer,
    pub vrf: BandersnatchClient,
    pub pvm: PvmDispatch,
    pub grandpa: tokio::sync::Mutex<GrandpaEngine<TcpGossip>>,
}

impl AppState {
    /// The canonical state, initializing genesis from the keys file when the
    /// document does not exist yet.
    pub fn load_or_genesis(&self) -> Result<ChainState, crate::store::StoreError> {
        if self.state_store.exists() {
            Ok(self.state_store.load()?.state)
        } else {
            let state = ChainState::genesis(self.keys.validator_records(), 12, 11, 3);
            self.state_store.save(&state, "genesis")?;
            Ok(state)
        }
    }
}

#[derive(Deserialize)]
struct ProcessBlockRequest {
    block: Block,
}

#[derive(Serialize)]
struct ProcessBlockResponse {
    ok: bool,
    state_root: Hash,
    offenders_mark: Vec<jam_types::PublicKey>,
    reported: usize,
    accumulated: Vec<Hash>,
}

#[derive(Deserialize)]
struct ProduceBlockRequest {
    #[serde(default)]
    slot: Option<TimeSlot>,
    #[serde(default)]
    extrinsic: Option<Extrinsic>,
}

/// Error body for the block-processing path.
struct ApiError {
    status: StatusCode,
    code: String,
}

impl ApiError {
    fn internal(code: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, code: code.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "err": self.code }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/state-root", get(state_root))
        .route("/authorize", post(authorize))
        .route("/process-block", post(process_block))
        .route("/produce-block", post(produce_block))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "validator_index": state.config.validator_index,
    }))
}

async fn state_root(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let chain = state.load_or_genesis().map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({ "state_root": jam_merkle::state_root(&chain) })))
}

async fn authorize(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AuthorizeRequest>,
) -> Json<crate::authorize::AuthorizeResponse> {
    Json(state.authorizer.authorize(&request))
}

async fn process_block(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProcessBlockRequest>,
) -> Result<Json<ProcessBlockResponse>, ApiError> {
    let pre_state = state.load_or_genesis().map_err(|e| ApiError::internal(e.to_string()))?;

    producer::validate_block(&request.block, &pre_state)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let outcome = jam_stf::process_block(&pre_state, &request.block, &state.vrf, &state.pvm)
        .await
        .map_err(|e| ApiError::internal(e.code()))?;

    state
        .state_store
        .save(&outcome.post_state, "process-block")
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(ProcessBlockResponse {
        ok: true,
        state_root: outcome.state_root,
        offenders_mark: outcome.offenders_mark,
        reported: outcome.reported.len(),
        accumulated: outcome.accumulated,
    }))
}

async fn produce_block(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProduceBlockRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(validator_index) = state.config.validator_index else {
        return Err(ApiError::internal("node is not a validator"));
    };

    let pre_state = state.load_or_genesis().map_err(|e| ApiError::internal(e.to_string()))?;
    let slot = request.slot.unwrap_or(pre_state.tau + 1);
    let extrinsic = request.extrinsic.unwrap_or_default();
    let parent_hash =
        pre_state.beta.last().map(|entry| entry.header_hash).unwrap_or_else(Hash::zero);

    // Assemble and seal.
    let produced = producer::produce_block(
        &pre_state,
        slot,
        validator_index,
        extrinsic,
        parent_hash,
        &state.vrf,
    )
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    // Apply our own block through the same pipeline as everyone else's.
    let outcome = jam_stf::process_block(&pre_state, &produced.block, &state.vrf, &state.pvm)
        .await
        .map_err(|e| ApiError::internal(e.code()))?;

    state
        .state_store
        .save(&outcome.post_state, "produce-block")
        .map_err(|e| ApiError::internal(e.to_string()))?;
    write_block_file(&state.config.block_file_path(), &produced.block)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    // Hand the block to the finality engine: import, announce, run a round.
    let mut grandpa = state.grandpa.lock().await;
    grandpa
        .announce_block(BlockRecord {
            hash: produced.block_hash,
            parent: Some(parent_hash).filter(|p| !p.is_zero()),
            height: slot as u64,
            state_root: outcome.state_root,
            slot,
            author: validator_index as u32,
            audited: true,
        })
        .await;
    let round = grandpa.run_round().await.map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(json!({
        "ok": true,
        "block_hash": produced.block_hash,
        "state_root": outcome.state_root,
        "finalized": round.finalized,
        "justification": round.justification,
    })))
}
