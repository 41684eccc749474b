//! Bandersnatch VRF service client.
//!
//! Ring-VRF and IETF-VRF cryptography is provided by an external prover
//! service speaking JSON over HTTP. The client caches prover handles per
//! `(ring size, validator index, ring digest)` so repeated sealing does not
//! recreate ring provers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use jam_types::block::TicketEnvelope;
use jam_types::{Hash, HexBytes, PublicKey};

use crate::hashing::blake2b_256;

/// Client configuration.
#[derive(Clone, Debug)]
pub struct VrfConfig {
    /// Base URL of the prover service, e.g. `http://127.0.0.1:3000`.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for VrfConfig {
    fn default() -> Self {
        Self { base_url: "http://127.0.0.1:3000".into(), timeout: Duration::from_secs(10) }
    }
}

/// Errors surfaced by the VRF service.
#[derive(Debug, thiserror::Error)]
pub enum VrfError {
    #[error("vrf service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vrf service rejected request: {0}")]
    Rejected(String),

    #[error("vrf client misconfigured: {0}")]
    Config(String),
}

/// Outcome of verifying one submitted ticket.
#[derive(Clone, Debug, Deserialize)]
pub struct TicketVerification {
    pub ok: bool,
    #[serde(default)]
    pub output_hash: Option<Hash>,
    pub attempt: u8,
}

/// Batch ring-VRF verification of submitted tickets.
///
/// Implemented by [`BandersnatchClient`] in production and by deterministic
/// mocks in STF tests.
#[allow(async_fn_in_trait)]
pub trait RingVerifier {
    /// Verify `tickets` against the ring commitment and ring keys, with
    /// `eta2` as the VRF input context. Returns one entry per ticket.
    async fn verify_tickets(
        &self,
        gamma_z: &HexBytes,
        ring: &[PublicKey],
        eta2: &Hash,
        tickets: &[TicketEnvelope],
    ) -> Result<Vec<TicketVerification>, VrfError>;

    /// Compose the ring commitment over the given bandersnatch keys.
    async fn compose_commitment(&self, keys: &[PublicKey]) -> Result<HexBytes, VrfError>;
}

/// Seal generation for the block producer: IETF VRF signature `HS` over the
/// unsealed header, and the entropy output `HV`.
#[allow(async_fn_in_trait)]
pub trait SealProver {
    async fn seal(
        &self,
        ring: &[PublicKey],
        validator_index: u32,
        unsealed_header: &[u8],
    ) -> Result<(HexBytes, Hash), VrfError>;

    /// VRF output hash over arbitrary input, used for the pre-seal entropy
    /// announcement.
    async fn vrf_entropy(
        &self,
        ring: &[PublicKey],
        validator_index: u32,
        vrf_input: &[u8],
    ) -> Result<Hash, VrfError>;
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ProverCacheKey {
    ring_size: usize,
    validator_index: u32,
    ring_digest: Hash,
}

/// HTTP client for the Bandersnatch prover service.
pub struct BandersnatchClient {
    config: VrfConfig,
    http: reqwest::Client,
    provers: Mutex<HashMap<ProverCacheKey, String>>,
}

#[derive(Serialize)]
struct CreateProverRequest<'a> {
    public_keys: &'a [PublicKey],
    prover_index: u32,
}

#[derive(Deserialize)]
struct CreateProverResponse {
    prover_id: String,
}

#[derive(Serialize)]
struct IetfSignRequest<'a> {
    prover_id: &'a str,
    vrf_input_data: HexBytes,
    aux_data: HexBytes,
}

#[derive(Deserialize)]
struct IetfSignResponse {
    signature: HexBytes,
}

#[derive(Serialize)]
struct VrfOutputRequest<'a> {
    prover_id: &'a str,
    vrf_input_data: HexBytes,
}

#[derive(Deserialize)]
struct VrfOutputResponse {
    vrf_output_hash: Hash,
}

#[derive(Serialize)]
struct RingVerifyRequest<'a> {
    gamma_z: &'a HexBytes,
    ring_set: &'a [PublicKey],
    eta2_prime: &'a Hash,
    extrinsic: &'a [TicketEnvelope],
}

#[derive(Deserialize)]
struct RingVerifyResponse {
    results: Vec<TicketVerification>,
}

#[derive(Serialize)]
struct ComposeGammaZRequest<'a> {
    public_keys: &'a [PublicKey],
}

#[derive(Deserialize)]
struct ComposeGammaZResponse {
    gamma_z: HexBytes,
}

impl BandersnatchClient {
    pub fn new(config: VrfConfig) -> Result<Self, VrfError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(VrfError::Http)?;
        Ok(Self { config, http, provers: Mutex::new(HashMap::new()) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<Req: Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, VrfError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VrfError::Rejected(format!("{path}: {status}: {text}")));
        }
        Ok(response.json().await?)
    }

    /// Fetch (or create and cache) a prover handle for the given ring.
    async fn prover_id(
        &self,
        ring: &[PublicKey],
        validator_index: u32,
    ) -> Result<String, VrfError> {
        let mut digest_input = Vec::with_capacity(ring.len() * 32);
        for key in ring {
            digest_input.extend_from_slice(key.as_bytes());
        }
        let cache_key = ProverCacheKey {
            ring_size: ring.len(),
            validator_index,
            ring_digest: blake2b_256(&digest_input),
        };

        if let Some(id) = self.provers.lock().expect("prover cache lock").get(&cache_key) {
            return Ok(id.clone());
        }

        tracing::debug!(ring_size = ring.len(), validator_index, "creating vrf prover");
        let response: CreateProverResponse = self
            .post("/prover/create", &CreateProverRequest { public_keys: ring, prover_index: validator_index })
            .await?;

        self.provers
            .lock()
            .expect("prover cache lock")
            .insert(cache_key, response.prover_id.clone());
        Ok(response.prover_id)
    }

    /// IETF VRF signature over `vrf_input_data` with auxiliary data.
    pub async fn ietf_vrf_sign(
        &self,
        prover_id: &str,
        vrf_input_data: &[u8],
        aux_data: &[u8],
    ) -> Result<HexBytes, VrfError> {
        let response: IetfSignResponse = self
            .post(
                "/prover/ietf_vrf_sign",
                &IetfSignRequest {
                    prover_id,
                    vrf_input_data: HexBytes::from(vrf_input_data),
                    aux_data: HexBytes::from(aux_data),
                },
            )
            .await?;
        Ok(response.signature)
    }

    /// VRF output hash for `vrf_input_data`.
    pub async fn vrf_output(
        &self,
        prover_id: &str,
        vrf_input_data: &[u8],
    ) -> Result<Hash, VrfError> {
        let response: VrfOutputResponse = self
            .post(
                "/prover/vrf_output",
                &VrfOutputRequest { prover_id, vrf_input_data: HexBytes::from(vrf_input_data) },
            )
            .await?;
        Ok(response.vrf_output_hash)
    }
}

impl RingVerifier for BandersnatchClient {
    async fn verify_tickets(
        &self,
        gamma_z: &HexBytes,
        ring: &[PublicKey],
        eta2: &Hash,
        tickets: &[TicketEnvelope],
    ) -> Result<Vec<TicketVerification>, VrfError> {
        let response: RingVerifyResponse = self
            .post(
                "/verifier/ring_vrf_verify_payload",
                &RingVerifyRequest { gamma_z, ring_set: ring, eta2_prime: eta2, extrinsic: tickets },
            )
            .await?;
        if response.results.len() != tickets.len() {
            return Err(VrfError::Rejected(format!(
                "verifier returned {} results for {} tickets",
                response.results.len(),
                tickets.len()
            )));
        }
        Ok(response.results)
    }

    async fn compose_commitment(&self, keys: &[PublicKey]) -> Result<HexBytes, VrfError> {
        let response: ComposeGammaZResponse =
            self.post("/compose_gamma_z", &ComposeGammaZRequest { public_keys: keys }).await?;
        Ok(response.gamma_z)
    }
}

/// Domain prefix for the entropy VRF input (`XE` in the graypaper).
pub const ENTROPY_CONTEXT: &[u8] = b"jam_entropy";

impl SealProver for BandersnatchClient {
    async fn seal(
        &self,
        ring: &[PublicKey],
        validator_index: u32,
        unsealed_header: &[u8],
    ) -> Result<(HexBytes, Hash), VrfError> {
        let prover_id = self.prover_id(ring, validator_index).await?;

        let seal_signature = self.ietf_vrf_sign(&prover_id, unsealed_header, b"").await?;

        // HV is derived from the first 32 bytes of HS under the entropy context.
        let hs_prefix = &seal_signature.as_slice()[..seal_signature.len().min(32)];
        let mut entropy_input = Vec::with_capacity(ENTROPY_CONTEXT.len() + 32);
        entropy_input.extend_from_slice(ENTROPY_CONTEXT);
        entropy_input.extend_from_slice(hs_prefix);
        let vrf_output = self.vrf_output(&prover_id, &entropy_input).await?;

        Ok((seal_signature, vrf_output))
    }

    async fn vrf_entropy(
        &self,
        ring: &[PublicKey],
        validator_index: u32,
        vrf_input: &[u8],
    ) -> Result<Hash, VrfError> {
        let prover_id = self.prover_id(ring, validator_index).await?;
        self.vrf_output(&prover_id, vrf_input).await
    }
}
