//! PVM accumulation oracle over loopback HTTP.

use std::time::Duration;

use serde::Serialize;

use jam_stf::{AccumulateItem, PvmError, PvmOracle};
use jam_types::{ServiceId, TimeSlot};

/// HTTP client for the service-execution endpoint.
pub struct HttpPvm {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct AccumulateRequest<'a> {
    slot: TimeSlot,
    service_id: ServiceId,
    items: &'a [AccumulateItem],
}

impl HttpPvm {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, PvmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PvmError::Unreachable(e.to_string()))?;
        Ok(Self { base_url, http })
    }
}

impl PvmOracle for HttpPvm {
    async fn accumulate(
        &self,
        slot: TimeSlot,
        service_id: ServiceId,
        items: &[AccumulateItem],
    ) -> Result<(), PvmError> {
        let url = format!("{}/service/accumulate_json", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&AccumulateRequest { slot, service_id, items })
            .send()
            .await
            .map_err(|e| PvmError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PvmError::Rejected(format!("{status}: {body}")));
        }
        tracing::debug!(slot, service_id, items = items.len(), "pvm accumulation accepted");
        Ok(())
    }
}
