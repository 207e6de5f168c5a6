//! HTTP client for the upstream business backend.
//!
//! `POST {base}/spell` records an analysis result and must answer 201 with a
//! typed acknowledgement. `GET {base}/spell/await` long-polls for the matching
//! follow-up event.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use voicegate_core::config::BackendConfig;
use voicegate_core::error::{Result, VoiceGateError};

use crate::{Backend, BackendAck, BackendEvent, BackendRequest, EventParams, error_body, http_client};

pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: http_client("backend", config.request_timeout_secs)?,
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn notify(&self, request: &BackendRequest) -> Result<BackendAck> {
        let response = self
            .client
            .post(format!("{}/spell", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| VoiceGateError::backend(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = error_body(response).await;
            return Err(VoiceGateError::backend(format!(
                "expected 201 Created, got {status}: {body}"
            )));
        }

        let ack: BackendAck = response
            .json()
            .await
            .map_err(|e| VoiceGateError::backend(format!("malformed acknowledgement: {e}")))?;
        debug!(champion = %ack.champion_name, spell = %ack.spell_name, "backend acknowledged");
        Ok(ack)
    }

    async fn await_event(
        &self,
        params: &EventParams,
        timeout: Duration,
    ) -> Result<Option<BackendEvent>> {
        let result = self
            .client
            .get(format!("{}/spell/await", self.base_url))
            .query(params)
            .timeout(timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                debug!(timeout_secs = timeout.as_secs(), "no backend event before timeout");
                return Ok(None);
            }
            Err(e) => return Err(VoiceGateError::backend(e.to_string())),
        };

        let status = response.status();
        if status != StatusCode::OK {
            let body = error_body(response).await;
            warn!(%status, body = %body, "backend event request declined");
            return Ok(None);
        }

        match response.json::<BackendEvent>().await {
            Ok(event) => Ok(Some(event)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(VoiceGateError::backend(format!("malformed event: {e}"))),
        }
    }
}
