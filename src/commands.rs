//! One-shot machine commands over the REST API
//!
//! Commands are fire-and-observe: a `2xx` only means the server accepted the
//! request. The actual state change arrives later on the subscription stream
//! (`BOOTUP_START`, `SHUTDOWN_SUCCESS`, ...), never as a synchronous
//! acknowledgment.

use crate::auth::CredentialProvider;
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Request timeout for command calls
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct MachineCommandClient {
    base_url: Url,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl MachineCommandClient {
    pub fn new(config: &FleetConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: config.api_url.clone(),
            client,
            credentials,
        }
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/machines/{}",
            self.base_url.as_str().trim_end_matches('/'),
            suffix
        )
    }

    async fn post_command(&self, suffix: &str) -> Result<()> {
        let token = self.credentials.access_token().await?;
        let response = self
            .client
            .post(self.endpoint(suffix))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Request a bootup. Observed later as `BOOTUP_START` / `BOOTUP_SUCCESS`
    /// on the stream.
    pub async fn start_machine(&self, uuid: &str) -> Result<()> {
        tracing::info!(uuid = %uuid, "Requesting machine start");
        self.post_command(&format!("start/{}", uuid)).await
    }

    /// Request a shutdown. Observed later as `SHUTDOWN_*` stream messages.
    pub async fn stop_machine(&self, uuid: &str) -> Result<()> {
        tracing::info!(uuid = %uuid, "Requesting machine stop");
        self.post_command(&format!("stop/{}", uuid)).await
    }

    /// Request deletion. Observed later as a `DELETE` stream message.
    pub async fn delete_machine(&self, uuid: &str) -> Result<()> {
        tracing::info!(uuid = %uuid, "Requesting machine deletion");
        let token = self.credentials.access_token().await?;
        let response = self
            .client
            .delete(self.endpoint(&format!("delete/{}", uuid)))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FleetError::AuthExpired);
        }

        let detail = response.text().await.unwrap_or_default();
        Err(FleetError::CommandRejected {
            status: status.as_u16(),
            detail,
        })
    }
}
