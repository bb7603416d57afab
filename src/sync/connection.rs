//! WebSocket connection manager for machine subscriptions
//!
//! Owns one persistent connection per logical subscription. Every (re)connect
//! attempt composes the subscription parameters plus a *current* access token
//! into the connection URL, so credentials are refreshed before reconnecting,
//! never after.
//!
//! Reconnect policy: a server close with code 4401 means the access token
//! expired. That close is suppressed from the public error surface; the
//! manager refreshes credentials and permits exactly one reconnect, gated by
//! a 30-second cooldown. A second auth-expiry inside the cooldown is refused
//! and surfaced as a hard error. Every other close or transport error is
//! surfaced immediately without reconnection — recreating the subscription is
//! the caller's decision.

use crate::auth::CredentialProvider;
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::machine::message::StreamEnvelope;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Close code the server uses to signal an expired access token
pub const AUTH_EXPIRED_CLOSE_CODE: u16 = 4401;

/// Minimum spacing between two auth-expiry reconnect attempts
pub const AUTH_RECONNECT_COOLDOWN: Duration = Duration::from_secs(30);

/// Inbound message buffer per subscription
const MESSAGE_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closing,
    Closed,
    Uninstantiated,
}

/// What a subscription observes: one machine, the account's machines, or the
/// whole fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// Machines owned by or assigned to the authenticated account
    Mine,
    /// Every machine the server manages
    All,
    /// A single machine by uuid
    Machine(String),
}

impl SubscriptionTarget {
    /// Wire path segment under `/ws/machines/`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            SubscriptionTarget::Mine => "account",
            SubscriptionTarget::All => "global",
            SubscriptionTarget::Machine(_) => "subscribed",
        }
    }
}

impl std::fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionTarget::Mine => write!(f, "account"),
            SubscriptionTarget::All => write!(f, "global"),
            SubscriptionTarget::Machine(uuid) => write!(f, "subscribed:{}", uuid),
        }
    }
}

/// Compose the subscription URL: path segment for the target, plus
/// `machine_uuid` (single-machine mode only) and the current `access_token`
/// as query parameters.
pub(crate) fn subscription_url(
    base: &Url,
    target: &SubscriptionTarget,
    access_token: &str,
) -> Result<Url> {
    let mut url = base.clone();
    let path = format!(
        "{}/ws/machines/{}",
        base.path().trim_end_matches('/'),
        target.path_segment()
    );
    url.set_path(&path);

    {
        let mut query = url.query_pairs_mut();
        if let SubscriptionTarget::Machine(uuid) = target {
            query.append_pair("machine_uuid", uuid);
        }
        query.append_pair("access_token", access_token);
    }

    Ok(url)
}

/// Handles returned by [`ConnectionManager::spawn`]: the decoded message
/// stream plus the status and error surfaces.
pub struct ConnectionHandle {
    pub messages: mpsc::Receiver<StreamEnvelope>,
    pub status: watch::Receiver<ConnectionStatus>,
    pub error: watch::Receiver<Option<Arc<FleetError>>>,
    pub task: JoinHandle<()>,
}

/// How one connect-and-read session ended.
enum SessionEnd {
    /// Server closed with the auth-expiry code; candidate for reconnect
    AuthExpired,
    /// Server closed with any other code
    Closed { code: u16, reason: String },
    /// The message consumer went away; tear down silently
    ConsumerGone,
}

pub struct ConnectionManager {
    ws_url: Url,
    target: SubscriptionTarget,
    credentials: Arc<dyn CredentialProvider>,
    status_tx: watch::Sender<ConnectionStatus>,
    error_tx: watch::Sender<Option<Arc<FleetError>>>,
    /// Cooldown anchor for the auth-expiry reconnect policy. Owned by this
    /// manager instance, never shared across subscriptions.
    last_auth_reconnect: Option<Instant>,
}

impl ConnectionManager {
    /// Establish and maintain one subscription connection on a background
    /// task.
    pub fn spawn(
        config: &FleetConfig,
        target: SubscriptionTarget,
        credentials: Arc<dyn CredentialProvider>,
    ) -> ConnectionHandle {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Uninstantiated);
        let (error_tx, error_rx) = watch::channel(None);
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_BUFFER);

        let manager = Self {
            ws_url: config.ws_url.clone(),
            target,
            credentials,
            status_tx,
            error_tx,
            last_auth_reconnect: None,
        };
        let task = tokio::spawn(manager.run(message_tx));

        ConnectionHandle {
            messages: message_rx,
            status: status_rx,
            error: error_rx,
            task,
        }
    }

    async fn run(mut self, messages: mpsc::Sender<StreamEnvelope>) {
        loop {
            match self.connect_and_read(&messages).await {
                Ok(SessionEnd::AuthExpired) => {
                    if let Some(last) = self.last_auth_reconnect {
                        if last.elapsed() < AUTH_RECONNECT_COOLDOWN {
                            tracing::warn!(
                                subscription = %self.target,
                                "Second auth expiry within cooldown, refusing reconnect"
                            );
                            self.fail(FleetError::ReconnectRefused(AUTH_RECONNECT_COOLDOWN));
                            break;
                        }
                    }
                    self.last_auth_reconnect = Some(Instant::now());

                    tracing::info!(
                        subscription = %self.target,
                        "Access token expired, refreshing credentials before reconnect"
                    );
                    if let Err(e) = self.credentials.refresh().await {
                        self.fail(FleetError::CredentialRefresh(e.to_string()));
                        break;
                    }
                },
                Ok(SessionEnd::Closed { code, reason }) => {
                    self.fail(FleetError::ConnectionClosed { code, reason });
                    break;
                },
                Ok(SessionEnd::ConsumerGone) => break,
                Err(e) => {
                    self.fail(e);
                    break;
                },
            }
        }

        let _ = self.status_tx.send(ConnectionStatus::Closed);
    }

    async fn connect_and_read(
        &self,
        messages: &mpsc::Sender<StreamEnvelope>,
    ) -> Result<SessionEnd> {
        let _ = self.status_tx.send(ConnectionStatus::Connecting);

        let access_token = self.credentials.access_token().await?;
        let url = subscription_url(&self.ws_url, &self.target, &access_token)?;

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let _ = self.status_tx.send(ConnectionStatus::Open);
        tracing::info!(subscription = %self.target, "Subscription connected");

        let (mut write, mut read) = ws_stream.split();

        while let Some(frame) = read.next().await {
            match frame? {
                Message::Text(text) => {
                    if let Some(envelope) = StreamEnvelope::decode(&text) {
                        if messages.send(envelope).await.is_err() {
                            return Ok(SessionEnd::ConsumerGone);
                        }
                    }
                },
                Message::Ping(payload) => {
                    let _ = write.send(Message::Pong(payload)).await;
                },
                Message::Close(frame) => {
                    let _ = self.status_tx.send(ConnectionStatus::Closing);
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));

                    if code == AUTH_EXPIRED_CLOSE_CODE {
                        // Transient auth expiry is not a user-facing failure
                        return Ok(SessionEnd::AuthExpired);
                    }
                    return Ok(SessionEnd::Closed { code, reason });
                },
                _ => {},
            }
        }

        // Stream ended without a close frame
        Ok(SessionEnd::Closed {
            code: 1006,
            reason: "connection reset".to_string(),
        })
    }

    fn fail(&self, error: FleetError) {
        tracing::warn!(subscription = %self.target, error = %error, code = error.to_error_code(), "Subscription connection failed");
        let _ = self.error_tx.send(Some(Arc::new(error)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("wss://fleet.example.com/api").unwrap()
    }

    #[test]
    fn test_subscription_url_for_account_mode() {
        let url = subscription_url(&base(), &SubscriptionTarget::Mine, "tok").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://fleet.example.com/api/ws/machines/account?access_token=tok"
        );
    }

    #[test]
    fn test_subscription_url_for_global_mode() {
        let url = subscription_url(&base(), &SubscriptionTarget::All, "tok").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://fleet.example.com/api/ws/machines/global?access_token=tok"
        );
    }

    #[test]
    fn test_subscription_url_for_single_machine() {
        let url = subscription_url(
            &base(),
            &SubscriptionTarget::Machine("m-17".to_string()),
            "tok",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://fleet.example.com/api/ws/machines/subscribed?machine_uuid=m-17&access_token=tok"
        );
    }

    #[test]
    fn test_subscription_url_escapes_token() {
        let url = subscription_url(&base(), &SubscriptionTarget::All, "a b&c").unwrap();
        assert!(url.query().unwrap().contains("access_token=a+b%26c"));
    }

    #[test]
    fn test_subscription_url_without_base_path() {
        let base = Url::parse("ws://127.0.0.1:8000").unwrap();
        let url = subscription_url(&base, &SubscriptionTarget::All, "tok").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:8000/ws/machines/global?access_token=tok"
        );
    }

    #[test]
    fn test_connection_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Uninstantiated).unwrap(),
            "\"UNINSTANTIATED\""
        );
    }
}
