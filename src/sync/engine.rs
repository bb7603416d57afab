//! Entity reconciliation engine
//!
//! Consumes the decoded message stream of one connection manager and folds it
//! into a [`MachineRegistry`], publishing an immutable snapshot after every
//! message via a `watch` channel. Messages are processed strictly
//! sequentially; consumers only ever observe complete snapshots and route all
//! mutations through server commands.

use crate::auth::CredentialProvider;
use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::machine::message::StreamEnvelope;
use crate::machine::registry::MachineRegistry;
use crate::sync::connection::{ConnectionHandle, ConnectionManager, ConnectionStatus, SubscriptionTarget};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A live machine subscription: one connection, one registry.
///
/// Dropping the subscription tears down the connection and discards the
/// registry; a new subscription always starts from an empty registry.
pub struct MachineSubscription {
    registry_rx: watch::Receiver<MachineRegistry>,
    status_rx: watch::Receiver<ConnectionStatus>,
    error_rx: watch::Receiver<Option<Arc<FleetError>>>,
    connection_task: JoinHandle<()>,
    fold_task: JoinHandle<()>,
}

impl MachineSubscription {
    /// Open a subscription and start reconciling its message stream.
    pub fn spawn(
        config: &FleetConfig,
        target: SubscriptionTarget,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let ConnectionHandle {
            messages,
            status,
            error,
            task: connection_task,
        } = ConnectionManager::spawn(config, target, credentials);

        let (registry_tx, registry_rx) = watch::channel(MachineRegistry::new());
        let fold_task = tokio::spawn(fold_messages(messages, registry_tx));

        Self {
            registry_rx,
            status_rx: status,
            error_rx: error,
            connection_task,
            fold_task,
        }
    }

    /// Clone of the current registry snapshot.
    pub fn snapshot(&self) -> MachineRegistry {
        self.registry_rx.borrow().clone()
    }

    /// Watch channel yielding a fresh snapshot after every applied message.
    pub fn subscribe(&self) -> watch::Receiver<MachineRegistry> {
        self.registry_rx.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Most recent surfaced transport error, if any. Transient auth expiry
    /// never appears here.
    pub fn last_error(&self) -> Option<Arc<FleetError>> {
        self.error_rx.borrow().clone()
    }

    /// True until the first authoritative snapshot has been received on an
    /// established connection.
    pub fn loading(&self) -> bool {
        !self.registry_rx.borrow().has_synced() || self.status() == ConnectionStatus::Connecting
    }

    /// Tear the subscription down. The registry is discarded with it.
    pub fn shutdown(&self) {
        self.connection_task.abort();
        self.fold_task.abort();
    }
}

impl Drop for MachineSubscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reducer loop: one message at a time, in arrival order, publishing a
/// snapshot after each.
async fn fold_messages(
    mut messages: mpsc::Receiver<StreamEnvelope>,
    registry_tx: watch::Sender<MachineRegistry>,
) {
    let mut registry = MachineRegistry::new();
    while let Some(envelope) = messages.recv().await {
        tracing::trace!(
            message_id = %envelope.id,
            message_type = envelope.event.type_name(),
            "Applying stream message"
        );
        registry.apply(envelope.event);
        if registry_tx.send(registry.clone()).is_err() {
            // All snapshot consumers are gone
            break;
        }
    }
}
