//! Typed inbound stream messages
//!
//! Every message arrives as an envelope `{ id, timestamp, type, body }` where
//! `body` is a type-specific payload. Unrecognized `type` values deserialize
//! into [`StreamEvent::Unknown`] and are dropped by the reducer, which keeps
//! the client forward-compatible with newer servers.

use crate::machine::models::{
    ConnectionsPayload, DisksPayload, DynamicStatePayload, StaticPropertiesPayload,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of the six explicit lifecycle event messages and `DELETE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRef {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A decoded stream message body, tagged by the wire `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum StreamEvent {
    #[serde(rename = "CREATE")]
    Create(StaticPropertiesPayload),
    #[serde(rename = "DATA_STATIC")]
    DataStatic(HashMap<String, StaticPropertiesPayload>),
    #[serde(rename = "DELETE")]
    Delete(MachineRef),
    #[serde(rename = "DATA_DYNAMIC")]
    DataDynamic(HashMap<String, DynamicStatePayload>),
    #[serde(rename = "DATA_DYNAMIC_DISKS")]
    DataDynamicDisks(HashMap<String, DisksPayload>),
    #[serde(rename = "DATA_DYNAMIC_CONNECTIONS")]
    DataDynamicConnections(HashMap<String, ConnectionsPayload>),
    #[serde(rename = "BOOTUP_START")]
    BootupStart(MachineRef),
    #[serde(rename = "BOOTUP_SUCCESS")]
    BootupSuccess(MachineRef),
    #[serde(rename = "BOOTUP_FAIL")]
    BootupFail(MachineRef),
    #[serde(rename = "SHUTDOWN_START")]
    ShutdownStart(MachineRef),
    #[serde(rename = "SHUTDOWN_SUCCESS")]
    ShutdownSuccess(MachineRef),
    #[serde(rename = "SHUTDOWN_FAIL")]
    ShutdownFail(MachineRef),
    /// Message type not known to this client version
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Wire name of the message type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::Create(_) => "CREATE",
            StreamEvent::DataStatic(_) => "DATA_STATIC",
            StreamEvent::Delete(_) => "DELETE",
            StreamEvent::DataDynamic(_) => "DATA_DYNAMIC",
            StreamEvent::DataDynamicDisks(_) => "DATA_DYNAMIC_DISKS",
            StreamEvent::DataDynamicConnections(_) => "DATA_DYNAMIC_CONNECTIONS",
            StreamEvent::BootupStart(_) => "BOOTUP_START",
            StreamEvent::BootupSuccess(_) => "BOOTUP_SUCCESS",
            StreamEvent::BootupFail(_) => "BOOTUP_FAIL",
            StreamEvent::ShutdownStart(_) => "SHUTDOWN_START",
            StreamEvent::ShutdownSuccess(_) => "SHUTDOWN_SUCCESS",
            StreamEvent::ShutdownFail(_) => "SHUTDOWN_FAIL",
            StreamEvent::Unknown => "UNKNOWN",
        }
    }
}

/// Inbound message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnvelope {
    /// Server-assigned message id
    pub id: String,
    /// Server send time, ISO-8601 UTC
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: StreamEvent,
}

impl StreamEnvelope {
    /// Decode a raw text frame. Returns `None` for malformed frames, which
    /// the caller drops after logging.
    pub fn decode(text: &str) -> Option<Self> {
        match serde_json::from_str::<StreamEnvelope>(text) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed stream message");
                None
            },
        }
    }
}
