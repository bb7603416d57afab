//! Machine entity and the wire payloads that refresh it
//!
//! A machine's fields fall into three provenance classes, each refreshed by a
//! different message family: static descriptive data (snapshot/creation
//! messages), dynamic runtime data (periodic state polls), and dynamic
//! sub-resources (disks and remote connections, refreshed independently).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Derived lifecycle state of a machine.
///
/// Always a pure function of the last dynamic signal plus the previous state,
/// never assigned from descriptive data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    /// Existence known, no dynamic data received yet
    Fetching,
    /// Dynamic refresh in flight, not mid-transition
    Loading,
    BootingUp,
    Active,
    ShuttingDown,
    Offline,
    Error,
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MachineState::Fetching => "FETCHING",
            MachineState::Loading => "LOADING",
            MachineState::BootingUp => "BOOTING_UP",
            MachineState::Active => "ACTIVE",
            MachineState::ShuttingDown => "SHUTTING_DOWN",
            MachineState::Offline => "OFFLINE",
            MachineState::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

/// Account reference embedded in machine ownership data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uuid: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A virtual disk attached to a machine.
///
/// `occupied_bytes` is only populated by dynamic disk messages; static
/// inventory omits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDisk {
    pub name: String,
    pub size_bytes: u64,
    #[serde(rename = "type")]
    pub disk_type: String,
    #[serde(default)]
    pub system: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupied_bytes: Option<u64>,
}

/// Static descriptive data, sent by `CREATE` and `DATA_STATIC` messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticPropertiesPayload {
    pub uuid: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<Account>,
    #[serde(default)]
    pub assigned_clients: HashMap<String, Account>,
    #[serde(default)]
    pub ras_ip: Option<String>,
    #[serde(default)]
    pub ras_port: Option<u16>,
    #[serde(default)]
    pub connections: Option<HashMap<String, String>>,
    #[serde(default)]
    pub disks: Option<Vec<MachineDisk>>,
}

/// Dynamic runtime data, sent by `DATA_DYNAMIC` polls.
///
/// `active` and `transitioning` are raw signals folded into the derived
/// lifecycle state; they are never stored on the entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicStatePayload {
    pub uuid: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub transitioning: bool,
    #[serde(default)]
    pub vcpu: u32,
    #[serde(default)]
    pub ram_max: Option<u64>,
    #[serde(default)]
    pub ram_used: Option<u64>,
    #[serde(default)]
    pub boot_timestamp: Option<DateTime<Utc>>,
}

/// Per-disk occupancy refresh, sent by `DATA_DYNAMIC_DISKS`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisksPayload {
    pub uuid: String,
    #[serde(default)]
    pub disks: Option<Vec<MachineDisk>>,
}

/// Active remote-connection refresh, sent by `DATA_DYNAMIC_CONNECTIONS`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionsPayload {
    pub uuid: String,
    #[serde(default)]
    pub active_connections: Option<Vec<String>>,
}

/// A machine entity as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub uuid: String,
    pub state: MachineState,

    // Static descriptive data
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
    pub owner: Option<Account>,
    pub assigned_clients: HashMap<String, Account>,
    pub ras_ip: Option<String>,
    pub ras_port: Option<u16>,
    pub connections: Option<HashMap<String, String>>,

    // Dynamic runtime data
    pub vcpu: u32,
    pub ram_max: Option<u64>,
    pub ram_used: Option<u64>,
    pub boot_timestamp: Option<DateTime<Utc>>,

    // Dynamic sub-resources
    pub disks: Vec<MachineDisk>,
    pub active_connections: Vec<String>,
}

impl Machine {
    /// Build a machine from static properties with dynamic defaults:
    /// state `FETCHING`, no boot timestamp, empty sub-resources.
    pub fn from_static(payload: StaticPropertiesPayload) -> Self {
        Self {
            uuid: payload.uuid,
            state: MachineState::Fetching,
            title: payload.title,
            tags: payload.tags,
            description: payload.description,
            owner: payload.owner,
            assigned_clients: payload.assigned_clients,
            ras_ip: payload.ras_ip,
            ras_port: payload.ras_port,
            connections: payload.connections,
            vcpu: 0,
            ram_max: None,
            ram_used: None,
            boot_timestamp: None,
            disks: payload.disks.unwrap_or_default(),
            active_connections: Vec::new(),
        }
    }

    /// Overwrite the static descriptive fields wholesale, preserving the
    /// derived state, dynamic runtime data and active connections.
    pub fn apply_static(&mut self, payload: StaticPropertiesPayload) {
        self.title = payload.title;
        self.tags = payload.tags;
        self.description = payload.description;
        self.owner = payload.owner;
        self.assigned_clients = payload.assigned_clients;
        self.ras_ip = payload.ras_ip;
        self.ras_port = payload.ras_port;
        self.connections = payload.connections;
        if let Some(disks) = payload.disks {
            self.disks = disks;
        }
    }
}
