//! Machine registry and reconciliation reducer
//!
//! The registry is the single owned data structure behind every fleet view:
//! a map from machine uuid to [`Machine`], folded from the inbound message
//! stream one message at a time. Each message family has its own merge rule;
//! the reducer is a synchronous pure computation and never fails — malformed
//! or unexpected input degrades to an identity transform.
//!
//! Two invariants are load-bearing and covered by tests below:
//!
//! - *Sticky error*: once a machine is in `ERROR`, a periodic state poll with
//!   `active=false` must not silently heal it to `OFFLINE`; only an explicit
//!   lifecycle event clears the error.
//! - *Transition preservation*: a poll with `transitioning=true` must not
//!   override `BOOTING_UP` / `SHUTTING_DOWN` set by a precise start/stop
//!   event with the coarse `LOADING` state.

use crate::machine::message::{MachineRef, StreamEvent};
use crate::machine::models::{DynamicStatePayload, Machine, MachineState};
use std::collections::HashMap;

/// Derive the new lifecycle state from the previous state and the raw
/// `(active, transitioning)` poll signals.
fn derive_state(previous: MachineState, active: bool, transitioning: bool) -> MachineState {
    if transitioning {
        match previous {
            MachineState::BootingUp | MachineState::ShuttingDown => previous,
            _ => MachineState::Loading,
        }
    } else if active {
        MachineState::Active
    } else if previous == MachineState::Error {
        MachineState::Error
    } else {
        MachineState::Offline
    }
}

/// In-memory registry of machines for one subscription.
#[derive(Debug, Clone, Default)]
pub struct MachineRegistry {
    machines: HashMap<String, Machine>,
    /// Set once the first authoritative `DATA_STATIC` snapshot has landed
    synced: bool,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn machines(&self) -> &HashMap<String, Machine> {
        &self.machines
    }

    pub fn get(&self, uuid: &str) -> Option<&Machine> {
        self.machines.get(uuid)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Whether an authoritative snapshot has been received since this
    /// registry was created.
    pub fn has_synced(&self) -> bool {
        self.synced
    }

    /// Fold one inbound message into the registry.
    ///
    /// Invoked once per message, strictly in arrival order.
    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Create(payload) => {
                tracing::debug!(uuid = %payload.uuid, "Machine created");
                self.machines
                    .insert(payload.uuid.clone(), Machine::from_static(payload));
            },
            StreamEvent::DataStatic(payloads) => self.apply_snapshot(payloads),
            StreamEvent::Delete(body) => {
                if self.machines.remove(&body.uuid).is_some() {
                    tracing::debug!(uuid = %body.uuid, "Machine removed from registry");
                }
            },
            StreamEvent::DataDynamic(payloads) => self.apply_dynamic(payloads),
            StreamEvent::DataDynamicDisks(payloads) => {
                // Sub-resource refresh never creates entities
                for (uuid, payload) in payloads {
                    if let Some(machine) = self.machines.get_mut(&uuid) {
                        if let Some(disks) = payload.disks {
                            machine.disks = disks;
                        }
                    }
                }
            },
            StreamEvent::DataDynamicConnections(payloads) => {
                for (uuid, payload) in payloads {
                    if let Some(machine) = self.machines.get_mut(&uuid) {
                        if let Some(connections) = payload.active_connections {
                            machine.active_connections = connections;
                        }
                    }
                }
            },
            StreamEvent::BootupStart(body) => {
                self.apply_lifecycle_event("BOOTUP_START", body, MachineState::BootingUp)
            },
            StreamEvent::BootupSuccess(body) => {
                self.apply_lifecycle_event("BOOTUP_SUCCESS", body, MachineState::Active)
            },
            StreamEvent::BootupFail(body) => {
                self.apply_lifecycle_event("BOOTUP_FAIL", body, MachineState::Error)
            },
            StreamEvent::ShutdownStart(body) => {
                self.apply_lifecycle_event("SHUTDOWN_START", body, MachineState::ShuttingDown)
            },
            StreamEvent::ShutdownSuccess(body) => {
                self.apply_lifecycle_event("SHUTDOWN_SUCCESS", body, MachineState::Offline)
            },
            StreamEvent::ShutdownFail(body) => {
                self.apply_lifecycle_event("SHUTDOWN_FAIL", body, MachineState::Error)
            },
            StreamEvent::Unknown => {
                // Forward compatibility: newer servers may emit types this
                // client does not know about
                tracing::debug!("Ignoring stream message of unknown type");
            },
        }
    }

    /// `DATA_STATIC` is authoritative for set membership: after it the
    /// registry contains exactly the payload's ids. Prior entries contribute
    /// their dynamic state; payload data wins for every static field.
    fn apply_snapshot(
        &mut self,
        payloads: HashMap<String, crate::machine::models::StaticPropertiesPayload>,
    ) {
        let mut next = HashMap::with_capacity(payloads.len());
        for (uuid, payload) in payloads {
            let machine = match self.machines.remove(&uuid) {
                Some(mut existing) => {
                    existing.apply_static(payload);
                    existing
                },
                None => Machine::from_static(payload),
            };
            next.insert(uuid, machine);
        }

        let dropped = self.machines.len();
        if dropped > 0 {
            tracing::debug!(count = dropped, "Snapshot dropped machines no longer reported");
        }

        self.machines = next;
        self.synced = true;
    }

    /// Periodic poll: machines the server stopped reporting fall back to
    /// `FETCHING`; reported machines get a derived state and verbatim
    /// numeric/timestamp fields. Never creates entities.
    fn apply_dynamic(&mut self, mut payloads: HashMap<String, DynamicStatePayload>) {
        for (uuid, machine) in &mut self.machines {
            match payloads.remove(uuid) {
                Some(payload) => {
                    machine.state = derive_state(machine.state, payload.active, payload.transitioning);
                    machine.vcpu = payload.vcpu;
                    machine.ram_max = payload.ram_max;
                    machine.ram_used = payload.ram_used;
                    machine.boot_timestamp = payload.boot_timestamp;
                },
                None => {
                    machine.state = MachineState::Fetching;
                },
            }
        }
    }

    fn apply_lifecycle_event(&mut self, event_type: &str, body: MachineRef, state: MachineState) {
        match self.machines.get_mut(&body.uuid) {
            Some(machine) => {
                if let Some(error) = &body.error {
                    tracing::warn!(uuid = %body.uuid, event = event_type, error = %error, "Lifecycle event reported an error");
                }
                tracing::debug!(uuid = %body.uuid, event = event_type, new_state = %state, "Lifecycle event");
                machine.state = state;
            },
            None => {
                // Races between deletion and in-flight events are expected
                tracing::warn!(uuid = %body.uuid, event = event_type, "Lifecycle event for unknown machine, ignoring");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::models::{ConnectionsPayload, DisksPayload, MachineDisk, StaticPropertiesPayload};

    fn static_payload(uuid: &str) -> StaticPropertiesPayload {
        StaticPropertiesPayload {
            uuid: uuid.to_string(),
            title: Some(format!("Machine {}", uuid)),
            ..Default::default()
        }
    }

    fn dynamic_payload(uuid: &str, active: bool, transitioning: bool) -> DynamicStatePayload {
        DynamicStatePayload {
            uuid: uuid.to_string(),
            active,
            transitioning,
            ..Default::default()
        }
    }

    fn snapshot(uuids: &[&str]) -> StreamEvent {
        StreamEvent::DataStatic(
            uuids
                .iter()
                .map(|u| (u.to_string(), static_payload(u)))
                .collect(),
        )
    }

    fn machine_ref(uuid: &str) -> MachineRef {
        MachineRef {
            uuid: uuid.to_string(),
            error: None,
        }
    }

    #[test]
    fn test_create_inserts_with_fetching_defaults() {
        let mut registry = MachineRegistry::new();
        registry.apply(StreamEvent::Create(static_payload("m1")));

        let machine = registry.get("m1").unwrap();
        assert_eq!(machine.state, MachineState::Fetching);
        assert_eq!(machine.title.as_deref(), Some("Machine m1"));
        assert!(machine.active_connections.is_empty());
        assert!(!registry.has_synced());
    }

    #[test]
    fn test_snapshot_is_authoritative_for_membership() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1", "m2", "m3"]));
        assert_eq!(registry.len(), 3);

        // m3 missing from the next snapshot: dropped. m4 appears: added.
        registry.apply(snapshot(&["m1", "m2", "m4"]));
        assert_eq!(registry.len(), 3);
        assert!(registry.get("m3").is_none());
        assert!(registry.get("m4").is_some());
        assert!(registry.has_synced());
    }

    #[test]
    fn test_snapshot_preserves_dynamic_state_of_known_machines() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1"]));
        registry.apply(StreamEvent::DataDynamic(
            [("m1".to_string(), dynamic_payload("m1", true, false))].into(),
        ));
        assert_eq!(registry.get("m1").unwrap().state, MachineState::Active);

        registry.apply(snapshot(&["m1"]));
        assert_eq!(registry.get("m1").unwrap().state, MachineState::Active);
    }

    #[test]
    fn test_delete_removes_and_is_noop_when_absent() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1"]));

        registry.apply(StreamEvent::Delete(machine_ref("m1")));
        assert!(registry.is_empty());

        // Deleting again must not fail
        registry.apply(StreamEvent::Delete(machine_ref("m1")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dynamic_poll_derives_active_and_offline() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1", "m2"]));

        registry.apply(StreamEvent::DataDynamic(
            [
                ("m1".to_string(), dynamic_payload("m1", true, false)),
                ("m2".to_string(), dynamic_payload("m2", false, false)),
            ]
            .into(),
        ));

        assert_eq!(registry.get("m1").unwrap().state, MachineState::Active);
        assert_eq!(registry.get("m2").unwrap().state, MachineState::Offline);
    }

    #[test]
    fn test_dynamic_poll_marks_unreported_machines_fetching() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1", "m2"]));

        registry.apply(StreamEvent::DataDynamic(
            [("m1".to_string(), dynamic_payload("m1", true, false))].into(),
        ));

        assert_eq!(registry.get("m1").unwrap().state, MachineState::Active);
        assert_eq!(registry.get("m2").unwrap().state, MachineState::Fetching);
    }

    #[test]
    fn test_dynamic_poll_never_creates_machines() {
        let mut registry = MachineRegistry::new();
        registry.apply(StreamEvent::DataDynamic(
            [("ghost".to_string(), dynamic_payload("ghost", true, false))].into(),
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dynamic_poll_is_idempotent() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1", "m2"]));

        let poll = || {
            StreamEvent::DataDynamic(
                [(
                    "m1".to_string(),
                    DynamicStatePayload {
                        uuid: "m1".to_string(),
                        active: true,
                        transitioning: false,
                        vcpu: 2,
                        ram_max: Some(4096),
                        ram_used: Some(1024),
                        boot_timestamp: None,
                    },
                )]
                .into(),
            )
        };

        registry.apply(poll());
        let once = registry.clone();
        registry.apply(poll());

        assert_eq!(once.get("m1"), registry.get("m1"));
        assert_eq!(once.get("m2"), registry.get("m2"));
    }

    #[test]
    fn test_error_state_is_sticky_across_polls() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1"]));
        registry.apply(StreamEvent::BootupFail(MachineRef {
            uuid: "m1".to_string(),
            error: Some("no bootable device".to_string()),
        }));
        assert_eq!(registry.get("m1").unwrap().state, MachineState::Error);

        registry.apply(StreamEvent::DataDynamic(
            [("m1".to_string(), dynamic_payload("m1", false, false))].into(),
        ));
        assert_eq!(registry.get("m1").unwrap().state, MachineState::Error);

        // An explicit lifecycle event does clear the error
        registry.apply(StreamEvent::BootupSuccess(machine_ref("m1")));
        assert_eq!(registry.get("m1").unwrap().state, MachineState::Active);
    }

    #[test]
    fn test_transitioning_poll_preserves_explicit_transitions() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1", "m2", "m3"]));
        registry.apply(StreamEvent::BootupStart(machine_ref("m1")));
        registry.apply(StreamEvent::ShutdownStart(machine_ref("m2")));

        let poll = StreamEvent::DataDynamic(
            [
                ("m1".to_string(), dynamic_payload("m1", false, true)),
                ("m2".to_string(), dynamic_payload("m2", true, true)),
                ("m3".to_string(), dynamic_payload("m3", false, true)),
            ]
            .into(),
        );
        registry.apply(poll);

        assert_eq!(registry.get("m1").unwrap().state, MachineState::BootingUp);
        assert_eq!(registry.get("m2").unwrap().state, MachineState::ShuttingDown);
        assert_eq!(registry.get("m3").unwrap().state, MachineState::Loading);
    }

    #[test]
    fn test_lifecycle_events_follow_fixed_mapping() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1"]));

        let cases = [
            (StreamEvent::BootupStart(machine_ref("m1")), MachineState::BootingUp),
            (StreamEvent::BootupSuccess(machine_ref("m1")), MachineState::Active),
            (StreamEvent::BootupFail(machine_ref("m1")), MachineState::Error),
            (StreamEvent::ShutdownStart(machine_ref("m1")), MachineState::ShuttingDown),
            (StreamEvent::ShutdownSuccess(machine_ref("m1")), MachineState::Offline),
            (StreamEvent::ShutdownFail(machine_ref("m1")), MachineState::Error),
        ];

        for (event, expected) in cases {
            registry.apply(event);
            assert_eq!(registry.get("m1").unwrap().state, expected);
        }
    }

    #[test]
    fn test_lifecycle_event_for_unknown_machine_is_ignored() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1"]));
        let before = registry.clone();

        registry.apply(StreamEvent::BootupSuccess(machine_ref("ghost")));

        assert_eq!(before.machines(), registry.machines());
    }

    #[test]
    fn test_disk_refresh_merges_known_ids_only() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1"]));

        let disk = MachineDisk {
            name: "vda".to_string(),
            size_bytes: 10 << 30,
            disk_type: "qcow2".to_string(),
            system: true,
            occupied_bytes: Some(3 << 30),
        };
        registry.apply(StreamEvent::DataDynamicDisks(
            [
                (
                    "m1".to_string(),
                    DisksPayload {
                        uuid: "m1".to_string(),
                        disks: Some(vec![disk.clone()]),
                    },
                ),
                (
                    "ghost".to_string(),
                    DisksPayload {
                        uuid: "ghost".to_string(),
                        disks: Some(vec![disk.clone()]),
                    },
                ),
            ]
            .into(),
        ));

        assert_eq!(registry.get("m1").unwrap().disks, vec![disk]);
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn test_connection_refresh_merges_known_ids_only() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1"]));

        registry.apply(StreamEvent::DataDynamicConnections(
            [
                (
                    "m1".to_string(),
                    ConnectionsPayload {
                        uuid: "m1".to_string(),
                        active_connections: Some(vec!["10.0.0.7".to_string()]),
                    },
                ),
                (
                    "ghost".to_string(),
                    ConnectionsPayload {
                        uuid: "ghost".to_string(),
                        active_connections: Some(vec!["10.0.0.9".to_string()]),
                    },
                ),
            ]
            .into(),
        ));

        assert_eq!(
            registry.get("m1").unwrap().active_connections,
            vec!["10.0.0.7".to_string()]
        );
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn test_unknown_message_type_is_identity() {
        let mut registry = MachineRegistry::new();
        registry.apply(snapshot(&["m1"]));
        let before = registry.clone();

        registry.apply(StreamEvent::Unknown);

        assert_eq!(before.machines(), registry.machines());
    }

    #[test]
    fn test_end_to_end_boot_scenario() {
        let mut registry = MachineRegistry::new();
        assert!(registry.is_empty());

        registry.apply(StreamEvent::Create(static_payload("m1")));
        assert_eq!(registry.get("m1").unwrap().state, MachineState::Fetching);

        registry.apply(StreamEvent::BootupStart(machine_ref("m1")));
        assert_eq!(registry.get("m1").unwrap().state, MachineState::BootingUp);

        registry.apply(StreamEvent::BootupSuccess(machine_ref("m1")));
        assert_eq!(registry.get("m1").unwrap().state, MachineState::Active);

        registry.apply(StreamEvent::DataDynamic(
            [(
                "m1".to_string(),
                DynamicStatePayload {
                    uuid: "m1".to_string(),
                    active: true,
                    transitioning: false,
                    vcpu: 2,
                    ..Default::default()
                },
            )]
            .into(),
        ));

        let machine = registry.get("m1").unwrap();
        assert_eq!(machine.state, MachineState::Active);
        assert_eq!(machine.vcpu, 2);
    }
}
