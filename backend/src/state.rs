use crate::diag::DiagnosticMsg;
use crate::inputs::InputEvent;
use crate::ring_buffer::RingBuffer;
use padcontrol_shared::{NodeRole, SensorKind, ValveState};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};

/// Telemetry fetched out of the cache is diagnostic context only; it
/// never overrides the authoritative valve register.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct TelemetryRecord {
    pub timestamp_ms: u64,
    pub role: NodeRole,
    pub kind: SensorKind,
    pub value: f32,
}

#[derive(Clone, Debug, Default)]
pub struct NodeStatus {
    pub last_seen_ms: Option<u64>,
    pub last_ack: Option<(u16, ValveState)>,
    pub latest: HashMap<SensorKind, f32>,
    pub silent_warned: bool,
}

pub struct AppState {
    /// Per-node link/telemetry status, diagnostics only.
    node_status: Mutex<HashMap<NodeRole, NodeStatus>>,

    /// Recent telemetry reports awaiting the safety pass.
    telemetry: Mutex<RingBuffer<TelemetryRecord>>,

    /// Structured diagnostics → operator sink.
    pub diag_tx: broadcast::Sender<DiagnosticMsg>,

    /// Collaborator injections (safety aborts, safing reset) back into
    /// the control cycle.
    pub input_tx: mpsc::Sender<InputEvent>,
}

impl AppState {
    pub fn new(
        diag_tx: broadcast::Sender<DiagnosticMsg>,
        input_tx: mpsc::Sender<InputEvent>,
    ) -> AppState {
        AppState {
            node_status: Mutex::new(HashMap::new()),
            telemetry: Mutex::new(RingBuffer::new(256)),
            diag_tx,
            input_tx,
        }
    }

    pub fn mark_node_seen(&self, role: NodeRole, now_ms: u64) {
        let mut status = self.node_status.lock().expect("failed to get lock");
        let entry = status.entry(role).or_default();
        entry.last_seen_ms = Some(now_ms);
        entry.silent_warned = false;
    }

    pub fn record_ack(&self, role: NodeRole, seq: u16, state: ValveState, now_ms: u64) {
        let mut status = self.node_status.lock().expect("failed to get lock");
        let entry = status.entry(role).or_default();
        entry.last_seen_ms = Some(now_ms);
        entry.silent_warned = false;
        entry.last_ack = Some((seq, state));
    }

    pub fn record_reading(&self, role: NodeRole, kind: SensorKind, value: f32, now_ms: u64) {
        self.mark_node_seen(role, now_ms);
        {
            let mut status = self.node_status.lock().expect("failed to get lock");
            status.entry(role).or_default().latest.insert(kind, value);
        }
        self.telemetry
            .lock()
            .expect("failed to get lock")
            .push(TelemetryRecord {
                timestamp_ms: now_ms,
                role,
                kind,
                value,
            });
    }

    pub fn pop_telemetry(&self) -> Option<TelemetryRecord> {
        self.telemetry
            .lock()
            .expect("failed to get lock")
            .pop_oldest()
    }

    pub fn last_seen_ms(&self, role: NodeRole) -> Option<u64> {
        let status = self.node_status.lock().expect("failed to get lock");
        status.get(&role).and_then(|entry| entry.last_seen_ms)
    }

    pub fn last_ack(&self, role: NodeRole) -> Option<(u16, ValveState)> {
        let status = self.node_status.lock().expect("failed to get lock");
        status.get(&role).and_then(|entry| entry.last_ack)
    }

    pub fn latest_reading(&self, role: NodeRole, kind: SensorKind) -> Option<f32> {
        let status = self.node_status.lock().expect("failed to get lock");
        status
            .get(&role)
            .and_then(|entry| entry.latest.get(&kind).copied())
    }

    pub fn silent_warned(&self, role: NodeRole) -> bool {
        let status = self.node_status.lock().expect("failed to get lock");
        status.get(&role).is_some_and(|entry| entry.silent_warned)
    }

    pub fn set_silent_warned(&self, role: NodeRole) {
        let mut status = self.node_status.lock().expect("failed to get lock");
        status.entry(role).or_default().silent_warned = true;
    }
}
