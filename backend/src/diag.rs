use crate::link::LinkError;
use crate::state::AppState;
use crate::transition::RejectedTransition;
use padcontrol_shared::{DecodeError, NodeRole};
use serde::Serialize;

/// Outgoing messages to the diagnostic/log collaborator.
/// Serialized shape:
///   { "ty": "rejected_transition", "data": { ... } }
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "ty", content = "data", rename_all = "snake_case")]
pub enum DiagnosticMsg {
    RejectedTransition(RejectedMsg),
    DecodeFault(FaultMsg),
    LinkFault(LinkFaultMsg),
    NodeSilent(NodeSilentMsg),
    Warning(FaultMsg),
    Notice(FaultMsg),
}

#[derive(Clone, Debug, Serialize)]
pub struct RejectedMsg {
    pub timestamp_ms: u64,
    pub rejected: RejectedTransition,
}

#[derive(Clone, Debug, Serialize)]
pub struct FaultMsg {
    pub timestamp_ms: u64,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LinkFaultMsg {
    pub timestamp_ms: u64,
    /// Destination node for TX faults; None for RX-side faults.
    pub node: Option<NodeRole>,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct NodeSilentMsg {
    pub timestamp_ms: u64,
    pub node: NodeRole,
    pub silent_for_ms: u64,
}

pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// PUBLIC HELPERS — callable from anywhere that has &AppState. The
// broadcast send never blocks; a lagging or absent subscriber loses
// messages rather than stalling the control cycle.

pub fn emit_rejected(state: &AppState, rejected: RejectedTransition) {
    eprintln!("Transition rejected: {rejected}");
    let _ = state.diag_tx.send(DiagnosticMsg::RejectedTransition(RejectedMsg {
        timestamp_ms: now_ms(),
        rejected,
    }));
}

pub fn emit_decode_fault(state: &AppState, err: &DecodeError) {
    eprintln!("Inbound frame dropped: {err}");
    let _ = state.diag_tx.send(DiagnosticMsg::DecodeFault(FaultMsg {
        timestamp_ms: now_ms(),
        message: err.to_string(),
    }));
}

pub fn emit_link_fault(state: &AppState, node: Option<NodeRole>, err: &LinkError) {
    match node {
        Some(role) => eprintln!("Link fault towards {role:?}: {err}"),
        None => eprintln!("Link fault on receive: {err}"),
    }
    let _ = state.diag_tx.send(DiagnosticMsg::LinkFault(LinkFaultMsg {
        timestamp_ms: now_ms(),
        node,
        message: err.to_string(),
    }));
}

pub fn emit_node_silent(state: &AppState, node: NodeRole, silent_for_ms: u64) {
    println!("Warning: {node:?} silent for {silent_for_ms} ms");
    let _ = state.diag_tx.send(DiagnosticMsg::NodeSilent(NodeSilentMsg {
        timestamp_ms: now_ms(),
        node,
        silent_for_ms,
    }));
}

pub fn emit_warning<S: Into<String>>(state: &AppState, message: S) {
    let message = message.into();
    println!("{message}");
    let _ = state.diag_tx.send(DiagnosticMsg::Warning(FaultMsg {
        timestamp_ms: now_ms(),
        message,
    }));
}

pub fn emit_notice<S: Into<String>>(state: &AppState, message: S) {
    let message = message.into();
    println!("{message}");
    let _ = state.diag_tx.send(DiagnosticMsg::Notice(FaultMsg {
        timestamp_ms: now_ms(),
        message,
    }));
}
