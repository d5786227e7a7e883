// main.rs

mod diag;
mod dispatch;
mod gpio;
mod inputs;
mod link;
#[cfg(any(test, feature = "testing"))]
mod node_sim;
mod ring_buffer;
mod safety;
mod state;
mod transition;

use crate::dispatch::{dispatch_task, DispatchConfig, Dispatcher};
use crate::inputs::{ModeSelector, DEBOUNCE_BUTTON, DEBOUNCE_SWITCH};
use crate::link::LinkDevice;
use crate::safety::{SafetyLimits, SafetyMonitor};
use crate::state::AppState;
use crate::transition::TransitionAuthority;

use anyhow::Context;
use padcontrol_shared::{NodeAddress, NodeRegistry, NodeRole};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

fn registry_from_env() -> anyhow::Result<NodeRegistry> {
    let override_for = |role: NodeRole| -> Option<NodeAddress> {
        let var = match role {
            NodeRole::GroundStation => "PAD_MAC_GROUND_STATION",
            NodeRole::ReliefValve => "PAD_MAC_RELIEF_VALVE",
            NodeRole::FlowValve => "PAD_MAC_FLOW_VALVE",
            NodeRole::SensorInterface => "PAD_MAC_SENSOR_INTERFACE",
        };
        std::env::var(var).ok().and_then(|v| NodeAddress::parse(&v))
    };
    NodeRegistry::new(|role| override_for(role).unwrap_or_else(|| role.default_address()))
        .context("hardware address table failed validation")
}

#[cfg(target_os = "linux")]
fn open_link(registry: &NodeRegistry) -> anyhow::Result<Box<dyn LinkDevice>> {
    let iface = std::env::var("PAD_LINK_IFACE").unwrap_or_else(|_| "eth0".to_string());
    match link::EthernetLink::open(&iface) {
        Ok(l) => {
            println!("Pad link online on {iface}");
            Ok(Box::new(l))
        }
        Err(err) => fallback_link(registry, &iface, err),
    }
}

#[cfg(not(target_os = "linux"))]
fn open_link(registry: &NodeRegistry) -> anyhow::Result<Box<dyn LinkDevice>> {
    fallback_link(
        registry,
        "(none)",
        anyhow::anyhow!("raw links require linux"),
    )
}

#[cfg(feature = "testing")]
fn fallback_link(
    registry: &NodeRegistry,
    iface: &str,
    err: anyhow::Error,
) -> anyhow::Result<Box<dyn LinkDevice>> {
    println!("Pad link missing on {iface} ({err:#}), using simulated node field");
    Ok(Box::new(node_sim::SimLink::new(registry.clone())))
}

#[cfg(not(feature = "testing"))]
fn fallback_link(
    _registry: &NodeRegistry,
    iface: &str,
    err: anyhow::Error,
) -> anyhow::Result<Box<dyn LinkDevice>> {
    Err(err.context(format!(
        "pad link unavailable on {iface} and testing mode not enabled"
    )))
}

// Single-threaded by design: the whole control cycle runs on one core,
// and abort must never wait on another thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let registry = registry_from_env()?;
    for role in NodeRole::remotes() {
        println!("{role:?} at {}", registry.address_of(role));
    }

    // --- Channels ---
    let (input_tx, input_rx) = mpsc::channel(64);
    let (diag_tx, diag_rx) = broadcast::channel(256);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // --- Shared state ---
    let state = Arc::new(AppState::new(diag_tx, input_tx.clone()));

    // --- Physical inputs ---
    let gpio = gpio::GpioPins::new();
    let button_debounce = inputs::debounce_from_env(DEBOUNCE_BUTTON);
    let switch_debounce = inputs::debounce_from_env(DEBOUNCE_SWITCH);
    inputs::wire_buttons(&gpio, input_tx, button_debounce)?;
    let selector = ModeSelector::new(gpio, switch_debounce)?;
    println!("Mode selector at {:?}", selector.current());

    // --- Pad link ---
    let pad_link = open_link(&registry)?;

    // --- Optional structured diagnostics on stdout ---
    if std::env::var("PAD_DIAG_JSON").ok().as_deref() == Some("1") {
        tokio::spawn(forward_diagnostics(diag_rx));
    }

    // --- Control loop ---
    let authority = TransitionAuthority::new(selector.current());
    let dispatcher = Dispatcher::new(
        DispatchConfig::from_env(),
        state,
        registry,
        authority,
        selector,
        pad_link,
        SafetyMonitor::new(SafetyLimits::from_env()),
    );
    let control = tokio::spawn(dispatch_task(dispatcher, input_rx, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    println!("Shutting down");
    let _ = shutdown_tx.send(());
    let _ = control.await;
    Ok(())
}

async fn forward_diagnostics(mut diag_rx: broadcast::Receiver<diag::DiagnosticMsg>) {
    loop {
        match diag_rx.recv().await {
            Ok(msg) => {
                if let Ok(line) = serde_json::to_string(&msg) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
