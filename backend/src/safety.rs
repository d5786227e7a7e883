use crate::diag::{emit_node_silent, emit_warning};
use crate::inputs::InputEvent;
use crate::state::AppState;
use padcontrol_shared::{NodeRole, SensorKind};
use std::time::Duration;

const LNG_TANK_MAX_PSI: f32 = 325.0;
const LOX_TANK_MAX_PSI: f32 = 325.0;
const GN2_MANIFOLD_MAX_PSI: f32 = 2_800.0;

#[derive(Clone, Debug)]
pub struct SafetyLimits {
    pub lng_tank_max_psi: f32,
    pub lox_tank_max_psi: f32,
    pub gn2_manifold_max_psi: f32,
    pub node_timeout: Duration,
}

impl SafetyLimits {
    pub fn from_env() -> Self {
        let lng_tank_max_psi = std::env::var("PAD_LNG_TANK_MAX_PSI")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(LNG_TANK_MAX_PSI);

        let lox_tank_max_psi = std::env::var("PAD_LOX_TANK_MAX_PSI")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(LOX_TANK_MAX_PSI);

        let gn2_manifold_max_psi = std::env::var("PAD_GN2_MANIFOLD_MAX_PSI")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(GN2_MANIFOLD_MAX_PSI);

        let node_timeout = std::env::var("PAD_NODE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(1_500));

        Self {
            lng_tank_max_psi,
            lox_tank_max_psi,
            gn2_manifold_max_psi,
            node_timeout,
        }
    }
}

/// Watches the telemetry cache each cycle. An overpressure injects an
/// abort back into the input channel; a silent node only warns, since
/// fail-safe wiring keeps a dead node venting.
pub struct SafetyMonitor {
    limits: SafetyLimits,
    boot_ms: Option<u64>,
    overpressure_latched: bool,
}

impl SafetyMonitor {
    pub fn new(limits: SafetyLimits) -> SafetyMonitor {
        SafetyMonitor {
            limits,
            boot_ms: None,
            overpressure_latched: false,
        }
    }

    fn limit_for(&self, kind: SensorKind) -> Option<f32> {
        match kind {
            SensorKind::LngTankPressure => Some(self.limits.lng_tank_max_psi),
            SensorKind::LoxTankPressure => Some(self.limits.lox_tank_max_psi),
            SensorKind::Gn2ManifoldPressure => Some(self.limits.gn2_manifold_max_psi),
            SensorKind::LngTankTemperature | SensorKind::LoxTankTemperature => None,
        }
    }

    pub fn check(&mut self, state: &AppState, now_ms: u64) {
        let boot_ms = *self.boot_ms.get_or_insert(now_ms);

        let mut saw_pressure = false;
        let mut worst: Option<(SensorKind, f32, f32)> = None;
        while let Some(record) = state.pop_telemetry() {
            let Some(limit) = self.limit_for(record.kind) else {
                continue;
            };
            saw_pressure = true;
            if record.value > limit {
                worst = Some((record.kind, record.value, limit));
            }
        }

        match worst {
            Some((kind, value, limit)) => {
                if !self.overpressure_latched {
                    self.overpressure_latched = true;
                    emit_warning(
                        state,
                        format!(
                            "Critical: {kind:?} at {value:.1} psi exceeds {limit:.1} psi, aborting"
                        ),
                    );
                    let _ = state.input_tx.try_send(InputEvent::AbortTriggered);
                }
            }
            None if saw_pressure => self.overpressure_latched = false,
            None => {}
        }

        let timeout_ms = self.limits.node_timeout.as_millis() as u64;
        for role in NodeRole::remotes() {
            let reference = state.last_seen_ms(role).unwrap_or(boot_ms);
            let silent_for = now_ms.saturating_sub(reference);
            if silent_for > timeout_ms && !state.silent_warned(role) {
                state.set_silent_warned(role);
                emit_node_silent(state, role, silent_for);
            }
        }
    }
}
