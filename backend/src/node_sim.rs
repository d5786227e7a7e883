use crate::link::{LinkDevice, LinkError};
use padcontrol_shared::valve::mask;
use padcontrol_shared::{
    decode, encode, Frame, FramePayload, NodeAddress, NodeRegistry, NodeRole, SensorKind,
    ValveState,
};
use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const SENSOR_PERIOD: Duration = Duration::from_millis(100);

const AMBIENT_TANK_PSI: f32 = 14.7;
const GN2_SUPPLY_PSI: f32 = 2_200.0;
const LNG_TEMP_C: f32 = -162.0;
const LOX_TEMP_C: f32 = -183.0;

struct SimNode {
    role: NodeRole,
    address: NodeAddress,
    applied: ValveState,
    last_seq: Option<u16>,
}

/// In-process stand-in for the pad segment when no raw link hardware is
/// present: actuator nodes apply their owned bits and answer acks, the
/// sensor node streams noisy pressures that follow the valve postures.
pub struct SimLink {
    registry: NodeRegistry,
    nodes: Vec<SimNode>,
    inbox: VecDeque<Vec<u8>>,
    last_sensor_emit: Option<Instant>,
    lng_tank_psi: f32,
    lox_tank_psi: f32,
    gn2_manifold_psi: f32,
}

impl SimLink {
    pub fn new(registry: NodeRegistry) -> SimLink {
        let nodes = NodeRole::remotes()
            .map(|role| SimNode {
                role,
                address: registry.address_of(role),
                applied: ValveState::PRE_ARM,
                last_seq: None,
            })
            .collect();
        SimLink {
            registry,
            nodes,
            inbox: VecDeque::new(),
            last_sensor_emit: None,
            lng_tank_psi: AMBIENT_TANK_PSI,
            lox_tank_psi: AMBIENT_TANK_PSI,
            gn2_manifold_psi: GN2_SUPPLY_PSI,
        }
    }

    /// Union of every actuator node's applied bits: the register as the
    /// field actually has it.
    fn field_register(&self) -> u8 {
        self.nodes.iter().fold(0, |acc, node| acc | node.applied.bits())
    }

    fn deliver(&mut self, frame: Frame) {
        let gs = self.registry.address_of(NodeRole::GroundStation);
        let Some(node) = self
            .nodes
            .iter_mut()
            .find(|node| node.address == frame.destination)
        else {
            return;
        };
        if let FramePayload::ValveCommand { seq, state } = frame.payload {
            if node.last_seq != Some(seq) {
                node.last_seq = Some(seq);
                let owned = node.role.owned_mask();
                let masked = (node.applied.bits() & !owned) | (state.bits() & owned);
                if let Some(next) = ValveState::from_bits(masked) {
                    node.applied = next;
                }
            }
            let ack = Frame::new(
                gs,
                node.address,
                FramePayload::Ack {
                    seq,
                    state: node.applied,
                },
            );
            self.inbox.push_back(encode(&ack));
        }
    }

    fn step_pressures(&mut self) {
        let register = self.field_register();
        let mut rng = rand::rng();

        // Tank pressure chases the valve posture; the jitter keeps the
        // dashboard traces from looking synthetic.
        let mut step = |current: &mut f32, target: f32| {
            *current += (target - *current) * 0.05 + rng.random_range(-0.4..0.4);
        };

        let lng_target = if register & mask::LNG_VENT != 0 {
            AMBIENT_TANK_PSI
        } else if register & mask::LNG_PRES != 0 {
            300.0
        } else {
            self.lng_tank_psi
        };
        let lox_target = if register & mask::LOX_VENT != 0 {
            AMBIENT_TANK_PSI
        } else if register & mask::LOX_PRES != 0 {
            300.0
        } else {
            self.lox_tank_psi
        };
        let gn2_target = if register & mask::GN2_VENT != 0 {
            AMBIENT_TANK_PSI
        } else {
            GN2_SUPPLY_PSI
        };

        step(&mut self.lng_tank_psi, lng_target);
        step(&mut self.lox_tank_psi, lox_target);
        step(&mut self.gn2_manifold_psi, gn2_target);
    }

    fn tick_sensors(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_sensor_emit
            && now.saturating_duration_since(last) < SENSOR_PERIOD
        {
            return;
        }
        self.last_sensor_emit = Some(now);
        self.step_pressures();

        let gs = self.registry.address_of(NodeRole::GroundStation);
        let sensor = self.registry.address_of(NodeRole::SensorInterface);
        let readings = [
            (SensorKind::LngTankPressure, self.lng_tank_psi),
            (SensorKind::LoxTankPressure, self.lox_tank_psi),
            (SensorKind::Gn2ManifoldPressure, self.gn2_manifold_psi),
            (SensorKind::LngTankTemperature, LNG_TEMP_C),
            (SensorKind::LoxTankTemperature, LOX_TEMP_C),
        ];
        for (kind, value) in readings {
            let report = Frame::new(gs, sensor, FramePayload::TelemetryReport { kind, value });
            self.inbox.push_back(encode(&report));
        }
    }
}

impl LinkDevice for SimLink {
    fn send_frame(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        match decode(bytes, &self.registry) {
            Ok(frame) => self.deliver(frame),
            Err(err) => {
                tracing::warn!("SimLink: dropping undecodable outbound frame: {err}");
            }
        }
        Ok(())
    }

    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        self.tick_sensors();
        Ok(self.inbox.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::with_defaults()
    }

    fn command(seq: u16, state: ValveState, to: NodeRole) -> Vec<u8> {
        let reg = registry();
        encode(&Frame::new(
            reg.address_of(to),
            reg.address_of(NodeRole::GroundStation),
            FramePayload::ValveCommand { seq, state },
        ))
    }

    fn drain_acks(link: &mut SimLink) -> Vec<Frame> {
        let reg = registry();
        let mut acks = Vec::new();
        while let Ok(Some(bytes)) = link.recv_frame() {
            let frame = decode(&bytes, &reg).unwrap();
            if matches!(frame.payload, FramePayload::Ack { .. }) {
                acks.push(frame);
            }
        }
        acks
    }

    #[test]
    fn actuator_applies_only_its_owned_bits_and_acks() {
        let mut link = SimLink::new(registry());
        link.send_frame(&command(0, ValveState::LAUNCH, NodeRole::ReliefValve))
            .unwrap();

        let acks = drain_acks(&mut link);
        assert_eq!(acks.len(), 1);
        // LAUNCH has no vent bits; the relief node stays all-closed.
        assert!(matches!(
            acks[0].payload,
            FramePayload::Ack {
                seq: 0,
                state: ValveState::PRE_ARM,
            }
        ));
    }

    #[test]
    fn repeated_seq_is_deduplicated_but_still_acked() {
        let mut link = SimLink::new(registry());
        let bytes = command(5, ValveState::ABORT, NodeRole::ReliefValve);
        link.send_frame(&bytes).unwrap();
        link.send_frame(&bytes).unwrap();

        let acks = drain_acks(&mut link);
        assert_eq!(acks.len(), 2);
        for ack in &acks {
            assert!(matches!(
                ack.payload,
                FramePayload::Ack {
                    seq: 5,
                    state: ValveState::ABORT,
                }
            ));
        }
    }

    #[test]
    fn sensor_node_reports_every_channel() {
        let mut link = SimLink::new(registry());
        let reg = registry();
        let mut kinds = Vec::new();
        while let Ok(Some(bytes)) = link.recv_frame() {
            if let FramePayload::TelemetryReport { kind, .. } =
                decode(&bytes, &reg).unwrap().payload
            {
                kinds.push(kind);
            }
        }
        assert_eq!(kinds.len(), 5);
        assert!(kinds.contains(&SensorKind::Gn2ManifoldPressure));
    }
}
