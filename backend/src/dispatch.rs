use crate::diag::{
    emit_decode_fault, emit_link_fault, emit_notice, emit_rejected, now_ms as wall_clock_ms,
};
use crate::inputs::{InputEvent, ModeSelector};
use crate::link::LinkDevice;
use crate::safety::SafetyMonitor;
use crate::state::AppState;
use crate::transition::{TransitionAuthority, Verdict};
use padcontrol_shared::{
    decode, encode, Frame, FramePayload, NodeRegistry, NodeRole, ValveState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub cycle: Duration,
    pub tx_attempts: u32,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let cycle = std::env::var("PAD_CYCLE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(20));

        let tx_attempts = std::env::var("PAD_TX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(3)
            .max(1);

        Self { cycle, tx_attempts }
    }
}

/// One control cycle: sample inputs, advance the transition authority,
/// command the affected nodes, fold inbound status, run safety checks.
/// The cycle body is fully synchronous; nothing in it may block.
pub struct Dispatcher {
    cfg: DispatchConfig,
    state: Arc<AppState>,
    registry: NodeRegistry,
    authority: TransitionAuthority,
    selector: ModeSelector,
    link: Box<dyn LinkDevice>,
    safety: SafetyMonitor,
    next_seq: u16,
}

impl Dispatcher {
    pub fn new(
        cfg: DispatchConfig,
        state: Arc<AppState>,
        registry: NodeRegistry,
        authority: TransitionAuthority,
        selector: ModeSelector,
        link: Box<dyn LinkDevice>,
        safety: SafetyMonitor,
    ) -> Dispatcher {
        Dispatcher {
            cfg,
            state,
            registry,
            authority,
            selector,
            link,
            safety,
            next_seq: 0,
        }
    }

    pub const fn cycle_period(&self) -> Duration {
        self.cfg.cycle
    }

    pub const fn register(&self) -> ValveState {
        self.authority.register()
    }

    pub fn run_cycle(&mut self, mut events: Vec<InputEvent>, now: Instant, now_ms: u64) {
        if let Some(mode) = self.selector.poll(now) {
            events.push(InputEvent::ModeChanged(mode));
        }

        // Stable sort: abort-class events first, arrival order otherwise.
        events.sort_by_key(|event| event.priority_class());
        for event in events {
            self.apply_event(event);
        }

        self.drain_inbound(now_ms);
        self.safety.check(&self.state, now_ms);
    }

    fn apply_event(&mut self, event: InputEvent) {
        match self.authority.apply(event) {
            Ok(Verdict::Applied { previous, current }) => {
                emit_notice(
                    &self.state,
                    format!("Register {previous} -> {current} on {event:?}"),
                );
                self.command_affected_nodes(previous, current);
            }
            Ok(Verdict::ModeSet(mode)) => {
                emit_notice(&self.state, format!("Mode selector now {mode:?}"));
            }
            Ok(Verdict::Unchanged) => {}
            Err(rejected) => emit_rejected(&self.state, rejected),
        }
    }

    /// One command frame per node whose owned valves moved, found by
    /// comparing the registers bit-by-bit against each ownership mask.
    fn command_affected_nodes(&mut self, previous: ValveState, current: ValveState) {
        let changed = previous.changed_mask(current);
        let source = self.registry.address_of(NodeRole::GroundStation);
        for role in NodeRole::remotes() {
            if changed & role.owned_mask() == 0 {
                continue;
            }
            let seq = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);
            let frame = Frame::new(
                self.registry.address_of(role),
                source,
                FramePayload::ValveCommand {
                    seq,
                    state: current,
                },
            );
            self.transmit(role, &frame);
        }
    }

    fn transmit(&mut self, role: NodeRole, frame: &Frame) {
        let bytes = encode(frame);
        let mut last_err = None;
        for _attempt in 0..self.cfg.tx_attempts {
            match self.link.send_frame(&bytes) {
                Ok(()) => return,
                Err(err) => last_err = Some(err),
            }
        }
        // The register stays updated even though the node missed the
        // command: vent valves fail open, so the physical posture
        // degrades toward safe rather than toward flow.
        if let Some(err) = last_err {
            emit_link_fault(&self.state, Some(role), &err);
        }
    }

    fn drain_inbound(&mut self, now_ms: u64) {
        loop {
            let bytes = match self.link.recv_frame() {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(err) => {
                    emit_link_fault(&self.state, None, &err);
                    break;
                }
            };
            match decode(&bytes, &self.registry) {
                Ok(frame) => self.accept_frame(frame, now_ms),
                Err(err) => emit_decode_fault(&self.state, &err),
            }
        }
    }

    fn accept_frame(&mut self, frame: Frame, now_ms: u64) {
        if frame.destination != self.registry.address_of(NodeRole::GroundStation) {
            // Node-to-node traffic on the shared segment; not ours.
            return;
        }
        let Some(role) = self.registry.role_of(frame.source) else {
            return;
        };
        match frame.payload {
            FramePayload::Ack { seq, state } => {
                self.state.record_ack(role, seq, state, now_ms);
            }
            FramePayload::TelemetryReport { kind, value } => {
                self.state.record_reading(role, kind, value, now_ms);
            }
            FramePayload::ValveCommand { .. } => {
                emit_notice(
                    &self.state,
                    format!("Ignoring valve command addressed to ground station from {role:?}"),
                );
            }
        }
    }
}

pub async fn dispatch_task(
    mut dispatcher: Dispatcher,
    mut input_rx: mpsc::Receiver<InputEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut tick = interval(dispatcher.cycle_period());
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let mut events = Vec::new();
                while let Ok(event) = input_rx.try_recv() {
                    events.push(event);
                }
                dispatcher.run_cycle(events, Instant::now(), wall_clock_ms());
            }
            recv = shutdown_rx.recv() => {
                match recv {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) | Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticMsg;
    use crate::inputs::{Mode, DEBOUNCE_SWITCH};
    use crate::link::LinkError;
    use crate::safety::{SafetyLimits, SafetyMonitor};
    use padcontrol_shared::{NodeAddress, SensorKind};
    use std::collections::VecDeque;
    use tokio::sync::{broadcast, mpsc};

    /// Records outbound frames; inbound frames and send failures are
    /// scripted by the test.
    #[derive(Default)]
    struct RecordingLink {
        sent: Vec<Vec<u8>>,
        inbound: VecDeque<Vec<u8>>,
        fail_sends: u32,
    }

    impl LinkDevice for RecordingLink {
        fn send_frame(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
            if self.fail_sends > 0 {
                self.fail_sends -= 1;
                return Err(LinkError::Busy);
            }
            self.sent.push(bytes.to_vec());
            Ok(())
        }

        fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
            Ok(self.inbound.pop_front())
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        state: Arc<AppState>,
        input_rx: mpsc::Receiver<InputEvent>,
        diag_rx: broadcast::Receiver<DiagnosticMsg>,
        shared: Arc<std::sync::Mutex<RecordingLink>>,
    }

    /// LinkDevice passthrough so tests keep a handle on the recorder.
    struct SharedLink(Arc<std::sync::Mutex<RecordingLink>>);

    impl LinkDevice for SharedLink {
        fn send_frame(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
            self.0.lock().unwrap().send_frame(bytes)
        }

        fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
            self.0.lock().unwrap().recv_frame()
        }
    }

    fn harness(boot_mode: Mode) -> Harness {
        let (diag_tx, diag_rx) = broadcast::channel(256);
        let (input_tx, input_rx) = mpsc::channel(32);
        let state = Arc::new(AppState::new(diag_tx, input_tx));
        let shared = Arc::new(std::sync::Mutex::new(RecordingLink::default()));

        let gpio = crate::gpio::GpioPins::new();
        let selector = ModeSelector::new(gpio, DEBOUNCE_SWITCH).unwrap();

        let dispatcher = Dispatcher::new(
            DispatchConfig {
                cycle: Duration::from_millis(20),
                tx_attempts: 3,
            },
            state.clone(),
            NodeRegistry::with_defaults(),
            TransitionAuthority::new(boot_mode),
            selector,
            Box::new(SharedLink(shared.clone())),
            SafetyMonitor::new(SafetyLimits::from_env()),
        );

        Harness {
            dispatcher,
            state,
            input_rx,
            diag_rx,
            shared,
        }
    }

    fn run(h: &mut Harness, events: Vec<InputEvent>, now_ms: u64) {
        h.dispatcher.run_cycle(events, Instant::now(), now_ms);
    }

    fn sent_frames(h: &Harness) -> Vec<Frame> {
        let registry = NodeRegistry::with_defaults();
        let link = h.shared.lock().unwrap();
        link.sent
            .iter()
            .map(|bytes| decode(bytes, &registry).unwrap())
            .collect()
    }

    fn clear_sent(h: &Harness) {
        h.shared.lock().unwrap().sent.clear();
    }

    #[test]
    fn arming_commands_only_the_flow_valve_node() {
        let mut h = harness(Mode::Fueling);
        run(&mut h, vec![InputEvent::ArmAsserted], 0);

        let frames = sent_frames(&h);
        assert_eq!(frames.len(), 1);
        let registry = NodeRegistry::with_defaults();
        assert_eq!(
            frames[0].destination,
            registry.address_of(NodeRole::FlowValve)
        );
        assert_eq!(
            frames[0].payload,
            FramePayload::ValveCommand {
                seq: 0,
                state: ValveState::ARMED,
            }
        );
    }

    #[test]
    fn abort_from_prearm_commands_only_the_relief_node() {
        let mut h = harness(Mode::Fueling);
        run(&mut h, vec![InputEvent::AbortTriggered], 0);

        let frames = sent_frames(&h);
        assert_eq!(frames.len(), 1);
        let registry = NodeRegistry::with_defaults();
        assert_eq!(
            frames[0].destination,
            registry.address_of(NodeRole::ReliefValve)
        );
        assert_eq!(
            frames[0].payload,
            FramePayload::ValveCommand {
                seq: 0,
                state: ValveState::ABORT,
            }
        );
    }

    #[test]
    fn abort_from_armed_commands_both_actuator_nodes() {
        let mut h = harness(Mode::Fueling);
        run(&mut h, vec![InputEvent::ArmAsserted], 0);
        clear_sent(&h);

        run(&mut h, vec![InputEvent::AbortTriggered], 20);
        let frames = sent_frames(&h);
        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert!(matches!(
                frame.payload,
                FramePayload::ValveCommand {
                    state: ValveState::ABORT,
                    ..
                }
            ));
        }
        let registry = NodeRegistry::with_defaults();
        let destinations: Vec<NodeAddress> = frames.iter().map(|f| f.destination).collect();
        assert!(destinations.contains(&registry.address_of(NodeRole::ReliefValve)));
        assert!(destinations.contains(&registry.address_of(NodeRole::FlowValve)));
    }

    #[test]
    fn abort_is_processed_before_other_events_in_the_same_cycle() {
        let mut h = harness(Mode::Fueling);
        // Arrival order says arm first; priority says abort first, so
        // the arm lands in Abort phase and is rejected.
        run(
            &mut h,
            vec![InputEvent::ArmAsserted, InputEvent::AbortTriggered],
            0,
        );
        assert_eq!(h.dispatcher.register(), ValveState::ABORT);

        let mut rejected = 0;
        while let Ok(msg) = h.diag_rx.try_recv() {
            if matches!(msg, DiagnosticMsg::RejectedTransition(_)) {
                rejected += 1;
            }
        }
        assert_eq!(rejected, 1);
    }

    #[test]
    fn idempotent_rearm_emits_no_frames() {
        let mut h = harness(Mode::Fueling);
        run(&mut h, vec![InputEvent::ArmAsserted], 0);
        clear_sent(&h);

        run(&mut h, vec![InputEvent::ArmAsserted], 20);
        assert!(sent_frames(&h).is_empty());
        assert_eq!(h.dispatcher.register(), ValveState::ARMED);
    }

    #[test]
    fn exhausted_retries_report_but_do_not_roll_back() {
        let mut h = harness(Mode::Fueling);
        h.shared.lock().unwrap().fail_sends = 3;

        run(&mut h, vec![InputEvent::ArmAsserted], 0);

        // All three attempts failed, nothing went out...
        assert!(sent_frames(&h).is_empty());
        // ...yet the register is updated optimistically.
        assert_eq!(h.dispatcher.register(), ValveState::ARMED);

        let mut link_faults = 0;
        while let Ok(msg) = h.diag_rx.try_recv() {
            if let DiagnosticMsg::LinkFault(fault) = msg {
                assert_eq!(fault.node, Some(NodeRole::FlowValve));
                link_faults += 1;
            }
        }
        assert_eq!(link_faults, 1);
    }

    #[test]
    fn one_failed_attempt_is_absorbed_by_the_retry_budget() {
        let mut h = harness(Mode::Fueling);
        h.shared.lock().unwrap().fail_sends = 1;

        run(&mut h, vec![InputEvent::ArmAsserted], 0);
        assert_eq!(sent_frames(&h).len(), 1);

        while let Ok(msg) = h.diag_rx.try_recv() {
            assert!(!matches!(msg, DiagnosticMsg::LinkFault(_)));
        }
    }

    #[test]
    fn acks_and_telemetry_fold_into_the_status_cache() {
        let mut h = harness(Mode::Fueling);
        let registry = NodeRegistry::with_defaults();
        let gs = registry.address_of(NodeRole::GroundStation);

        let ack = Frame::new(
            gs,
            registry.address_of(NodeRole::FlowValve),
            FramePayload::Ack {
                seq: 0,
                state: ValveState::ARMED,
            },
        );
        let report = Frame::new(
            gs,
            registry.address_of(NodeRole::SensorInterface),
            FramePayload::TelemetryReport {
                kind: SensorKind::LngTankPressure,
                value: 118.5,
            },
        );
        {
            let mut link = h.shared.lock().unwrap();
            link.inbound.push_back(encode(&ack));
            link.inbound.push_back(encode(&report));
        }

        run(&mut h, vec![], 1_000);

        assert_eq!(
            h.state.last_ack(NodeRole::FlowValve),
            Some((0, ValveState::ARMED))
        );
        assert_eq!(h.state.last_seen_ms(NodeRole::FlowValve), Some(1_000));
        assert_eq!(
            h.state
                .latest_reading(NodeRole::SensorInterface, SensorKind::LngTankPressure),
            Some(118.5)
        );
        // Telemetry is diagnostic only; the register is untouched.
        assert_eq!(h.dispatcher.register(), ValveState::PRE_ARM);
    }

    #[test]
    fn frames_from_unregistered_addresses_leave_the_cache_untouched() {
        let mut h = harness(Mode::Fueling);
        let registry = NodeRegistry::with_defaults();
        let stray = NodeAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x42]);

        let report = Frame::new(
            registry.address_of(NodeRole::GroundStation),
            stray,
            FramePayload::TelemetryReport {
                kind: SensorKind::LngTankPressure,
                value: 9_000.0,
            },
        );
        h.shared.lock().unwrap().inbound.push_back(encode(&report));

        run(&mut h, vec![], 500);

        for role in NodeRole::remotes() {
            assert_eq!(h.state.last_seen_ms(role), None);
        }
        let mut decode_faults = 0;
        while let Ok(msg) = h.diag_rx.try_recv() {
            if matches!(msg, DiagnosticMsg::DecodeFault(_)) {
                decode_faults += 1;
            }
        }
        assert_eq!(decode_faults, 1);
    }

    #[test]
    fn malformed_frames_are_dropped_and_reported() {
        let mut h = harness(Mode::Fueling);
        h.shared.lock().unwrap().inbound.push_back(vec![0u8; 9]);

        run(&mut h, vec![], 0);

        let mut saw_fault = false;
        while let Ok(msg) = h.diag_rx.try_recv() {
            if matches!(msg, DiagnosticMsg::DecodeFault(_)) {
                saw_fault = true;
            }
        }
        assert!(saw_fault);
        assert_eq!(h.dispatcher.register(), ValveState::PRE_ARM);
    }

    #[test]
    fn safety_abort_lands_on_the_next_cycle() {
        let mut h = harness(Mode::Fueling);
        run(&mut h, vec![InputEvent::ArmAsserted], 0);
        assert_eq!(h.dispatcher.register(), ValveState::ARMED);

        // Overpressure telemetry arrives this cycle; the safety pass
        // injects an abort into the input channel.
        let registry = NodeRegistry::with_defaults();
        let report = Frame::new(
            registry.address_of(NodeRole::GroundStation),
            registry.address_of(NodeRole::SensorInterface),
            FramePayload::TelemetryReport {
                kind: SensorKind::LoxTankPressure,
                value: 500.0,
            },
        );
        h.shared.lock().unwrap().inbound.push_back(encode(&report));
        run(&mut h, vec![], 20);
        assert_eq!(h.dispatcher.register(), ValveState::ARMED);

        let injected = h.input_rx.try_recv().unwrap();
        assert_eq!(injected, InputEvent::AbortTriggered);
        run(&mut h, vec![injected], 40);
        assert_eq!(h.dispatcher.register(), ValveState::ABORT);
    }

    #[test]
    fn full_scenario_fuel_arm_abort_reset() {
        let mut h = harness(Mode::Dev);

        run(
            &mut h,
            vec![InputEvent::ModeChanged(Mode::Fueling), InputEvent::ArmAsserted],
            0,
        );
        assert_eq!(h.dispatcher.register(), ValveState::ARMED);

        run(&mut h, vec![InputEvent::AbortTriggered], 20);
        assert_eq!(h.dispatcher.register(), ValveState::ABORT);

        // Second abort: no-op, no frames.
        clear_sent(&h);
        run(&mut h, vec![InputEvent::AbortTriggered], 40);
        assert!(sent_frames(&h).is_empty());

        run(&mut h, vec![InputEvent::SafingReset], 60);
        assert_eq!(h.dispatcher.register(), ValveState::PRE_ARM);
        let frames = sent_frames(&h);
        // Reset closes the vents: one command to the relief node.
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            frames[0].payload,
            FramePayload::ValveCommand {
                state: ValveState::PRE_ARM,
                ..
            }
        ));
    }

    #[test]
    fn dev_toggle_commands_the_owning_node_with_the_intermediate() {
        let mut h = harness(Mode::Dev);
        run(&mut h, vec![InputEvent::ValveToggled(padcontrol_shared::Valve::Gn2Vent)], 0);

        let frames = sent_frames(&h);
        assert_eq!(frames.len(), 1);
        let registry = NodeRegistry::with_defaults();
        assert_eq!(
            frames[0].destination,
            registry.address_of(NodeRole::ReliefValve)
        );
        match frames[0].payload {
            FramePayload::ValveCommand { state, .. } => {
                assert_eq!(state.bits(), padcontrol_shared::valve::mask::GN2_VENT);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
