use crate::gpio::{GpioPins, Trigger};
use anyhow::anyhow;
use padcontrol_shared::Valve;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

//####################################################################
// Operator console wiring (all active-high).
//####################################################################
pub const PIN_ARM: u8 = 18;
pub const PIN_LAUNCH: u8 = 17;
pub const PIN_ABORT: u8 = 26;
pub const PIN_LAUNCH_MODE: u8 = 8;
pub const PIN_FUELING_MODE: u8 = 9;
pub const PIN_DEV_MODE: u8 = 10;
//####################################################################

pub const DEBOUNCE_BUTTON: Duration = Duration::from_millis(30);
pub const DEBOUNCE_SWITCH: Duration = Duration::from_millis(30);

/// Position of the three-way mode selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Mode {
    Dev,
    Fueling,
    Launch,
}

/// Debounced, edge-detected logical event from one physical control or
/// an injecting collaborator (safety monitor, safing reset).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum InputEvent {
    ArmAsserted,
    LaunchTriggered,
    AbortTriggered,
    ModeChanged(Mode),
    SafingReset,
    ValveToggled(Valve),
}

impl InputEvent {
    /// In-cycle processing order: abort preempts everything, safety
    /// gating precedes advancing inputs.
    pub const fn priority_class(self) -> u8 {
        match self {
            InputEvent::AbortTriggered => 0,
            InputEvent::SafingReset | InputEvent::ModeChanged(_) => 1,
            InputEvent::ArmAsserted
            | InputEvent::LaunchTriggered
            | InputEvent::ValveToggled(_) => 2,
        }
    }
}

/// Commits a level change only once the raw signal has held it for the
/// whole window, so one physical bounce can't fire twice.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    committed: bool,
    candidate: bool,
    candidate_since: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration, initial: bool) -> Debouncer {
        Debouncer {
            window,
            committed: initial,
            candidate: initial,
            candidate_since: None,
        }
    }

    pub const fn level(&self) -> bool {
        self.committed
    }

    /// Feeds one raw sample; returns the new level when a change commits.
    pub fn sample(&mut self, raw: bool, now: Instant) -> Option<bool> {
        if raw == self.committed {
            self.candidate = raw;
            self.candidate_since = None;
            return None;
        }
        match self.candidate_since {
            Some(since) if self.candidate == raw => {
                if now.saturating_duration_since(since) >= self.window {
                    self.committed = raw;
                    self.candidate_since = None;
                    Some(raw)
                } else {
                    None
                }
            }
            _ => {
                self.candidate = raw;
                self.candidate_since = Some(now);
                None
            }
        }
    }
}

/// Polled three-pin mode selector. The selector is a rotary switch, so
/// it is sampled every control cycle rather than interrupt-driven.
pub struct ModeSelector {
    gpio: Arc<GpioPins>,
    launch: Debouncer,
    fueling: Debouncer,
    dev: Debouncer,
    current: Mode,
}

impl ModeSelector {
    pub fn new(gpio: Arc<GpioPins>, window: Duration) -> anyhow::Result<ModeSelector> {
        for pin in [PIN_LAUNCH_MODE, PIN_FUELING_MODE, PIN_DEV_MODE] {
            gpio.setup_input_pin(pin)
                .map_err(|e| anyhow!("mode selector pin {pin} setup failed: {e}"))?;
        }
        let read = |pin: u8| gpio.read_input_pin(pin).unwrap_or(false);
        let launch = read(PIN_LAUNCH_MODE);
        let fueling = read(PIN_FUELING_MODE);
        let dev = read(PIN_DEV_MODE);
        let current = Self::mode_from_levels(launch, fueling);
        Ok(ModeSelector {
            launch: Debouncer::new(window, launch),
            fueling: Debouncer::new(window, fueling),
            dev: Debouncer::new(window, dev),
            gpio,
            current,
        })
    }

    const fn mode_from_levels(launch: bool, fueling: bool) -> Mode {
        // A rotary selector asserts one contact; dev doubles as the
        // fall-through when no contact reads high (safest position).
        if launch {
            Mode::Launch
        } else if fueling {
            Mode::Fueling
        } else {
            Mode::Dev
        }
    }

    pub const fn current(&self) -> Mode {
        self.current
    }

    /// Samples all three contacts; returns the new mode when the
    /// debounced position changes.
    pub fn poll(&mut self, now: Instant) -> Option<Mode> {
        let read = |pin: u8| self.gpio.read_input_pin(pin).unwrap_or(false);
        let raw_launch = read(PIN_LAUNCH_MODE);
        let raw_fueling = read(PIN_FUELING_MODE);
        let raw_dev = read(PIN_DEV_MODE);
        self.launch.sample(raw_launch, now);
        self.fueling.sample(raw_fueling, now);
        self.dev.sample(raw_dev, now);

        let mode = Self::mode_from_levels(self.launch.level(), self.fueling.level());
        if mode != self.current {
            self.current = mode;
            Some(mode)
        } else {
            None
        }
    }
}

/// Debounce window override, shared by buttons and switches.
pub fn debounce_from_env(default: Duration) -> Duration {
    std::env::var("PAD_DEBOUNCE_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Registers the three console buttons; each rising edge enqueues its
/// event without ever blocking the interrupt context.
pub fn wire_buttons(
    gpio: &Arc<GpioPins>,
    tx: mpsc::Sender<InputEvent>,
    debounce: Duration,
) -> anyhow::Result<()> {
    let buttons = [
        (PIN_ARM, InputEvent::ArmAsserted),
        (PIN_LAUNCH, InputEvent::LaunchTriggered),
        (PIN_ABORT, InputEvent::AbortTriggered),
    ];
    for (pin, event) in buttons {
        gpio.setup_input_pin(pin)
            .map_err(|e| anyhow!("button pin {pin} setup failed: {e}"))?;
        let tx = tx.clone();
        gpio.setup_callback_input_pin(pin, Trigger::RisingEdge, debounce, move |rising| {
            if rising {
                let _ = tx.try_send(event);
            }
        })
        .map_err(|e| anyhow!("button pin {pin} callback failed: {e}"))?;
    }
    Ok(())
}
