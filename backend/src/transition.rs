use crate::inputs::{InputEvent, Mode};
use padcontrol_shared::ValveState;
use serde::Serialize;
use std::fmt;

/// Outer control state. Sequenced valve operations (dev-mode toggles)
/// stay inside PreArm with a different register value; they never add an
/// outer state, which keeps the legality table small.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    PreArm,
    Armed,
    Launch,
    Abort,
}

/// Outcome of an accepted input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    /// The register moved; the affected nodes are owed command frames.
    Applied {
        previous: ValveState,
        current: ValveState,
    },
    /// Mode selector moved; the register is untouched.
    ModeSet(Mode),
    /// Legal re-assertion of something already holding. No frames.
    Unchanged,
}

/// An illegal state change was attempted. Recovered locally: nothing
/// mutates, the attempt is reported outward.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RejectedTransition {
    pub phase: Phase,
    pub mode: Mode,
    pub event: InputEvent,
}

impl fmt::Display for RejectedTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} rejected in phase {:?} (mode {:?})",
            self.event, self.phase, self.mode
        )
    }
}

/// The single authority over the valve register. Nothing else writes it.
#[derive(Clone, Debug)]
pub struct TransitionAuthority {
    phase: Phase,
    mode: Mode,
    register: ValveState,
}

impl TransitionAuthority {
    pub fn new(boot_mode: Mode) -> TransitionAuthority {
        TransitionAuthority {
            phase: Phase::PreArm,
            mode: boot_mode,
            register: ValveState::PRE_ARM,
        }
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    pub const fn register(&self) -> ValveState {
        self.register
    }

    pub fn apply(&mut self, event: InputEvent) -> Result<Verdict, RejectedTransition> {
        match (self.phase, event) {
            // Abort wins from anywhere; repeating it is a no-op.
            (Phase::Abort, InputEvent::AbortTriggered) => Ok(Verdict::Unchanged),
            (_, InputEvent::AbortTriggered) => Ok(self.move_to(Phase::Abort, ValveState::ABORT)),

            // Leaving Abort requires the external safing confirmation.
            (Phase::Abort, InputEvent::SafingReset) => {
                Ok(self.move_to(Phase::PreArm, ValveState::PRE_ARM))
            }
            (_, InputEvent::SafingReset) => Err(self.reject(event)),

            (Phase::PreArm, InputEvent::ModeChanged(mode)) => Ok(self.set_mode(mode)),
            (Phase::Armed, InputEvent::ModeChanged(Mode::Dev)) => Err(self.reject(event)),
            (Phase::Armed, InputEvent::ModeChanged(mode)) => Ok(self.set_mode(mode)),
            (_, InputEvent::ModeChanged(_)) => Err(self.reject(event)),

            (Phase::PreArm, InputEvent::ArmAsserted) => {
                let fueling_or_launch = matches!(self.mode, Mode::Fueling | Mode::Launch);
                if fueling_or_launch && !self.register.has_flow() {
                    Ok(self.move_to(Phase::Armed, ValveState::ARMED))
                } else {
                    Err(self.reject(event))
                }
            }
            (Phase::Armed, InputEvent::ArmAsserted) => Ok(Verdict::Unchanged),
            (_, InputEvent::ArmAsserted) => Err(self.reject(event)),

            // One-way by design: this is ignition.
            (Phase::Armed, InputEvent::LaunchTriggered) => {
                if self.mode == Mode::Launch {
                    Ok(self.move_to(Phase::Launch, ValveState::LAUNCH))
                } else {
                    Err(self.reject(event))
                }
            }
            (Phase::Launch, InputEvent::LaunchTriggered) => Ok(Verdict::Unchanged),
            (_, InputEvent::LaunchTriggered) => Err(self.reject(event)),

            (Phase::PreArm, InputEvent::ValveToggled(valve)) => {
                if self.mode != Mode::Dev {
                    return Err(self.reject(event));
                }
                match self.register.toggled(valve) {
                    Some(next) => Ok(self.move_to(Phase::PreArm, next)),
                    None => Err(self.reject(event)),
                }
            }
            (_, InputEvent::ValveToggled(_)) => Err(self.reject(event)),
        }
    }

    fn move_to(&mut self, phase: Phase, register: ValveState) -> Verdict {
        let previous = self.register;
        self.phase = phase;
        self.register = register;
        Verdict::Applied {
            previous,
            current: register,
        }
    }

    fn set_mode(&mut self, mode: Mode) -> Verdict {
        if mode == self.mode {
            return Verdict::Unchanged;
        }
        self.mode = mode;
        Verdict::ModeSet(mode)
    }

    const fn reject(&self, event: InputEvent) -> RejectedTransition {
        RejectedTransition {
            phase: self.phase,
            mode: self.mode,
            event,
        }
    }
}
