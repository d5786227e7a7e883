use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::EnumIter;

/// Single-bit valve masks within the 8-bit control register.
///
/// The composite states below are the only values the ground station ever
/// commands outside of dev-mode intermediates; they are kept as literals
/// rather than rebuilt from these masks.
pub mod mask {
    /// GN2 pressurant routed to the LNG tank.
    pub const LNG_PRES: u8 = 0b100_0000;
    /// GN2 pressurant routed to the LOX tank.
    pub const LOX_PRES: u8 = 0b010_0000;
    pub const GN2_VENT: u8 = 0b001_0000;
    pub const LNG_FLOW: u8 = 0b000_1000;
    pub const LNG_VENT: u8 = 0b000_0100;
    pub const LOX_FLOW: u8 = 0b000_0010;
    pub const LOX_VENT: u8 = 0b000_0001;
    pub const NULL: u8 = 0b000_0000;

    pub const ALL_PRES: u8 = LNG_PRES | LOX_PRES;
    pub const ALL_FLOWS: u8 = LNG_FLOW | LOX_FLOW;
    pub const ALL_VENTS: u8 = GN2_VENT | LNG_VENT | LOX_VENT;
}

/// One physical valve on the pad plumbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
pub enum Valve {
    LngPressurize,
    LoxPressurize,
    Gn2Vent,
    LngFlow,
    LngVent,
    LoxFlow,
    LoxVent,
}

impl Valve {
    pub const fn mask(self) -> u8 {
        match self {
            Valve::LngPressurize => mask::LNG_PRES,
            Valve::LoxPressurize => mask::LOX_PRES,
            Valve::Gn2Vent => mask::GN2_VENT,
            Valve::LngFlow => mask::LNG_FLOW,
            Valve::LngVent => mask::LNG_VENT,
            Valve::LoxFlow => mask::LOX_FLOW,
            Valve::LoxVent => mask::LOX_VENT,
        }
    }
}

/// Register values that must never be asserted on the bus: flow and vent
/// open on the same propellant line, pressurization into a venting tank,
/// or pressurization while the GN2 manifold itself is venting.
fn violates_interlock(raw: u8) -> bool {
    let both = |a: u8, b: u8| raw & a != 0 && raw & b != 0;
    both(mask::LNG_FLOW, mask::LNG_VENT)
        || both(mask::LOX_FLOW, mask::LOX_VENT)
        || both(mask::LNG_PRES, mask::LNG_VENT)
        || both(mask::LOX_PRES, mask::LOX_VENT)
        || both(mask::ALL_PRES, mask::GN2_VENT)
}

/// The 8-bit valve & control register.
///
/// Not a free-form bitset: values are either one of the four canonical
/// composites or an intermediate admitted by [`ValveState::from_bits`].
/// Only the transition authority constructs new values at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValveState(u8);

impl ValveState {
    /// Safe: all valves closed.
    pub const PRE_ARM: ValveState = ValveState(0b000_0000);
    /// Abort: open all vent valves.
    pub const ABORT: ValveState = ValveState(0b001_0101);
    /// Armed: tanks pressurized, ready to launch, waiting trigger.
    pub const ARMED: ValveState = ValveState(0b110_0000);
    /// Launch: ignition/flight started.
    pub const LAUNCH: ValveState = ValveState(0b110_1010);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Accepts only the 7-bit values that pass the interlock rules.
    pub fn from_bits(raw: u8) -> Option<ValveState> {
        if raw & 0b1000_0000 != 0 || violates_interlock(raw) {
            return None;
        }
        Some(ValveState(raw))
    }

    pub const fn is_canonical(self) -> bool {
        self.0 == ValveState::PRE_ARM.0
            || self.0 == ValveState::ABORT.0
            || self.0 == ValveState::ARMED.0
            || self.0 == ValveState::LAUNCH.0
    }

    pub const fn valve_open(self, valve: Valve) -> bool {
        self.0 & valve.mask() != 0
    }

    /// Any propellant flow valve open. Arming is refused mid-flow.
    pub const fn has_flow(self) -> bool {
        self.0 & mask::ALL_FLOWS != 0
    }

    /// Register with one valve flipped, or None if the result would
    /// violate an interlock.
    pub fn toggled(self, valve: Valve) -> Option<ValveState> {
        ValveState::from_bits(self.0 ^ valve.mask())
    }

    /// Bits that differ between two registers.
    pub const fn changed_mask(self, other: ValveState) -> u8 {
        self.0 ^ other.0
    }
}

impl fmt::Display for ValveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ValveState::PRE_ARM => write!(f, "PRE_ARM"),
            ValveState::ABORT => write!(f, "ABORT"),
            ValveState::ARMED => write!(f, "ARMED"),
            ValveState::LAUNCH => write!(f, "LAUNCH"),
            ValveState(bits) => write!(f, "0b{bits:07b}"),
        }
    }
}
