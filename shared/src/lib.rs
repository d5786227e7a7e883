//! Wire-level vocabulary shared between the ground station and the pad
//! node firmware: the valve/control register encoding, node addressing,
//! and the raw-frame codec.

pub mod frame;
pub mod node;
pub mod valve;

pub use frame::{decode, encode, DecodeError, Frame, FramePayload, SensorKind, ETHERTYPE};
pub use node::{NodeAddress, NodeRegistry, NodeRole};
pub use valve::{Valve, ValveState};
