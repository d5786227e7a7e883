use crate::node::{NodeAddress, NodeRegistry};
use crate::valve::ValveState;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::EnumIter;

/// EtherType for pad control traffic. 0x88B5 is reserved by the IEEE for
/// local experimental use, matching the locally-administered address plan.
pub const ETHERTYPE: u16 = 0x88B5;

/// dest(6) + src(6) + ethertype(2).
pub const HEADER_LEN: usize = 14;
pub const MAX_FRAME_LEN: usize = 1514;

const TAG_VALVE_COMMAND: u8 = 0x01;
const TAG_TELEMETRY: u8 = 0x02;
const TAG_ACK: u8 = 0x03;

/// Channels reported by the sensor interface node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
pub enum SensorKind {
    LngTankPressure,
    LoxTankPressure,
    Gn2ManifoldPressure,
    LngTankTemperature,
    LoxTankTemperature,
}

impl SensorKind {
    const fn code(self) -> u8 {
        match self {
            SensorKind::LngTankPressure => 0,
            SensorKind::LoxTankPressure => 1,
            SensorKind::Gn2ManifoldPressure => 2,
            SensorKind::LngTankTemperature => 3,
            SensorKind::LoxTankTemperature => 4,
        }
    }

    const fn from_code(code: u8) -> Option<SensorKind> {
        match code {
            0 => Some(SensorKind::LngTankPressure),
            1 => Some(SensorKind::LoxTankPressure),
            2 => Some(SensorKind::Gn2ManifoldPressure),
            3 => Some(SensorKind::LngTankTemperature),
            4 => Some(SensorKind::LoxTankTemperature),
            _ => None,
        }
    }

    pub const fn is_pressure(self) -> bool {
        matches!(
            self,
            SensorKind::LngTankPressure
                | SensorKind::LoxTankPressure
                | SensorKind::Gn2ManifoldPressure
        )
    }
}

/// Record carried by one frame. Commands carry the full commanded
/// register; each actuator node applies its owned bits. `seq` lets nodes
/// drop duplicated commands after a link-level retry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum FramePayload {
    ValveCommand { seq: u16, state: ValveState },
    TelemetryReport { kind: SensorKind, value: f32 },
    Ack { seq: u16, state: ValveState },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    pub destination: NodeAddress,
    pub source: NodeAddress,
    pub payload: FramePayload,
}

impl Frame {
    pub const fn new(destination: NodeAddress, source: NodeAddress, payload: FramePayload) -> Frame {
        Frame {
            destination,
            source,
            payload,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodeError {
    /// Byte length, ethertype, or payload tag is not a recognized shape.
    Malformed(&'static str),
    /// An address on the frame is not in the node registry.
    UnknownSource(NodeAddress),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(reason) => write!(f, "malformed frame: {reason}"),
            DecodeError::UnknownSource(addr) => write!(f, "unregistered address {addr}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Serializes a frame for the wire. Pure and total: every valid
/// frame encodes.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 6);
    out.extend_from_slice(&frame.destination.octets());
    out.extend_from_slice(&frame.source.octets());
    out.extend_from_slice(&ETHERTYPE.to_be_bytes());
    match frame.payload {
        FramePayload::ValveCommand { seq, state } => {
            out.push(TAG_VALVE_COMMAND);
            out.extend_from_slice(&seq.to_le_bytes());
            out.push(state.bits());
        }
        FramePayload::TelemetryReport { kind, value } => {
            out.push(TAG_TELEMETRY);
            out.push(kind.code());
            out.extend_from_slice(&value.to_le_bytes());
        }
        FramePayload::Ack { seq, state } => {
            out.push(TAG_ACK);
            out.extend_from_slice(&seq.to_le_bytes());
            out.push(state.bits());
        }
    }
    out
}

fn address_at(bytes: &[u8], offset: usize) -> NodeAddress {
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&bytes[offset..offset + 6]);
    NodeAddress(octets)
}

fn register_at(bytes: &[u8], offset: usize) -> Result<ValveState, DecodeError> {
    ValveState::from_bits(bytes[offset])
        .ok_or(DecodeError::Malformed("register value violates interlocks"))
}

/// Deserializes one raw frame. Trailing bytes beyond the tagged body are
/// ignored: the NIC pads short Ethernet frames to the 60-byte minimum.
pub fn decode(bytes: &[u8], registry: &NodeRegistry) -> Result<Frame, DecodeError> {
    if bytes.len() < HEADER_LEN + 1 {
        return Err(DecodeError::Malformed("shorter than header"));
    }
    let ethertype = u16::from_be_bytes([bytes[12], bytes[13]]);
    if ethertype != ETHERTYPE {
        return Err(DecodeError::Malformed("unexpected ethertype"));
    }

    let payload = match bytes[HEADER_LEN] {
        TAG_VALVE_COMMAND => {
            if bytes.len() < HEADER_LEN + 4 {
                return Err(DecodeError::Malformed("truncated valve command"));
            }
            FramePayload::ValveCommand {
                seq: u16::from_le_bytes([bytes[15], bytes[16]]),
                state: register_at(bytes, 17)?,
            }
        }
        TAG_TELEMETRY => {
            if bytes.len() < HEADER_LEN + 6 {
                return Err(DecodeError::Malformed("truncated telemetry report"));
            }
            let kind = SensorKind::from_code(bytes[15])
                .ok_or(DecodeError::Malformed("unknown sensor kind"))?;
            let raw: [u8; 4] = [bytes[16], bytes[17], bytes[18], bytes[19]];
            FramePayload::TelemetryReport {
                kind,
                value: f32::from_le_bytes(raw),
            }
        }
        TAG_ACK => {
            if bytes.len() < HEADER_LEN + 4 {
                return Err(DecodeError::Malformed("truncated ack"));
            }
            FramePayload::Ack {
                seq: u16::from_le_bytes([bytes[15], bytes[16]]),
                state: register_at(bytes, 17)?,
            }
        }
        _ => return Err(DecodeError::Malformed("unrecognized payload tag")),
    };

    let destination = address_at(bytes, 0);
    let source = address_at(bytes, 6);
    for addr in [destination, source] {
        if registry.role_of(addr).is_none() {
            return Err(DecodeError::UnknownSource(addr));
        }
    }

    Ok(Frame {
        destination,
        source,
        payload,
    })
}
