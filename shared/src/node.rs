use crate::valve::mask;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

/// 6-byte hardware address on the MAC-raw pad segment.
///
/// Every assigned address carries the locally-administered bit and clears
/// the multicast bit in its first octet, so pad traffic can never collide
/// with vendor MAC space on a shared segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress(pub [u8; 6]);

impl NodeAddress {
    pub const fn octets(self) -> [u8; 6] {
        self.0
    }

    pub const fn is_locally_administered_unicast(self) -> bool {
        self.0[0] & 0b11 == 0b10
    }

    /// Parses `"02:47:53:00:00:01"`.
    pub fn parse(text: &str) -> Option<NodeAddress> {
        let mut octets = [0u8; 6];
        let mut parts = text.split(':');
        for octet in &mut octets {
            *octet = u8::from_str_radix(parts.next()?, 16).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(NodeAddress(octets))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Logical units on the pad segment. The ground station is the only
/// command source; the other three are field nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
pub enum NodeRole {
    GroundStation,
    /// Drives the three vent valves.
    ReliefValve,
    /// Drives the pressurization and propellant flow valves.
    FlowValve,
    /// Pressure/temperature sensor frontend; actuates nothing.
    SensorInterface,
}

impl NodeRole {
    /// Register bits this node actuates. Zero for non-actuator roles.
    pub const fn owned_mask(self) -> u8 {
        match self {
            NodeRole::ReliefValve => mask::ALL_VENTS,
            NodeRole::FlowValve => mask::ALL_PRES | mask::ALL_FLOWS,
            NodeRole::GroundStation | NodeRole::SensorInterface => mask::NULL,
        }
    }

    pub const fn default_address(self) -> NodeAddress {
        match self {
            NodeRole::GroundStation => NodeAddress([0x02, 0x47, 0x53, 0x00, 0x00, 0x01]),
            NodeRole::ReliefValve => NodeAddress([0x02, 0x52, 0x56, 0x00, 0x00, 0x02]),
            NodeRole::FlowValve => NodeAddress([0x02, 0x46, 0x4C, 0x00, 0x00, 0x03]),
            NodeRole::SensorInterface => NodeAddress([0x02, 0x53, 0x49, 0x00, 0x00, 0x04]),
        }
    }

    pub fn remotes() -> impl Iterator<Item = NodeRole> {
        NodeRole::iter().filter(|role| *role != NodeRole::GroundStation)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    NotLocallyAdministered(NodeRole, NodeAddress),
    DuplicateAddress(NodeRole, NodeRole, NodeAddress),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotLocallyAdministered(role, addr) => {
                write!(f, "{role:?} address {addr} is not locally-administered unicast")
            }
            RegistryError::DuplicateAddress(a, b, addr) => {
                write!(f, "{a:?} and {b:?} share address {addr}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Read-only role↔address table, fixed at process start. New hardware
/// means a config change and a redeploy, never dynamic registration.
#[derive(Clone, Debug)]
pub struct NodeRegistry {
    addresses: [NodeAddress; 4],
}

impl NodeRegistry {
    const fn slot(role: NodeRole) -> usize {
        match role {
            NodeRole::GroundStation => 0,
            NodeRole::ReliefValve => 1,
            NodeRole::FlowValve => 2,
            NodeRole::SensorInterface => 3,
        }
    }

    pub fn new(
        assign: impl Fn(NodeRole) -> NodeAddress,
    ) -> Result<NodeRegistry, RegistryError> {
        let mut addresses = [NodeAddress([0; 6]); 4];
        for role in NodeRole::iter() {
            addresses[NodeRegistry::slot(role)] = assign(role);
        }
        for role in NodeRole::iter() {
            let addr = addresses[NodeRegistry::slot(role)];
            if !addr.is_locally_administered_unicast() {
                return Err(RegistryError::NotLocallyAdministered(role, addr));
            }
            for other in NodeRole::iter().take(NodeRegistry::slot(role)) {
                if addresses[NodeRegistry::slot(other)] == addr {
                    return Err(RegistryError::DuplicateAddress(other, role, addr));
                }
            }
        }
        Ok(NodeRegistry { addresses })
    }

    pub const fn with_defaults() -> NodeRegistry {
        NodeRegistry {
            addresses: [
                NodeRole::GroundStation.default_address(),
                NodeRole::ReliefValve.default_address(),
                NodeRole::FlowValve.default_address(),
                NodeRole::SensorInterface.default_address(),
            ],
        }
    }

    pub fn address_of(&self, role: NodeRole) -> NodeAddress {
        self.addresses[NodeRegistry::slot(role)]
    }

    pub fn role_of(&self, address: NodeAddress) -> Option<NodeRole> {
        NodeRole::iter().find(|role| self.addresses[NodeRegistry::slot(*role)] == address)
    }
}
