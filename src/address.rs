//! Node addressing.
//!
//! Matches `testbed/swarmit/controller.py::addr_to_hex` / the broadcast
//! sentinel used throughout the original controller.

use std::fmt;
use thiserror::Error;

/// 64-bit node address. `BROADCAST` is the all-ones sentinel meaning "every node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeAddress(pub u64);

impl NodeAddress {
    /// All-ones sentinel address: one transmission targets every node.
    pub const BROADCAST: NodeAddress = NodeAddress(0xFFFF_FFFF_FFFF_FFFF);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    /// Parse an 8-byte big-endian hex string (e.g. `00000000000000AB`).
    pub fn parse_hex(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.len() != 16 {
            return Err(AddressError::InvalidLength(s.to_string()));
        }
        let value = u64::from_str_radix(s, 16)
            .map_err(|_| AddressError::InvalidHex(s.to_string()))?;
        Ok(NodeAddress(value))
    }
}

/// 8-byte big-endian uppercase hex representation, per spec.md §3.
impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address must be 16 hex characters, got {0:?}")]
    InvalidLength(String),
    #[error("invalid hex address: {0:?}")]
    InvalidHex(String),
}
