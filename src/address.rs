//! Node addressing and role bitflags.
//!
//! Addresses are 16-bit opaque node identifiers. A handful of values are
//! reserved for broadcast and for the two uplink sinks a gateway node can
//! hand traffic to instead of the radio.

use std::fmt;

/// 16-bit opaque node identifier.
pub type Address = u16;

/// Reserved broadcast address: "every node", used by Hello frames and by the
/// application when it wants the Destination Selector to pick an upstream path.
pub const ADDR_BROADCAST: Address = 0xFFFF;
/// Reserved sink address for the cellular (4G) uplink.
pub const ADDR_4G: Address = 0xFFFE;
/// Reserved sink address for the Wi-Fi uplink.
pub const ADDR_WIFI: Address = 0xFFFD;
/// Sentinel meaning "no usable destination was found".
pub const NO_DESTINATION: Address = 0xFFFC;

/// True if `addr` is one of the reserved special addresses rather than a
/// real node.
pub fn is_special(addr: Address) -> bool {
    matches!(addr, ADDR_BROADCAST | ADDR_4G | ADDR_WIFI | NO_DESTINATION)
}

/// Role bitflags advertised in Hello frames and stored per routing entry.
///
/// `DEFAULT` carries no bits; the others combine freely (a node can be both
/// a `CLIENT` and a `RELAY`, for instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Role(u8);

impl Role {
    pub const DEFAULT: Role = Role(0b0000_0000);
    pub const CLIENT: Role = Role(0b0000_0001);
    pub const GATEWAY: Role = Role(0b0000_0010);
    pub const RELAY: Role = Role(0b0000_0100);
    pub const TERMINAL: Role = Role(0b0000_1000);

    /// Builds a role set from the raw wire byte.
    pub const fn from_bits(bits: u8) -> Role {
        Role(bits)
    }

    /// Returns the raw wire byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether `self` carries every bit set in `other`.
    pub const fn contains(self, other: Role) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Role) -> Role {
        Role(self.0 | other.0)
    }
}

impl std::ops::BitOr for Role {
    type Output = Role;
    fn bitor(self, rhs: Role) -> Role {
        self.union(rhs)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "DEFAULT");
        }
        let mut first = true;
        for (bit, name) in [
            (Role::CLIENT, "CLIENT"),
            (Role::GATEWAY, "GATEWAY"),
            (Role::RELAY, "RELAY"),
            (Role::TERMINAL, "TERMINAL"),
        ] {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_addresses_are_recognized() {
        assert!(is_special(ADDR_BROADCAST));
        assert!(is_special(ADDR_4G));
        assert!(is_special(ADDR_WIFI));
        assert!(is_special(NO_DESTINATION));
        assert!(!is_special(1));
        assert!(!is_special(0));
    }

    #[test]
    fn role_union_and_contains() {
        let r = Role::CLIENT | Role::RELAY;
        assert!(r.contains(Role::CLIENT));
        assert!(r.contains(Role::RELAY));
        assert!(!r.contains(Role::GATEWAY));
        assert_eq!(r.bits(), 0b0000_0101);
    }

    #[test]
    fn role_display_lists_set_bits() {
        assert_eq!(Role::DEFAULT.to_string(), "DEFAULT");
        assert_eq!((Role::CLIENT | Role::GATEWAY).to_string(), "CLIENT|GATEWAY");
    }
}
