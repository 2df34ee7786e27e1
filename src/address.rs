// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Topology addresses and device GUIDs.
//!
//! An [`Address`] names a node's position in the MST tree as the sequence of
//! downstream port numbers walked from the root connector. The root itself is
//! the empty address. Addresses are the primary key for all topology lookups.

use std::fmt::{self, Display};

use rand::RngCore;
use uuid::Uuid;

/// Maximum depth of an MST topology address.
pub const MAX_ADDRESS_DEPTH: usize = 16;

/// Path of downstream port numbers from the root connector to a node.
///
/// Immutable once constructed. Parent and tail derivation are pure functions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address {
    ports: [u8; MAX_ADDRESS_DEPTH],
    len: u8,
}

impl Address {
    /// Returns the root (empty) address.
    pub const fn root() -> Self {
        Address {
            ports: [0; MAX_ADDRESS_DEPTH],
            len: 0,
        }
    }

    /// Builds an address from a slice of port numbers.
    ///
    /// # Panics
    /// If `ports` is deeper than [`MAX_ADDRESS_DEPTH`].
    pub fn new(ports: &[u8]) -> Self {
        assert!(ports.len() <= MAX_ADDRESS_DEPTH, "address too deep");

        let mut addr = Self::root();
        addr.ports[..ports.len()].copy_from_slice(ports);
        addr.len = ports.len() as u8;
        addr
    }

    /// Returns number of hops from the root connector.
    pub fn size(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` if this is the root connector address.
    pub fn is_root(&self) -> bool {
        self.len == 0
    }

    /// Returns the port numbers making up this address.
    pub fn ports(&self) -> &[u8] {
        &self.ports[..self.len as usize]
    }

    /// Returns the address of the parent node. The parent of the root is the
    /// root itself.
    pub fn parent(&self) -> Address {
        if self.is_root() {
            return *self;
        }
        Address::new(&self.ports()[..self.size() - 1])
    }

    /// Returns the last port number of the address.
    ///
    /// Returns `0` for the root address, which has no tail.
    pub fn tail(&self) -> u8 {
        if self.is_root() {
            return 0;
        }
        self.ports[self.size() - 1]
    }

    /// Returns the address of the child behind downstream port `port`.
    ///
    /// # Panics
    /// If the address is already at [`MAX_ADDRESS_DEPTH`].
    pub fn child(&self, port: u8) -> Address {
        assert!(self.size() < MAX_ADDRESS_DEPTH, "address too deep");

        let mut addr = *self;
        addr.ports[addr.size()] = port;
        addr.len += 1;
        addr
    }

    /// Returns `true` if `self` is the immediate parent of `other`.
    pub fn is_parent_of(&self, other: &Address) -> bool {
        other.size() == self.size() + 1 && other.ports()[..self.size()] == *self.ports()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "root");
        }

        let s = self
            .ports()
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{s}")
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// 16-byte device identity.
///
/// Read from the device when it exposes one, otherwise synthesized with
/// [`Guid::synthesize()`]. The all-zero GUID means "not present". GUIDs are
/// used to recognize the same physical device re-appearing at a different
/// address, e.g. after a hub renumbers its ports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid([u8; 16]);

impl Guid {
    pub fn new(bytes: [u8; 16]) -> Self {
        Guid(bytes)
    }

    /// Returns `true` if no GUID is present (all zeroes).
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Synthesizes a driver-session-unique GUID for a device that does not
    /// expose one.
    pub fn synthesize() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);

        Guid(*uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .as_bytes())
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parent_and_tail() {
        let addr = Address::new(&[1, 8, 2]);
        assert_eq!(addr.size(), 3);
        assert_eq!(addr.tail(), 2);
        assert_eq!(addr.parent(), Address::new(&[1, 8]));
        assert_eq!(addr.parent().parent(), Address::new(&[1]));
        assert_eq!(addr.parent().parent().parent(), Address::root());
        assert_eq!(Address::root().parent(), Address::root());
    }

    #[test]
    fn child_derivation() {
        let root = Address::root();
        let hub = root.child(1);
        assert_eq!(hub, Address::new(&[1]));
        assert!(root.is_parent_of(&hub));
        assert!(!hub.is_parent_of(&root));
        assert!(hub.is_parent_of(&hub.child(3)));
    }

    #[test]
    fn display() {
        assert_eq!(Address::root().to_string(), "root");
        assert_eq!(Address::new(&[1, 8, 2]).to_string(), "1.8.2");
    }

    #[test]
    fn synthesized_guids_are_unique() {
        let a = Guid::synthesize();
        let b = Guid::synthesize();
        assert!(!a.is_zero());
        assert_ne!(a, b);
    }
}
