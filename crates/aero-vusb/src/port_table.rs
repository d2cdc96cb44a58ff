use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::{Result, RootHubError};

/// Architectural ceiling on root hub ports.
pub const MAX_PORTS: usize = 128;

/// One bit per root hub port.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBitmap(u128);

impl PortBitmap {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u128) -> Self {
        Self(bits)
    }

    /// Ports `0..count`.
    pub const fn first_n(count: u8) -> Self {
        if count as usize >= MAX_PORTS {
            Self(u128::MAX)
        } else {
            Self((1u128 << count) - 1)
        }
    }

    pub const fn bits(self) -> u128 {
        self.0
    }

    pub fn contains(self, port: u8) -> bool {
        (port as usize) < MAX_PORTS && self.0 & (1u128 << port) != 0
    }

    pub fn insert(&mut self, port: u8) {
        if (port as usize) < MAX_PORTS {
            self.0 |= 1u128 << port;
        }
    }

    pub fn remove(&mut self, port: u8) {
        if (port as usize) < MAX_PORTS {
            self.0 &= !(1u128 << port);
        }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub fn first(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }

    pub fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = u8> {
        let mut rest = self.0;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let port = rest.trailing_zeros() as u8;
            rest &= rest - 1;
            Some(port)
        })
    }
}

impl fmt::Debug for PortBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortBitmap({:#034x})", self.0)
    }
}

/// Devices indexed by port, plus the membership bitmap.
///
/// A port's bit is set exactly when the slot holds a device. Devices that left the live states
/// (a failed reset detaches them in place) are swept by the root hub, see
/// [`PortTable::detached_ports`].
#[derive(Debug)]
pub struct PortTable {
    slots: Vec<Option<Device>>,
    occupied: PortBitmap,
    port_count: u8,
}

impl PortTable {
    /// `port_count` is clamped to `1..=128`.
    pub fn new(port_count: u8) -> Self {
        let port_count = port_count.clamp(1, MAX_PORTS as u8);
        Self {
            slots: (0..port_count).map(|_| None).collect(),
            occupied: PortBitmap::empty(),
            port_count,
        }
    }

    pub fn port_count(&self) -> u8 {
        self.port_count
    }

    pub(crate) fn check_port(&self, port: u8) -> Result<()> {
        if port >= self.port_count {
            return Err(RootHubError::PortOutOfRange {
                port,
                port_count: self.port_count,
            });
        }
        Ok(())
    }

    pub fn occupied(&self) -> PortBitmap {
        self.occupied
    }

    /// Ports holding a device in a live state.
    pub fn live(&self) -> PortBitmap {
        let mut live = PortBitmap::empty();
        for port in self.occupied.iter() {
            if self.get(port).is_some_and(|dev| dev.state().is_live()) {
                live.insert(port);
            }
        }
        live
    }

    /// Occupied ports whose device is no longer live.
    pub fn detached_ports(&self) -> PortBitmap {
        self.occupied.difference(self.live())
    }

    pub fn get(&self, port: u8) -> Option<&Device> {
        self.slots.get(port as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, port: u8) -> Option<&mut Device> {
        self.slots.get_mut(port as usize)?.as_mut()
    }

    pub(crate) fn insert(&mut self, port: u8, device: Device) -> Result<()> {
        self.check_port(port)?;
        let slot = &mut self.slots[port as usize];
        if slot.is_some() {
            return Err(RootHubError::PortOccupied(port));
        }
        *slot = Some(device);
        self.occupied.insert(port);
        Ok(())
    }

    pub(crate) fn remove(&mut self, port: u8) -> Result<Device> {
        self.check_port(port)?;
        let device = self.slots[port as usize]
            .take()
            .ok_or(RootHubError::PortEmpty(port))?;
        self.occupied.remove(port);
        Ok(device)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.slots.iter().flatten()
    }

    pub(crate) fn devices_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.slots.iter_mut().flatten()
    }

    /// The port of the live device currently answering to `address`. Several devices can sit at
    /// the default address during enumeration; the lowest port wins.
    pub fn find_by_address(&self, address: u8) -> Option<u8> {
        self.devices()
            .find(|dev| dev.state().accepts_transfers() && dev.address() == Some(address))
            .map(Device::port)
    }
}
