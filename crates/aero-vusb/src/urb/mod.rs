//! USB Request Blocks: the unit of transfer between a host controller emulation, the root hub and
//! a device backend.
//!
//! A [`Urb`] is an owned value. Whoever holds it owns it: the controller between allocation and
//! submission, the device backend while it is in flight, and the root hub while it is being
//! reaped. The controller gets to look at a completed URB (through
//! [`crate::RootHubPort::xfer_completion`]) but the root hub returns it to the [`UrbPool`] right
//! after.

use std::fmt;

use serde::{Deserialize, Serialize};

mod pool;

pub use pool::{UrbPool, UrbRequest};

/// Upper bound on isochronous packets carried by one URB.
pub const MAX_ISOC_PACKETS: usize = 8;

/// Upper bound on the data buffer of one URB.
pub const MAX_URB_DATA_LEN: usize = 32 * 1024 * 1024;

pub const SETUP_PACKET_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UrbId(u64);

impl UrbId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UrbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
    /// A complete control transfer: an 8-byte setup packet followed by the data stage.
    Message,
}

impl TransferType {
    pub(crate) fn short_name(self) -> &'static str {
        match self {
            TransferType::Control => "ctrl",
            TransferType::Isochronous => "isoc",
            TransferType::Bulk => "bulk",
            TransferType::Interrupt => "intr",
            TransferType::Message => "msg",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Setup,
    In,
    Out,
}

impl Direction {
    pub(crate) fn marker(self) -> char {
        match self {
            Direction::Setup => 's',
            Direction::In => '<',
            Direction::Out => '>',
        }
    }
}

/// Completion status of a transfer or isochronous packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UrbStatus {
    #[default]
    Ok,
    Stall,
    /// Device not responding.
    Dnr,
    /// Transfer error. Also used for transfers completed by cancellation.
    Crc,
    DataUnderrun,
    DataOverrun,
    NotAccessed,
    Undo,
    Canceled,
    Invalid,
}

impl UrbStatus {
    pub fn is_ok(self) -> bool {
        self == UrbStatus::Ok
    }

    /// Short reads are the normal outcome of many IN transfers and only fail when the sender
    /// asked for exact lengths.
    pub fn is_ok_for(self, short_ok: bool) -> bool {
        self == UrbStatus::Ok || (short_ok && self == UrbStatus::DataUnderrun)
    }
}

/// URB life cycle.
///
/// ```text
/// Free -> Allocated -> InFlight -> Reaped    -> Free
///             |            \-----> Cancelled -> Free
///             \-> Free (freed without submitting)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UrbState {
    Invalid,
    Free,
    Allocated,
    InFlight,
    Reaped,
    Cancelled,
}

impl UrbState {
    pub fn can_transition_to(self, next: UrbState) -> bool {
        use UrbState::*;
        matches!(
            (self, next),
            (Free, Allocated)
                | (Allocated, InFlight)
                | (Allocated, Free)
                | (InFlight, Reaped)
                | (InFlight, Cancelled)
                | (Reaped, Free)
                | (Cancelled, Free)
        )
    }
}

/// Standard 8-byte control request header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetupPacket {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl SetupPacket {
    pub fn from_bytes(bytes: [u8; SETUP_PACKET_LEN]) -> Self {
        Self {
            bm_request_type: bytes[0],
            b_request: bytes[1],
            w_value: u16::from_le_bytes([bytes[2], bytes[3]]),
            w_index: u16::from_le_bytes([bytes[4], bytes[5]]),
            w_length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(self) -> [u8; SETUP_PACKET_LEN] {
        let v = self.w_value.to_le_bytes();
        let i = self.w_index.to_le_bytes();
        let l = self.w_length.to_le_bytes();
        [
            self.bm_request_type,
            self.b_request,
            v[0],
            v[1],
            i[0],
            i[1],
            l[0],
            l[1],
        ]
    }

    pub fn is_device_to_host(&self) -> bool {
        self.bm_request_type & 0x80 != 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsocPacket {
    /// Offset of the packet into the URB data buffer.
    pub offset: u32,
    /// Requested length on submission, transferred length on completion.
    pub len: u32,
    pub status: UrbStatus,
}

pub struct Urb {
    id: UrbId,
    state: UrbState,
    desc: String,
    pub dst_address: u8,
    port: Option<u8>,
    pub endpoint: u8,
    xfer_type: TransferType,
    direction: Direction,
    /// Whether a short IN transfer counts as success.
    pub short_ok: bool,
    pub status: UrbStatus,
    data: Vec<u8>,
    len: usize,
    isoc: [IsocPacket; MAX_ISOC_PACKETS],
    isoc_count: u8,
    hci: Vec<u8>,
    tds: Vec<u8>,
    td_size: usize,
    td_count: usize,
}

impl fmt::Debug for Urb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Urb")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("state", &self.state)
            .field("dst_address", &self.dst_address)
            .field("port", &self.port)
            .field("endpoint", &self.endpoint)
            .field("status", &self.status)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl Urb {
    pub fn id(&self) -> UrbId {
        self.id
    }

    pub fn state(&self) -> UrbState {
        self.state
    }

    /// Short human-readable tag used in logs, e.g. `bulk>0042 (ohci)`.
    pub fn description(&self) -> &str {
        &self.desc
    }

    /// The root port this URB was routed to at allocation, if the controller knew it.
    pub fn port(&self) -> Option<u8> {
        self.port
    }

    pub fn xfer_type(&self) -> TransferType {
        self.xfer_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Largest payload the buffer can carry.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid bytes: the requested length on submission, the transferred length on completion.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Clamped to [`Urb::capacity`].
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.len(), "URB length beyond capacity");
        self.len = len.min(self.data.len());
    }

    /// The valid part of the buffer.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole buffer, regardless of [`Urb::len`].
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn buffer(&self) -> &[u8] {
        &self.data
    }

    /// Copies `bytes` into the buffer and sets the length, truncating at capacity.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n;
        n
    }

    /// The setup stage of a control transfer, if this URB carries one.
    pub fn setup_packet(&self) -> Option<SetupPacket> {
        let carries_setup = match self.xfer_type {
            TransferType::Message => true,
            TransferType::Control => self.direction == Direction::Setup,
            _ => false,
        };
        if !carries_setup {
            return None;
        }
        let bytes: [u8; SETUP_PACKET_LEN] = self.data.get(..SETUP_PACKET_LEN)?.try_into().ok()?;
        Some(SetupPacket::from_bytes(bytes))
    }

    pub fn isoc_packets(&self) -> &[IsocPacket] {
        &self.isoc[..self.isoc_count as usize]
    }

    pub fn isoc_packets_mut(&mut self) -> &mut [IsocPacket] {
        &mut self.isoc[..self.isoc_count as usize]
    }

    /// Clamped to [`MAX_ISOC_PACKETS`].
    pub fn set_isoc_packet_count(&mut self, count: usize) {
        debug_assert!(count <= MAX_ISOC_PACKETS);
        self.isoc_count = count.min(MAX_ISOC_PACKETS) as u8;
    }

    /// Controller-private bytes, sized by [`UrbPool::set_params`].
    pub fn hci_data(&self) -> &[u8] {
        &self.hci
    }

    pub fn hci_data_mut(&mut self) -> &mut [u8] {
        &mut self.hci
    }

    pub fn td_count(&self) -> usize {
        self.td_count
    }

    /// Controller-private transfer descriptor slot `index`.
    pub fn td(&self, index: usize) -> Option<&[u8]> {
        if index >= self.td_count {
            return None;
        }
        let start = index * self.td_size;
        self.tds.get(start..start + self.td_size)
    }

    pub fn td_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        if index >= self.td_count {
            return None;
        }
        let start = index * self.td_size;
        self.tds.get_mut(start..start + self.td_size)
    }

    pub(crate) fn set_state(&mut self, next: UrbState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal URB transition {:?} -> {:?} for {}",
            self.state,
            next,
            self.desc
        );
        tracing::trace!(urb = %self.desc, from = ?self.state, to = ?next, "urb state");
        self.state = next;
    }

    pub(crate) fn is_control_pipe(&self) -> bool {
        matches!(self.xfer_type, TransferType::Control | TransferType::Message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_table_only_allows_lifecycle_edges() {
        use UrbState::*;
        assert!(Free.can_transition_to(Allocated));
        assert!(Allocated.can_transition_to(Free));
        assert!(InFlight.can_transition_to(Cancelled));
        assert!(Reaped.can_transition_to(Free));

        assert!(!Free.can_transition_to(InFlight));
        assert!(!InFlight.can_transition_to(Free));
        assert!(!Reaped.can_transition_to(InFlight));
        assert!(!Invalid.can_transition_to(Allocated));
        assert!(!Cancelled.can_transition_to(Reaped));
    }

    #[test]
    fn setup_packet_layout() {
        let pkt = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
        assert!(pkt.is_device_to_host());
        assert_eq!(pkt.b_request, 0x06);
        assert_eq!(pkt.w_value, 0x0100);
        assert_eq!(pkt.w_length, 18);
        assert_eq!(
            pkt.to_bytes(),
            [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]
        );
    }

    #[test]
    fn short_ok_accepts_underrun() {
        assert!(UrbStatus::DataUnderrun.is_ok_for(true));
        assert!(!UrbStatus::DataUnderrun.is_ok_for(false));
        assert!(!UrbStatus::Stall.is_ok_for(true));
    }
}
