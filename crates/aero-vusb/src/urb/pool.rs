use std::fmt::Write as _;

use crate::error::{RootHubError, UrbAllocError};

use super::{Direction, IsocPacket, TransferType, Urb, UrbId, UrbState, UrbStatus};
use super::{MAX_ISOC_PACKETS, MAX_URB_DATA_LEN};

/// Recycled shells are only kept up to this many.
const MAX_CACHED_SHELLS: usize = 64;
/// Shells whose data buffer grew beyond this are dropped instead of cached.
const MAX_CACHED_BUFFER: usize = 64 * 1024;
/// Description serials wrap here so tags stay four digits wide.
const SERIAL_WRAP: u32 = 10_000;

/// Arguments of [`UrbPool::alloc`].
#[derive(Clone, Debug)]
pub struct UrbRequest<'a> {
    pub dst_address: u8,
    pub port: Option<u8>,
    pub endpoint: u8,
    pub xfer_type: TransferType,
    pub direction: Direction,
    pub data_len: usize,
    pub td_count: usize,
    pub tag: &'a str,
}

impl<'a> UrbRequest<'a> {
    pub fn new(xfer_type: TransferType, direction: Direction, data_len: usize) -> Self {
        Self {
            dst_address: 0,
            port: None,
            endpoint: 0,
            xfer_type,
            direction,
            data_len,
            td_count: 0,
            tag: "",
        }
    }

    pub fn address(mut self, dst_address: u8) -> Self {
        self.dst_address = dst_address;
        self
    }

    pub fn port(mut self, port: u8) -> Self {
        self.port = Some(port);
        self
    }

    pub fn endpoint(mut self, endpoint: u8) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn tds(mut self, td_count: usize) -> Self {
        self.td_count = td_count;
        self
    }

    pub fn tag(mut self, tag: &'a str) -> Self {
        self.tag = tag;
        self
    }
}

/// Bounded URB allocator that recycles released URBs.
#[derive(Debug)]
pub struct UrbPool {
    cached: Vec<Urb>,
    in_use: usize,
    capacity: usize,
    hci_size: usize,
    td_size: usize,
    next_id: u64,
    serial: u32,
    params_locked: bool,
}

impl UrbPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            cached: Vec::new(),
            in_use: 0,
            capacity,
            hci_size: 0,
            td_size: 0,
            next_id: 1,
            serial: 0,
            params_locked: false,
        }
    }

    /// Sizes of the controller-private area and of each transfer descriptor slot.
    ///
    /// Only accepted before the first allocation.
    pub fn set_params(&mut self, hci_size: usize, td_size: usize) -> Result<(), RootHubError> {
        if self.params_locked {
            return Err(RootHubError::UrbParamsLocked);
        }
        self.hci_size = hci_size;
        self.td_size = td_size;
        Ok(())
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn alloc(&mut self, req: &UrbRequest<'_>) -> Result<Urb, UrbAllocError> {
        if req.data_len > MAX_URB_DATA_LEN {
            return Err(UrbAllocError::TooLarge {
                len: req.data_len,
                max: MAX_URB_DATA_LEN,
            });
        }
        if self.in_use >= self.capacity {
            return Err(UrbAllocError::NoCapacity {
                in_use: self.in_use,
            });
        }
        self.params_locked = true;

        let mut urb = self.cached.pop().unwrap_or_else(shell);
        urb.id = UrbId(self.next_id);
        self.next_id += 1;

        urb.desc.clear();
        let _ = write!(
            urb.desc,
            "{}{}{:04}",
            req.xfer_type.short_name(),
            req.direction.marker(),
            self.serial
        );
        if !req.tag.is_empty() {
            let _ = write!(urb.desc, " ({})", req.tag);
        }
        self.serial = (self.serial + 1) % SERIAL_WRAP;

        urb.dst_address = req.dst_address;
        urb.port = req.port;
        urb.endpoint = req.endpoint;
        urb.xfer_type = req.xfer_type;
        urb.direction = req.direction;
        urb.short_ok = false;
        urb.status = UrbStatus::Ok;
        urb.data.clear();
        urb.data.resize(req.data_len, 0);
        urb.len = req.data_len;
        urb.isoc = [IsocPacket::default(); MAX_ISOC_PACKETS];
        urb.isoc_count = 0;
        urb.hci.clear();
        urb.hci.resize(self.hci_size, 0);
        urb.tds.clear();
        urb.tds.resize(self.td_size * req.td_count, 0);
        urb.td_size = self.td_size;
        urb.td_count = req.td_count;
        urb.set_state(UrbState::Allocated);

        self.in_use += 1;
        tracing::trace!(urb = %urb.desc, id = %urb.id, len = req.data_len, "urb allocated");
        Ok(urb)
    }

    /// Returns a URB that is no longer referenced anywhere to the pool.
    pub fn recycle(&mut self, mut urb: Urb) {
        urb.set_state(UrbState::Free);
        self.in_use = self.in_use.saturating_sub(1);
        tracing::trace!(urb = %urb.desc, id = %urb.id, "urb freed");
        if self.cached.len() < MAX_CACHED_SHELLS && urb.data.capacity() <= MAX_CACHED_BUFFER {
            self.cached.push(urb);
        }
    }

    /// Releases a URB whose state does not allow recycling. The shell is not reused.
    pub fn discard(&mut self, urb: Urb) {
        self.in_use = self.in_use.saturating_sub(1);
        tracing::debug!(urb = %urb.desc, id = %urb.id, state = ?urb.state, "urb discarded");
    }
}

fn shell() -> Urb {
    Urb {
        id: UrbId(0),
        state: UrbState::Free,
        desc: String::new(),
        dst_address: 0,
        port: None,
        endpoint: 0,
        xfer_type: TransferType::Control,
        direction: Direction::Setup,
        short_ok: false,
        status: UrbStatus::Ok,
        data: Vec::new(),
        len: 0,
        isoc: [IsocPacket::default(); MAX_ISOC_PACKETS],
        isoc_count: 0,
        hci: Vec::new(),
        tds: Vec::new(),
        td_size: 0,
        td_count: 0,
    }
}
