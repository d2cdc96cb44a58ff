use serde::Serialize;

use crate::urb::{Direction, TransferType, Urb, UrbStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferCounters {
    pub submitted: u64,
    pub reaped: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    /// Submissions refused before reaching a device.
    pub rejected: u64,
    pub bytes_requested: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Counters kept by a [`crate::RootHub`]. Serialises for diagnostics dumps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RootHubStats {
    pub total: TransferCounters,
    pub control: TransferCounters,
    pub isochronous: TransferCounters,
    pub bulk: TransferCounters,
    pub interrupt: TransferCounters,
    pub message: TransferCounters,
    pub isoc_packets: u64,
    pub isoc_packets_ok: u64,
    pub isoc_packets_failed: u64,
    pub frames: u64,
    pub attaches: u64,
    pub detaches: u64,
}

impl RootHubStats {
    fn counters_mut(&mut self, xfer_type: TransferType) -> &mut TransferCounters {
        match xfer_type {
            TransferType::Control => &mut self.control,
            TransferType::Isochronous => &mut self.isochronous,
            TransferType::Bulk => &mut self.bulk,
            TransferType::Interrupt => &mut self.interrupt,
            TransferType::Message => &mut self.message,
        }
    }

    pub fn for_type(&self, xfer_type: TransferType) -> &TransferCounters {
        match xfer_type {
            TransferType::Control => &self.control,
            TransferType::Isochronous => &self.isochronous,
            TransferType::Bulk => &self.bulk,
            TransferType::Interrupt => &self.interrupt,
            TransferType::Message => &self.message,
        }
    }

    fn bump(&mut self, xfer_type: TransferType, f: impl Fn(&mut TransferCounters)) {
        f(&mut self.total);
        f(self.counters_mut(xfer_type));
    }

    pub(crate) fn record_submit(&mut self, xfer_type: TransferType, len: usize) {
        let len = len as u64;
        self.bump(xfer_type, |c| {
            c.submitted += 1;
            c.bytes_requested += len;
        });
    }

    pub(crate) fn record_rejected(&mut self, xfer_type: TransferType) {
        self.bump(xfer_type, |c| c.rejected += 1);
    }

    pub(crate) fn record_retry(&mut self, xfer_type: TransferType) {
        self.bump(xfer_type, |c| c.retried += 1);
    }

    pub(crate) fn record_cancelled(&mut self, xfer_type: TransferType) {
        self.bump(xfer_type, |c| c.cancelled += 1);
    }

    pub(crate) fn record_reaped(&mut self, urb: &Urb) {
        let len = urb.len() as u64;
        let ok = urb.status.is_ok_for(urb.short_ok);
        let direction = urb.direction();
        self.bump(urb.xfer_type(), |c| {
            c.reaped += 1;
            if !ok {
                c.failed += 1;
            }
            match direction {
                Direction::In => c.bytes_read += len,
                Direction::Out => c.bytes_written += len,
                Direction::Setup => {}
            }
        });
        if urb.xfer_type() == TransferType::Isochronous {
            for pkt in urb.isoc_packets() {
                self.isoc_packets += 1;
                if pkt.status == UrbStatus::Ok || pkt.status == UrbStatus::DataUnderrun {
                    self.isoc_packets_ok += 1;
                } else {
                    self.isoc_packets_failed += 1;
                }
            }
        }
    }
}
