//! The two interfaces between a host controller emulation and the root hub.
//!
//! [`RootHubPort`] is implemented by the host controller and called by the root hub: port
//! attach/detach notifications, transfer completions and per-frame work. [`RootHubConnector`]
//! is what the host controller calls to drive the hub; [`crate::RootHub`] implements it.

use std::time::Duration;

use bitflags::bitflags;

use crate::backend::UsbDeviceBackend;
use crate::device::{DeviceState, ResetCompletion, UsbSpeed};
use crate::error::{HciError, Result, UrbAllocError};
use crate::port_table::PortBitmap;
use crate::urb::{Direction, Urb, UrbId, UrbRequest};

bitflags! {
    /// USB generations a host controller can carry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct UsbVersions: u32 {
        const USB11 = 1 << 0;
        const USB20 = 1 << 1;
        const USB3 = 1 << 2;
    }
}

impl UsbVersions {
    /// Whether a device running at `speed` can be attached to a controller with these versions.
    pub fn carries(self, speed: UsbSpeed) -> bool {
        match speed {
            UsbSpeed::Low | UsbSpeed::Full => self.contains(UsbVersions::USB11),
            UsbSpeed::High | UsbSpeed::Variable => self.contains(UsbVersions::USB20),
            UsbSpeed::Super | UsbSpeed::SuperPlus => self.contains(UsbVersions::USB3),
            UsbSpeed::Unknown => !self.is_empty(),
        }
    }
}

/// Activity indicator updated on submission. Flags are sticky; whoever displays them clears them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityLed {
    pub reading: bool,
    pub writing: bool,
}

/// Up-calls from the root hub into the host controller emulation.
pub trait RootHubPort {
    /// Ports the controller exposes.
    fn available_ports(&self) -> PortBitmap;

    fn usb_versions(&self) -> UsbVersions;

    /// A device appeared on `port`.
    fn attach(&mut self, port: u8, speed: UsbSpeed) -> std::result::Result<(), HciError>;

    /// The device on `port` is gone. In-flight URBs are cancelled right after this returns.
    fn detach(&mut self, port: u8);

    /// The hub is being reset; the controller resets its port registers.
    fn reset(&mut self, force_real: bool);

    /// Called exactly once for every submitted URB.
    fn xfer_completion(&mut self, urb: &Urb);

    /// A transfer failed. Returning `true` sends the same URB to the device again.
    fn xfer_error(&mut self, urb: &Urb) -> bool;

    /// Per-frame work. Returns whether there was any.
    fn start_frame(&mut self, frame: u32) -> bool {
        let _ = frame;
        false
    }

    fn frame_rate_changed(&mut self, hz: u32) {
        let _ = hz;
    }
}

/// Down-calls from the host controller emulation into the root hub.
pub trait RootHubConnector {
    /// Sizes the controller-private areas of every URB. Must happen before the first allocation.
    fn set_urb_params(&mut self, hci_size: usize, td_size: usize) -> Result<()>;

    /// Resets the hub and every attached device.
    fn reset(&mut self, force_real: bool) -> Result<()>;

    fn power_on(&mut self) -> Result<()>;

    fn power_off(&mut self) -> Result<()>;

    fn new_urb(&mut self, request: &UrbRequest<'_>) -> std::result::Result<Urb, UrbAllocError>;

    /// Releases a URB that was never submitted.
    fn free_urb(&mut self, urb: Urb) -> Result<()>;

    /// On failure the URB has already been freed.
    fn submit_urb(&mut self, urb: Urb, led: Option<&mut ActivityLed>) -> Result<UrbId>;

    fn reap_async_urbs(&mut self, port: u8, timeout: Duration);

    /// Cancels every URB queued on the same pipe as `urb`.
    fn cancel_urbs_on_endpoint(&mut self, urb: UrbId) -> Result<()>;

    fn cancel_all_urbs(&mut self);

    fn abort_endpoint(&mut self, port: u8, endpoint: u8, direction: Direction) -> Result<()>;

    fn attach_device(&mut self, port: u8, backend: Box<dyn UsbDeviceBackend>) -> Result<()>;

    fn detach_device(&mut self, port: u8) -> Result<()>;

    fn set_periodic_frame_processing(&mut self, hz: u32);

    fn periodic_frame_rate(&self) -> u32;

    fn update_isoc_frame_delta(
        &mut self,
        port: u8,
        endpoint: u8,
        direction: Direction,
        frame: u32,
        bits: u8,
    ) -> u32;

    /// Blocks until the backend finished resetting.
    fn device_reset_sync(&mut self, port: u8, force_real: bool) -> Result<()>;

    /// Returns immediately; `done` runs on a worker thread no earlier than the reset floor.
    fn device_reset_async(&mut self, port: u8, force_real: bool, done: ResetCompletion)
        -> Result<()>;

    fn device_power_on(&mut self, port: u8) -> Result<()>;

    fn device_power_off(&mut self, port: u8) -> Result<()>;

    fn device_state(&self, port: u8) -> Result<DeviceState>;

    fn device_is_saved_state_supported(&self, port: u8) -> Result<bool>;

    fn device_speed(&self, port: u8) -> Result<UsbSpeed>;
}
