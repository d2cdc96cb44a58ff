//! Virtual USB root hub.
//!
//! A [`RootHub`] sits between one host controller emulation (OHCI, EHCI, xHCI, ...) and up to
//! 128 device backends. The controller allocates [`Urb`]s from the hub, submits them, and gets
//! every one of them back exactly once through [`RootHubPort::xfer_completion`]. The hub keeps
//! per-device state (USB address, configuration, halted endpoints) by following the standard
//! requests that flow through it, serialises device resets, and paces periodic frame
//! processing.
//!
//! ```text
//!  host controller  --RootHubConnector-->  RootHub  --UsbDeviceBackend-->  device
//!                   <---RootHubPort-----           <----CompletionSink----
//! ```

mod backend;
mod config;
mod connector;
pub mod descriptor;
mod device;
mod error;
mod frame;
mod hub;
mod port_table;
mod stats;
mod urb;

pub use backend::{CompletionSink, UsbDeviceBackend};
pub use config::{IdleBackoffStep, RootHubConfig};
pub use connector::{ActivityLed, RootHubConnector, RootHubPort, UsbVersions};
pub use device::{
    Device, DeviceState, ResetCompletion, UsbSpeed, USB_FEATURE_ENDPOINT_HALT,
    USB_REQUEST_CLEAR_FEATURE, USB_REQUEST_SET_ADDRESS, USB_REQUEST_SET_CONFIGURATION,
    USB_REQUEST_SET_INTERFACE,
};
pub use error::{
    BackendError, DescriptorError, HciError, ResetError, Result, RootHubError, UrbAllocError,
};
pub use frame::{
    bit_times_per_frame, isoc_frame_delta, FrameScheduler, FrameTick, USB_BUS_CLOCK_HZ,
    USB_FRAME_RATE_HZ,
};
pub use hub::{RootHub, SavePrepared};
pub use port_table::{PortBitmap, PortTable, MAX_PORTS};
pub use stats::{RootHubStats, TransferCounters};
pub use urb::{
    Direction, IsocPacket, SetupPacket, TransferType, Urb, UrbId, UrbPool, UrbRequest, UrbState,
    UrbStatus, MAX_ISOC_PACKETS, MAX_URB_DATA_LEN, SETUP_PACKET_LEN,
};
