#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use aero_vusb::descriptor::DescriptorCache;
use aero_vusb::{
    BackendError, CompletionSink, Direction, HciError, PortBitmap, RootHub,
    RootHubConfig, RootHubPort, SetupPacket, TransferType, Urb, UrbId, UrbRequest, UrbStatus,
    UsbDeviceBackend, UsbSpeed, UsbVersions,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: UrbId,
    pub endpoint: u8,
    pub status: UrbStatus,
    pub len: usize,
    pub desc: String,
    pub data: Vec<u8>,
}

/// Host controller stand-in that records everything the root hub tells it.
#[derive(Debug)]
pub struct MockHci {
    pub exposed: PortBitmap,
    pub versions: UsbVersions,
    pub attached: Vec<(u8, UsbSpeed)>,
    pub detached: Vec<u8>,
    pub completions: Vec<Completion>,
    pub errors: Vec<(UrbId, UrbStatus)>,
    /// `xfer_error` asks for a retry while this is non-zero.
    pub retries: u32,
    pub refuse_attach: bool,
    pub hub_resets: u32,
    pub frames: Vec<u32>,
    pub frames_active: bool,
    pub rate_changes: Vec<u32>,
}

impl MockHci {
    pub fn new(ports: u8) -> Self {
        Self {
            exposed: PortBitmap::first_n(ports),
            versions: UsbVersions::all(),
            attached: Vec::new(),
            detached: Vec::new(),
            completions: Vec::new(),
            errors: Vec::new(),
            retries: 0,
            refuse_attach: false,
            hub_resets: 0,
            frames: Vec::new(),
            frames_active: false,
            rate_changes: Vec::new(),
        }
    }

    pub fn completion(&self, id: UrbId) -> Option<&Completion> {
        self.completions.iter().find(|c| c.id == id)
    }

    pub fn completion_ids(&self) -> Vec<UrbId> {
        self.completions.iter().map(|c| c.id).collect()
    }
}

impl RootHubPort for MockHci {
    fn available_ports(&self) -> PortBitmap {
        self.exposed
    }

    fn usb_versions(&self) -> UsbVersions {
        self.versions
    }

    fn attach(&mut self, port: u8, speed: UsbSpeed) -> Result<(), HciError> {
        if self.refuse_attach {
            return Err(HciError::Refused("port disabled".into()));
        }
        self.attached.push((port, speed));
        Ok(())
    }

    fn detach(&mut self, port: u8) {
        self.detached.push(port);
    }

    fn reset(&mut self, _force_real: bool) {
        self.hub_resets += 1;
    }

    fn xfer_completion(&mut self, urb: &Urb) {
        self.completions.push(Completion {
            id: urb.id(),
            endpoint: urb.endpoint,
            status: urb.status,
            len: urb.len(),
            desc: urb.description().to_string(),
            data: urb.data().to_vec(),
        });
    }

    fn xfer_error(&mut self, urb: &Urb) -> bool {
        self.errors.push((urb.id(), urb.status));
        if self.retries > 0 {
            self.retries -= 1;
            return true;
        }
        false
    }

    fn start_frame(&mut self, frame: u32) -> bool {
        self.frames.push(frame);
        self.frames_active
    }

    fn frame_rate_changed(&mut self, hz: u32) {
        self.rate_changes.push(hz);
    }
}

/// Completes every URB inside `submit`.
#[derive(Debug, Clone)]
pub struct Immediate {
    pub speed: UsbSpeed,
    pub saved_state: bool,
    /// Bytes returned for IN transfers; shorter than the buffer means a short read.
    pub in_data: Vec<u8>,
    pub stall_endpoint: Option<u8>,
    /// Submissions that fail with `Dnr` before the backend starts succeeding.
    pub failures: u32,
    pub submitted: Arc<Mutex<Vec<UrbId>>>,
    pub descriptors: Option<DescriptorCache>,
}

impl Immediate {
    pub fn new(speed: UsbSpeed) -> Self {
        Self {
            speed,
            saved_state: true,
            in_data: Vec::new(),
            stall_endpoint: None,
            failures: 0,
            submitted: Arc::new(Mutex::new(Vec::new())),
            descriptors: None,
        }
    }

    pub fn boxed(self) -> Box<dyn UsbDeviceBackend> {
        Box::new(self)
    }
}

impl UsbDeviceBackend for Immediate {
    fn name(&self) -> &str {
        "immediate"
    }

    fn speed(&self) -> UsbSpeed {
        self.speed
    }

    fn supports_saved_state(&self) -> bool {
        self.saved_state
    }

    fn descriptors(&self) -> Option<DescriptorCache> {
        self.descriptors.clone()
    }

    fn submit(&mut self, mut urb: Urb, sink: &CompletionSink) {
        self.submitted.lock().unwrap().push(urb.id());
        if self.failures > 0 {
            self.failures -= 1;
            urb.status = UrbStatus::Dnr;
            urb.set_len(0);
        } else if self.stall_endpoint == Some(urb.endpoint) {
            urb.status = UrbStatus::Stall;
            urb.set_len(0);
        } else if urb.direction() == Direction::In {
            let n = urb.fill(&self.in_data);
            urb.status = if n < urb.capacity() {
                UrbStatus::DataUnderrun
            } else {
                UrbStatus::Ok
            };
        } else {
            urb.status = UrbStatus::Ok;
        }
        sink.complete(urb);
    }

    fn cancel(&mut self, _id: UrbId, _sink: &CompletionSink) {}

    fn reset(&mut self, _force_real: bool) -> Result<(), BackendError> {
        Ok(())
    }
}

#[derive(Default)]
struct Held {
    urbs: Vec<Urb>,
    sink: Option<CompletionSink>,
}

/// Test-side handle of a [`Deferred`] backend.
#[derive(Clone, Default)]
pub struct DeferredHandle {
    held: Arc<Mutex<Held>>,
}

impl DeferredHandle {
    pub fn held(&self) -> usize {
        self.held.lock().unwrap().urbs.len()
    }

    pub fn held_ids(&self) -> Vec<UrbId> {
        self.held.lock().unwrap().urbs.iter().map(Urb::id).collect()
    }

    /// Completes held URBs, most recently submitted first, so ordering is up to the root hub.
    pub fn complete_all_reversed(&self, status: UrbStatus) {
        let mut held = self.held.lock().unwrap();
        let sink = held.sink.clone().unwrap();
        while let Some(mut urb) = held.urbs.pop() {
            urb.status = status;
            sink.complete(urb);
        }
    }

    /// Completes `id` from another thread after `delay`.
    pub fn complete_later(&self, id: UrbId, delay: Duration) -> thread::JoinHandle<()> {
        let held = Arc::clone(&self.held);
        thread::spawn(move || {
            thread::sleep(delay);
            let mut held = held.lock().unwrap();
            let sink = held.sink.clone().unwrap();
            let pos = held.urbs.iter().position(|u| u.id() == id).unwrap();
            let mut urb = held.urbs.remove(pos);
            urb.status = UrbStatus::Ok;
            sink.complete(urb);
        })
    }
}

/// Holds URBs until the test releases them; hands them back as-is when cancelled.
pub struct Deferred {
    speed: UsbSpeed,
    held: Arc<Mutex<Held>>,
}

impl Deferred {
    pub fn new(speed: UsbSpeed) -> (Box<dyn UsbDeviceBackend>, DeferredHandle) {
        let handle = DeferredHandle::default();
        let backend = Deferred {
            speed,
            held: Arc::clone(&handle.held),
        };
        (Box::new(backend), handle)
    }
}

impl UsbDeviceBackend for Deferred {
    fn name(&self) -> &str {
        "deferred"
    }

    fn speed(&self) -> UsbSpeed {
        self.speed
    }

    fn submit(&mut self, urb: Urb, sink: &CompletionSink) {
        let mut held = self.held.lock().unwrap();
        held.sink.get_or_insert_with(|| sink.clone());
        held.urbs.push(urb);
    }

    fn cancel(&mut self, id: UrbId, sink: &CompletionSink) {
        let mut held = self.held.lock().unwrap();
        if let Some(pos) = held.urbs.iter().position(|u| u.id() == id) {
            let urb = held.urbs.remove(pos);
            sink.complete(urb);
        }
    }

    fn reset(&mut self, _force_real: bool) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Backend whose reset takes `delay` and then fails or succeeds.
pub struct SlowReset {
    pub delay: Duration,
    pub fail: bool,
}

impl UsbDeviceBackend for SlowReset {
    fn speed(&self) -> UsbSpeed {
        UsbSpeed::Full
    }

    fn submit(&mut self, mut urb: Urb, sink: &CompletionSink) {
        urb.status = UrbStatus::Ok;
        sink.complete(urb);
    }

    fn cancel(&mut self, _id: UrbId, _sink: &CompletionSink) {}

    fn reset(&mut self, _force_real: bool) -> Result<(), BackendError> {
        thread::sleep(self.delay);
        if self.fail {
            Err(BackendError::Removed)
        } else {
            Ok(())
        }
    }
}

pub fn hub(ports: u8) -> RootHub<MockHci> {
    init_tracing();
    RootHub::new(RootHubConfig::new("TestHub"), MockHci::new(ports))
}

/// Attaches, powers and resets `backend` so it sits at address 0 in `Default`.
pub fn plug(hub: &mut RootHub<MockHci>, port: u8, backend: Box<dyn UsbDeviceBackend>) {
    hub.attach_device(port, backend).unwrap();
    hub.device_power_on(port).unwrap();
    hub.device_reset_sync(port, false).unwrap();
}

/// Runs a standard request with no data stage on the default pipe of `port`.
pub fn control(hub: &mut RootHub<MockHci>, port: u8, setup: SetupPacket) -> UrbId {
    let mut urb = hub
        .new_urb(&UrbRequest::new(TransferType::Message, Direction::Setup, 8).port(port))
        .unwrap();
    urb.fill(&setup.to_bytes());
    let id = hub.submit_urb(urb, None).unwrap();
    hub.reap_async_urbs(port, Duration::ZERO);
    id
}

pub fn set_address(hub: &mut RootHub<MockHci>, port: u8, address: u8) {
    control(
        hub,
        port,
        SetupPacket {
            bm_request_type: 0x00,
            b_request: aero_vusb::USB_REQUEST_SET_ADDRESS,
            w_value: u16::from(address),
            w_index: 0,
            w_length: 0,
        },
    );
}

pub fn set_configuration(hub: &mut RootHub<MockHci>, port: u8, value: u8) {
    control(
        hub,
        port,
        SetupPacket {
            bm_request_type: 0x00,
            b_request: aero_vusb::USB_REQUEST_SET_CONFIGURATION,
            w_value: u16::from(value),
            w_index: 0,
            w_length: 0,
        },
    );
}

/// A bulk URB routed by port.
pub fn bulk(hub: &mut RootHub<MockHci>, port: u8, endpoint: u8, direction: Direction, len: usize) -> Urb {
    hub.new_urb(&UrbRequest::new(TransferType::Bulk, direction, len).port(port).endpoint(endpoint))
        .unwrap()
}

/// Full speed device with one configuration: a vendor interface with bulk IN 1 and bulk OUT 2.
pub fn vendor_descriptors() -> DescriptorCache {
    let device = [
        18, 0x01, 0x00, 0x02, 0xff, 0x00, 0x00, 64, 0x34, 0x12, 0x78, 0x56, 0x00, 0x01, 0, 0, 0, 1,
    ];
    let config = vec![
        9, 0x02, 32, 0, 1, 1, 0, 0x80, 50, // configuration 1
        9, 0x04, 0, 0, 2, 0xff, 0x00, 0x00, 0, // interface 0
        7, 0x05, 0x81, 0x02, 64, 0, 0, // bulk IN 1
        7, 0x05, 0x02, 0x02, 64, 0, 0, // bulk OUT 2
    ];
    DescriptorCache::new(&device, vec![config]).unwrap()
}
