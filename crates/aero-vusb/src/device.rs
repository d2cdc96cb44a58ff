//! A device attached to a root hub port.
//!
//! The [`Device`] owns everything the primary thread needs to route transfers to one backend:
//! the completion channel, the in-flight queue (kept in submission order so completions can be
//! released FIFO per pipe), halted pipes, isochronous frame history and the pipes exposed by the
//! active configuration. Only the state cell and the backend itself are shared, with reset
//! workers.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backend::{CompletionSink, UsbDeviceBackend};
use crate::descriptor::DescriptorCache;
use crate::error::{ResetError, Result, RootHubError};
use crate::frame;
use crate::urb::{Direction, SetupPacket, Urb, UrbId, UrbState, UrbStatus};

pub const USB_REQUEST_CLEAR_FEATURE: u8 = 0x01;
pub const USB_REQUEST_SET_ADDRESS: u8 = 0x05;
pub const USB_REQUEST_SET_CONFIGURATION: u8 = 0x09;
pub const USB_REQUEST_SET_INTERFACE: u8 = 0x0b;

pub const USB_FEATURE_ENDPOINT_HALT: u16 = 0;

const REQUEST_TYPE_DEVICE_OUT: u8 = 0x00;
const REQUEST_TYPE_INTERFACE_OUT: u8 = 0x01;
const REQUEST_TYPE_ENDPOINT_OUT: u8 = 0x02;

/// Address reported before the first reset assigns the default address.
const INVALID_ADDRESS: u8 = 0xff;

/// One pipe per endpoint number and direction; endpoint 0 is a single bidirectional pipe.
const PIPE_COUNT: usize = 32;

/// Device states, in enumeration order.
///
/// The order is meaningful for `Invalid..=Suspended`: `Default < Address < Configured`, so
/// comparisons like "at least addressed" can be written with `>=`. `Reset` and `Destroyed` sit
/// outside that progression.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    Invalid = 0,
    Detached = 1,
    Attached = 2,
    Powered = 3,
    Default = 4,
    Address = 5,
    Configured = 6,
    Suspended = 7,
    Reset = 8,
    Destroyed = 9,
}

impl DeviceState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => DeviceState::Detached,
            2 => DeviceState::Attached,
            3 => DeviceState::Powered,
            4 => DeviceState::Default,
            5 => DeviceState::Address,
            6 => DeviceState::Configured,
            7 => DeviceState::Suspended,
            8 => DeviceState::Reset,
            9 => DeviceState::Destroyed,
            _ => DeviceState::Invalid,
        }
    }

    /// Whether a device in this state still occupies its port.
    pub fn is_live(self) -> bool {
        !matches!(
            self,
            DeviceState::Invalid | DeviceState::Detached | DeviceState::Destroyed
        )
    }

    /// States in which a device answers transfers.
    pub fn accepts_transfers(self) -> bool {
        matches!(
            self,
            DeviceState::Default | DeviceState::Address | DeviceState::Configured
        )
    }

    pub fn can_transition_to(self, next: DeviceState) -> bool {
        use DeviceState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Reset, Default | Detached) => true,
            (Reset, _) => false,
            (from, Reset) => from >= Attached,
            (Invalid | Detached, Attached) => true,
            (Attached, Powered) | (Powered, Attached) => true,
            (Default, Address) | (Address, Default) => true,
            (Address, Configured) | (Configured, Address) => true,
            (Default | Address | Configured, Suspended) => true,
            (Suspended, Default | Address | Configured) => true,
            (from, Detached) => from.is_live(),
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsbSpeed {
    Unknown,
    Low,
    Full,
    High,
    /// Wireless USB.
    Variable,
    Super,
    SuperPlus,
}

impl UsbSpeed {
    pub fn is_superspeed(self) -> bool {
        matches!(self, UsbSpeed::Super | UsbSpeed::SuperPlus)
    }
}

impl fmt::Display for UsbSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UsbSpeed::Unknown => "Unknown",
            UsbSpeed::Low => "Low",
            UsbSpeed::Full => "Full",
            UsbSpeed::High => "High",
            UsbSpeed::Variable => "Variable",
            UsbSpeed::Super => "Super",
            UsbSpeed::SuperPlus => "SuperPlus",
        })
    }
}

pub(crate) type SharedBackend = Arc<Mutex<Box<dyn UsbDeviceBackend>>>;

/// Backend state stays usable after a panic elsewhere; cancellation must still go through.
pub(crate) fn lock_backend(backend: &SharedBackend) -> MutexGuard<'_, Box<dyn UsbDeviceBackend>> {
    backend.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Device state shared with reset workers.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: AtomicU8,
    address: AtomicU8,
    configuration: AtomicU8,
}

impl StateCell {
    fn new(state: DeviceState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            address: AtomicU8::new(INVALID_ADDRESS),
            configuration: AtomicU8::new(0),
        }
    }

    pub(crate) fn load(&self) -> DeviceState {
        DeviceState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Moves `from -> to` if the state is still `from`; returns the actual state otherwise.
    fn transition(&self, from: DeviceState, to: DeviceState) -> std::result::Result<(), DeviceState> {
        debug_assert!(from.can_transition_to(to), "{from:?} -> {to:?}");
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(DeviceState::from_raw)
    }

    fn destroy(&self) {
        self.state
            .store(DeviceState::Destroyed as u8, Ordering::Release);
    }

    fn address(&self) -> u8 {
        self.address.load(Ordering::Acquire)
    }

    fn set_address(&self, address: u8) {
        self.address.store(address, Ordering::Release);
    }

    fn configuration(&self) -> u8 {
        self.configuration.load(Ordering::Acquire)
    }

    fn set_configuration(&self, value: u8) {
        self.configuration.store(value, Ordering::Release);
    }
}

/// Invoked on the reset worker with the port and the outcome of an asynchronous reset.
pub type ResetCompletion =
    Box<dyn FnOnce(u8, std::result::Result<(), ResetError>) + Send + 'static>;

pub(crate) fn pipe_index(endpoint: u8, direction: Direction) -> usize {
    let ep = (endpoint & 0x0f) as usize;
    if ep != 0 && direction == Direction::In {
        ep + 16
    } else {
        ep
    }
}

#[derive(Debug)]
struct InFlight {
    id: UrbId,
    pipe: usize,
    requested_len: usize,
    cancelled: bool,
}

pub struct Device {
    port: u8,
    name: String,
    speed: UsbSpeed,
    saved_state_supported: bool,
    powered: bool,
    cell: Arc<StateCell>,
    backend: SharedBackend,
    sink: CompletionSink,
    completions: Receiver<Urb>,
    in_flight: VecDeque<InFlight>,
    finished: HashMap<UrbId, Urb>,
    halted: u32,
    isoc_frames: [Option<u32>; PIPE_COUNT],
    descriptors: Option<DescriptorCache>,
    /// Pipes of the active configuration; `None` when the descriptors are unknown.
    active_pipes: Option<u32>,
    alt_settings: HashMap<u8, u8>,
    suspended_from: Option<DeviceState>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("port", &self.port)
            .field("name", &self.name)
            .field("speed", &self.speed)
            .field("state", &self.state())
            .field("powered", &self.powered)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl Device {
    pub(crate) fn new(port: u8, backend: Box<dyn UsbDeviceBackend>) -> Self {
        let (sink, completions) = CompletionSink::channel();
        let descriptors = backend.descriptors();
        Self {
            port,
            name: backend.name().to_string(),
            speed: backend.speed(),
            saved_state_supported: backend.supports_saved_state(),
            powered: false,
            cell: Arc::new(StateCell::new(DeviceState::Attached)),
            backend: Arc::new(Mutex::new(backend)),
            sink,
            completions,
            in_flight: VecDeque::new(),
            finished: HashMap::new(),
            halted: 0,
            isoc_frames: [None; PIPE_COUNT],
            active_pipes: descriptors.as_ref().map(|_| 1),
            descriptors,
            alt_settings: HashMap::new(),
            suspended_from: None,
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn speed(&self) -> UsbSpeed {
        self.speed
    }

    pub fn state(&self) -> DeviceState {
        self.cell.load()
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Current USB address; `None` until the first reset.
    pub fn address(&self) -> Option<u8> {
        match self.cell.address() {
            INVALID_ADDRESS => None,
            addr => Some(addr),
        }
    }

    /// `bConfigurationValue` of the active configuration, 0 when unconfigured.
    pub fn configuration(&self) -> u8 {
        self.cell.configuration()
    }

    pub fn supports_saved_state(&self) -> bool {
        self.saved_state_supported
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_halted(&self, endpoint: u8, direction: Direction) -> bool {
        self.halted & (1 << pipe_index(endpoint, direction)) != 0
    }

    fn reject_if_resetting(&self, state: DeviceState) -> Result<()> {
        if state == DeviceState::Reset {
            return Err(RootHubError::DeviceResetting(self.port));
        }
        Ok(())
    }

    fn not_ready(&self, state: DeviceState) -> RootHubError {
        RootHubError::DeviceNotReady {
            port: self.port,
            state,
        }
    }

    fn move_state(&self, from: DeviceState, to: DeviceState) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(RootHubError::InvalidStateTransition { from, to });
        }
        self.cell
            .transition(from, to)
            .map_err(|actual| RootHubError::InvalidStateTransition { from: actual, to })
    }

    pub(crate) fn power_on(&mut self) -> Result<()> {
        let state = self.state();
        self.reject_if_resetting(state)?;
        if !state.is_live() {
            return Err(self.not_ready(state));
        }
        if !self.powered {
            self.powered = true;
            lock_backend(&self.backend).power_on();
        }
        if state == DeviceState::Attached {
            self.move_state(state, DeviceState::Powered)?;
        }
        Ok(())
    }

    /// Callers cancel the device's URBs first.
    pub(crate) fn power_off(&mut self) -> Result<()> {
        let state = self.state();
        self.reject_if_resetting(state)?;
        if !state.is_live() {
            return Err(self.not_ready(state));
        }
        debug_assert!(self.in_flight.is_empty());
        if self.powered {
            self.powered = false;
            lock_backend(&self.backend).power_off();
        }
        if state == DeviceState::Powered {
            self.move_state(state, DeviceState::Attached)?;
        }
        Ok(())
    }

    pub(crate) fn suspend(&mut self) -> Result<()> {
        let state = self.state();
        self.reject_if_resetting(state)?;
        if !state.accepts_transfers() {
            return Err(self.not_ready(state));
        }
        self.move_state(state, DeviceState::Suspended)?;
        self.suspended_from = Some(state);
        Ok(())
    }

    pub(crate) fn resume(&mut self) -> Result<()> {
        let state = self.state();
        self.reject_if_resetting(state)?;
        if state != DeviceState::Suspended {
            return Err(self.not_ready(state));
        }
        let target = self.suspended_from.take().unwrap_or(DeviceState::Default);
        self.move_state(state, target)
    }

    pub(crate) fn set_address(&mut self, address: u8) -> Result<()> {
        let state = self.state();
        self.reject_if_resetting(state)?;
        if !matches!(state, DeviceState::Default | DeviceState::Address) {
            return Err(self.not_ready(state));
        }
        let next = if address == 0 {
            DeviceState::Default
        } else {
            DeviceState::Address
        };
        if next != state {
            self.move_state(state, next)?;
        }
        self.cell.set_address(address);
        tracing::debug!(port = self.port, address, "device address set");
        Ok(())
    }

    pub(crate) fn set_configuration(&mut self, value: u8) -> Result<()> {
        let state = self.state();
        self.reject_if_resetting(state)?;
        if !matches!(state, DeviceState::Address | DeviceState::Configured) {
            return Err(self.not_ready(state));
        }
        let next = if value == 0 {
            DeviceState::Address
        } else {
            DeviceState::Configured
        };
        if next != state {
            self.move_state(state, next)?;
        }
        self.cell.set_configuration(value);
        self.alt_settings.clear();
        self.active_pipes = self.compute_pipes();
        tracing::debug!(port = self.port, value, "device configuration set");
        Ok(())
    }

    pub(crate) fn set_interface(&mut self, interface: u8, alternate: u8) -> Result<()> {
        let state = self.state();
        self.reject_if_resetting(state)?;
        if state != DeviceState::Configured {
            return Err(self.not_ready(state));
        }
        self.alt_settings.insert(interface, alternate);
        self.active_pipes = self.compute_pipes();
        Ok(())
    }

    fn compute_pipes(&self) -> Option<u32> {
        let cache = self.descriptors.as_ref()?;
        let value = self.configuration();
        if value == 0 {
            return Some(1);
        }
        let Some(config) = cache.configuration(value) else {
            tracing::warn!(
                port = self.port,
                value,
                "device selected a configuration it does not describe"
            );
            return None;
        };
        if self.speed.is_superspeed() {
            if let Err(err) = config.require_superspeed_companions() {
                tracing::warn!(port = self.port, %err, "incomplete SuperSpeed descriptors");
            }
        }

        let mut pipes = 1u32;
        for iface in &config.interfaces {
            let wanted = self.alt_settings.get(&iface.number).copied().unwrap_or(0);
            let Some(alt) = iface
                .alternates
                .iter()
                .find(|a| a.header.b_alternate_setting == wanted)
            else {
                continue;
            };
            for ep in &alt.endpoints {
                let direction = if ep.header.is_in() {
                    Direction::In
                } else {
                    Direction::Out
                };
                pipes |= 1 << pipe_index(ep.header.number(), direction);
            }
        }
        Some(pipes)
    }

    fn unconfigure(&mut self) {
        self.alt_settings.clear();
        self.active_pipes = self.descriptors.as_ref().map(|_| 1);
    }

    /// Follows standard requests that completed successfully on the default pipe.
    pub(crate) fn observe_control(&mut self, setup: SetupPacket) {
        let outcome = match (setup.bm_request_type, setup.b_request) {
            (REQUEST_TYPE_DEVICE_OUT, USB_REQUEST_SET_ADDRESS) => {
                self.set_address((setup.w_value & 0x7f) as u8)
            }
            (REQUEST_TYPE_DEVICE_OUT, USB_REQUEST_SET_CONFIGURATION) => {
                self.set_configuration(setup.w_value as u8)
            }
            (REQUEST_TYPE_INTERFACE_OUT, USB_REQUEST_SET_INTERFACE) => {
                self.set_interface(setup.w_index as u8, setup.w_value as u8)
            }
            (REQUEST_TYPE_ENDPOINT_OUT, USB_REQUEST_CLEAR_FEATURE)
                if setup.w_value == USB_FEATURE_ENDPOINT_HALT =>
            {
                let ep = setup.w_index as u8;
                let direction = if ep & 0x80 != 0 {
                    Direction::In
                } else {
                    Direction::Out
                };
                self.clear_halt(ep & 0x0f, direction);
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(err) = outcome {
            tracing::warn!(port = self.port, %err, request = setup.b_request, "ignoring standard request");
        }
    }

    pub(crate) fn set_halted(&mut self, endpoint: u8, direction: Direction) {
        self.halted |= 1 << pipe_index(endpoint, direction);
    }

    pub(crate) fn clear_halt(&mut self, endpoint: u8, direction: Direction) {
        self.halted &= !(1 << pipe_index(endpoint, direction));
    }

    pub(crate) fn isoc_frame_delta(
        &mut self,
        endpoint: u8,
        direction: Direction,
        new_frame: u32,
        bits: u8,
    ) -> u32 {
        let slot = &mut self.isoc_frames[pipe_index(endpoint, direction)];
        let delta = frame::isoc_frame_delta(*slot, new_frame, bits);
        *slot = Some(new_frame);
        delta
    }

    fn check_submit(&self, urb: &Urb) -> Result<()> {
        let state = self.state();
        self.reject_if_resetting(state)?;
        if !self.powered {
            return Err(RootHubError::DeviceNotPowered(self.port));
        }
        if !state.accepts_transfers() {
            return Err(self.not_ready(state));
        }
        let bit = 1 << pipe_index(urb.endpoint, urb.direction());
        if self.halted & bit != 0 {
            return Err(RootHubError::EndpointHalted {
                endpoint: urb.endpoint,
            });
        }
        if self.active_pipes.is_some_and(|pipes| pipes & bit == 0) {
            return Err(RootHubError::EndpointNotConfigured {
                endpoint: urb.endpoint,
            });
        }
        Ok(())
    }

    /// Hands `urb` to the backend. On refusal the URB comes back so the caller can recycle it.
    pub(crate) fn dispatch(&mut self, mut urb: Urb) -> std::result::Result<(), (RootHubError, Urb)> {
        if let Err(err) = self.check_submit(&urb) {
            return Err((err, urb));
        }
        let mut backend = lock_backend(&self.backend);
        if let Err(err) = backend.accepts(&urb) {
            return Err((err.into(), urb));
        }
        self.in_flight.push_back(InFlight {
            id: urb.id(),
            pipe: pipe_index(urb.endpoint, urb.direction()),
            requested_len: urb.len(),
            cancelled: false,
        });
        urb.set_state(UrbState::InFlight);
        backend.submit(urb, &self.sink);
        Ok(())
    }

    /// Sends a failed URB back to the backend without giving up its place in the pipe queue.
    pub(crate) fn redispatch(&mut self, mut urb: Urb) -> std::result::Result<(), Urb> {
        let Some(entry) = self.in_flight.iter().find(|e| e.id == urb.id()) else {
            return Err(urb);
        };
        urb.set_len(entry.requested_len);
        urb.status = UrbStatus::Ok;
        let mut backend = lock_backend(&self.backend);
        if backend.accepts(&urb).is_err() {
            return Err(urb);
        }
        backend.submit(urb, &self.sink);
        Ok(())
    }

    fn accept_completion(&mut self, urb: Urb) {
        if self.in_flight.iter().any(|e| e.id == urb.id()) {
            self.finished.insert(urb.id(), urb);
        } else {
            tracing::warn!(port = self.port, urb = %urb.description(), "dropping completion for a URB not in flight");
        }
    }

    /// Drains the completion channel without blocking.
    pub(crate) fn poll_completions(&mut self) {
        while let Ok(urb) = self.completions.try_recv() {
            self.accept_completion(urb);
        }
    }

    /// Blocks up to `timeout` for one completion. Returns whether one arrived.
    pub(crate) fn wait_completion(&mut self, timeout: Duration) -> bool {
        match self.completions.recv_timeout(timeout) {
            Ok(urb) => {
                self.accept_completion(urb);
                true
            }
            Err(_) => false,
        }
    }

    /// The next completed URB that is also first in line on its pipe, and whether it was
    /// cancelled. Its queue slot stays taken until [`Device::retire`].
    pub(crate) fn next_ready(&mut self) -> Option<(Urb, bool)> {
        let mut blocked = 0u32;
        for entry in &self.in_flight {
            let bit = 1u32 << entry.pipe;
            if blocked & bit != 0 {
                continue;
            }
            if let Some(urb) = self.finished.remove(&entry.id) {
                return Some((urb, entry.cancelled));
            }
            blocked |= bit;
        }
        None
    }

    pub(crate) fn retire(&mut self, id: UrbId) {
        if let Some(pos) = self.in_flight.iter().position(|e| e.id == id) {
            self.in_flight.remove(pos);
        }
    }

    pub(crate) fn pipe_of(&self, id: UrbId) -> Option<usize> {
        self.in_flight.iter().find(|e| e.id == id).map(|e| e.pipe)
    }

    /// Cancels every in-flight URB whose pipe matches `pred` and blocks until the backend has
    /// returned all of them. Returns how many were cancelled.
    pub(crate) fn cancel_where(
        &mut self,
        mut pred: impl FnMut(usize) -> bool,
        warn_after: Duration,
    ) -> usize {
        let ids: Vec<UrbId> = self
            .in_flight
            .iter_mut()
            .filter(|e| !e.cancelled && pred(e.pipe))
            .map(|e| {
                e.cancelled = true;
                e.id
            })
            .collect();
        if ids.is_empty() {
            return 0;
        }

        self.poll_completions();
        {
            let mut backend = lock_backend(&self.backend);
            for id in ids.iter().filter(|id| !self.finished.contains_key(*id)) {
                backend.cancel(*id, &self.sink);
            }
        }

        let slice = warn_after.max(Duration::from_millis(1));
        let started = Instant::now();
        loop {
            self.poll_completions();
            let pending = ids
                .iter()
                .filter(|id| !self.finished.contains_key(*id))
                .count();
            if pending == 0 {
                break;
            }
            if !self.wait_completion(slice) {
                tracing::warn!(
                    port = self.port,
                    pending,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "backend slow to return cancelled URBs"
                );
            }
        }
        ids.len()
    }

    pub(crate) fn cancel_pipe(&mut self, pipe: usize, warn_after: Duration) -> usize {
        self.cancel_where(|p| p == pipe, warn_after)
    }

    pub(crate) fn cancel_all(&mut self, warn_after: Duration) -> usize {
        self.cancel_where(|_| true, warn_after)
    }

    /// Enters `Reset`. Callers cancel the device's URBs first.
    pub(crate) fn begin_reset(&mut self) -> Result<()> {
        let state = self.state();
        self.reject_if_resetting(state)?;
        if !state.can_transition_to(DeviceState::Reset) {
            return Err(self.not_ready(state));
        }
        debug_assert!(self.in_flight.is_empty());
        self.move_state(state, DeviceState::Reset)?;
        self.halted = 0;
        self.isoc_frames = [None; PIPE_COUNT];
        self.suspended_from = None;
        self.unconfigure();
        Ok(())
    }

    /// Resets without a minimum duration, blocking the caller for at most `timeout`.
    pub(crate) fn reset_sync(
        &mut self,
        force_real: bool,
        timeout: Duration,
    ) -> std::result::Result<(), ResetError> {
        let outcome = reset_bounded(&self.backend, self.port, force_real, timeout);
        finish_reset(&self.cell, outcome)
    }

    /// Resets on a dedicated worker thread that takes at least `floor` before reporting to
    /// `done`.
    pub(crate) fn reset_async(
        &mut self,
        force_real: bool,
        floor: Duration,
        timeout: Duration,
        done: ResetCompletion,
    ) -> Result<()> {
        let cell = Arc::clone(&self.cell);
        let backend = Arc::clone(&self.backend);
        let port = self.port;
        let spawned = thread::Builder::new()
            .name(format!("vusb-reset-{port}"))
            .spawn(move || {
                let started = Instant::now();
                let outcome = reset_bounded(&backend, port, force_real, timeout);
                if let Some(rest) = floor.checked_sub(started.elapsed()) {
                    thread::sleep(rest);
                }
                let outcome = finish_reset(&cell, outcome);
                done(port, outcome);
            });
        match spawned {
            Ok(_) => Ok(()),
            Err(err) => {
                let _ = self.cell.transition(DeviceState::Reset, DeviceState::Detached);
                Err(RootHubError::ResetWorker(err))
            }
        }
    }

    pub(crate) fn destroy(&mut self) {
        self.cell.destroy();
    }

    /// Recovers the backend, unless a reset worker still holds it.
    pub(crate) fn into_backend(self) -> Option<Box<dyn UsbDeviceBackend>> {
        Arc::try_unwrap(self.backend)
            .ok()
            .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Runs the backend reset on a thread of its own and waits at most `timeout` for it. A backend
/// that overruns is abandoned: its result is dropped whenever it does return.
fn reset_bounded(
    backend: &SharedBackend,
    port: u8,
    force_real: bool,
    timeout: Duration,
) -> std::result::Result<(), ResetError> {
    let started = Instant::now();
    let (tx, rx) = mpsc::sync_channel(1);
    let backend = Arc::clone(backend);
    thread::Builder::new()
        .name(format!("vusb-reset-backend-{port}"))
        .spawn(move || {
            let outcome = lock_backend(&backend).reset(force_real);
            let _ = tx.send(outcome);
        })
        .map_err(|err| ResetError::Thread(err.to_string()))?;

    match rx.recv_timeout(timeout) {
        Ok(outcome) => {
            outcome?;
            check_elapsed(started, timeout)
        }
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                port,
                limit_ms = timeout.as_millis() as u64,
                "backend did not finish resetting in time, abandoning it"
            );
            Err(timed_out(started, timeout))
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(ResetError::Thread("backend reset panicked".to_string()))
        }
    }
}

fn timed_out(started: Instant, limit: Duration) -> ResetError {
    ResetError::TimedOut {
        elapsed_ms: started.elapsed().as_millis() as u64,
        limit_ms: limit.as_millis() as u64,
    }
}

fn check_elapsed(started: Instant, limit: Duration) -> std::result::Result<(), ResetError> {
    if started.elapsed() > limit {
        return Err(timed_out(started, limit));
    }
    Ok(())
}

fn finish_reset(
    cell: &StateCell,
    outcome: std::result::Result<(), ResetError>,
) -> std::result::Result<(), ResetError> {
    let next = if outcome.is_ok() {
        cell.set_address(0);
        cell.set_configuration(0);
        DeviceState::Default
    } else {
        DeviceState::Detached
    };
    match cell.transition(DeviceState::Reset, next) {
        Ok(()) => outcome,
        Err(_) => Err(ResetError::Aborted),
    }
}
