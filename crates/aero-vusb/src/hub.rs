use std::fmt;
use std::time::{Duration, Instant};

use crate::backend::UsbDeviceBackend;
use crate::config::RootHubConfig;
use crate::connector::{ActivityLed, RootHubConnector, RootHubPort, UsbVersions};
use crate::device::{pipe_index, Device, DeviceState, ResetCompletion, UsbSpeed};
use crate::error::{Result, RootHubError, UrbAllocError};
use crate::frame::FrameScheduler;
use crate::port_table::{PortBitmap, PortTable};
use crate::stats::RootHubStats;
use crate::urb::{Direction, Urb, UrbId, UrbPool, UrbRequest, UrbState, UrbStatus};

/// Backends set aside by [`RootHub::save_prep`] because they cannot be saved.
pub struct SavePrepared {
    detached: Vec<(u8, Box<dyn UsbDeviceBackend>)>,
}

impl SavePrepared {
    pub fn ports(&self) -> impl Iterator<Item = u8> + '_ {
        self.detached.iter().map(|(port, _)| *port)
    }

    pub fn is_empty(&self) -> bool {
        self.detached.is_empty()
    }
}

impl fmt::Debug for SavePrepared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavePrepared")
            .field("ports", &self.ports().collect::<Vec<_>>())
            .finish()
    }
}

/// A virtual USB root hub between one host controller emulation (`P`) and up to 128 device
/// backends.
///
/// All methods are meant to be called from the emulation's primary thread. Completions only
/// become visible through [`RootHub::reap_async_urbs`] and the cancellation calls, each of which
/// reports them through [`RootHubPort::xfer_completion`] before returning.
pub struct RootHub<P: RootHubPort> {
    config: RootHubConfig,
    hci: P,
    pool: UrbPool,
    ports: PortTable,
    exposed: PortBitmap,
    versions: UsbVersions,
    frames: FrameScheduler,
    stats: RootHubStats,
    state: DeviceState,
}

impl<P: RootHubPort> RootHub<P> {
    pub fn new(config: RootHubConfig, hci: P) -> Self {
        let ports = PortTable::new(config.effective_port_count());
        let exposed = hci
            .available_ports()
            .intersect(PortBitmap::first_n(ports.port_count()));
        let versions = hci.usb_versions();
        let frames = FrameScheduler::new(
            config.sorted_backoff(),
            Duration::from_micros(config.min_frame_spacing_us),
        );
        tracing::info!(
            hub = %config.name,
            ports = exposed.len(),
            ?versions,
            "root hub created"
        );
        Self {
            pool: UrbPool::new(config.max_urbs_in_flight),
            config,
            hci,
            ports,
            exposed,
            versions,
            frames,
            stats: RootHubStats::default(),
            state: DeviceState::Attached,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RootHubConfig {
        &self.config
    }

    pub fn hci(&self) -> &P {
        &self.hci
    }

    pub fn hci_mut(&mut self) -> &mut P {
        &mut self.hci
    }

    pub fn stats(&self) -> &RootHubStats {
        &self.stats
    }

    /// The hub's own state: `Attached` while unpowered, `Powered` otherwise.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn port_count(&self) -> u8 {
        self.ports.port_count()
    }

    pub fn device(&self, port: u8) -> Option<&Device> {
        self.ports.get(port)
    }

    pub fn urbs_in_use(&self) -> usize {
        self.pool.in_use()
    }

    /// Ports the controller exposes that hold no live device. Set bit = free.
    pub fn available_ports(&self) -> PortBitmap {
        self.exposed.difference(self.ports.live())
    }

    /// Ports holding a live device.
    pub fn occupied_ports(&self) -> PortBitmap {
        self.ports.live()
    }

    fn cancel_warn(&self) -> Duration {
        Duration::from_millis(self.config.cancel_warn_ms)
    }

    fn device_ref(&self, port: u8) -> Result<&Device> {
        self.ports.check_port(port)?;
        self.ports.get(port).ok_or(RootHubError::PortEmpty(port))
    }

    /// Removes devices that a failed reset detached in place.
    fn sweep_detached(&mut self) {
        for port in self.ports.detached_ports().iter() {
            tracing::info!(hub = %self.config.name, port, "removing device detached by failed reset");
            if let Err(err) = self.remove_device(port) {
                tracing::warn!(hub = %self.config.name, port, %err, "failed to remove detached device");
            }
        }
    }

    /// Detach sequence: tell the controller, cancel what is in flight, drop the device.
    fn remove_device(&mut self, port: u8) -> Result<Device> {
        self.ports.check_port(port)?;
        if self.ports.get(port).is_none() {
            return Err(RootHubError::PortEmpty(port));
        }
        self.hci.detach(port);
        let warn = self.cancel_warn();
        if let Some(dev) = self.ports.get_mut(port) {
            dev.cancel_all(warn);
            deliver(dev, &mut self.hci, &mut self.pool, &mut self.stats);
        }
        let mut dev = self.ports.remove(port)?;
        dev.destroy();
        self.stats.detaches += 1;
        Ok(dev)
    }

    pub fn attach_device(&mut self, port: u8, backend: Box<dyn UsbDeviceBackend>) -> Result<()> {
        self.sweep_detached();
        self.ports.check_port(port)?;
        if !self.exposed.contains(port) {
            return Err(RootHubError::PortNotExposed(port));
        }
        if self.ports.get(port).is_some() {
            return Err(RootHubError::PortOccupied(port));
        }
        let speed = backend.speed();
        if !self.versions.carries(speed) {
            return Err(RootHubError::UnsupportedSpeed(speed));
        }

        let device = Device::new(port, backend);
        let name = device.name().to_string();
        self.ports.insert(port, device)?;
        if let Err(source) = self.hci.attach(port, speed) {
            if let Ok(mut dev) = self.ports.remove(port) {
                dev.destroy();
            }
            tracing::warn!(hub = %self.config.name, port, %source, "host controller refused device");
            return Err(RootHubError::HostController { port, source });
        }
        self.stats.attaches += 1;
        tracing::info!(
            hub = %self.config.name,
            port,
            %speed,
            device = %name,
            "attached device to port {port} ({speed} speed)"
        );
        Ok(())
    }

    /// Attaches to the lowest free port and returns it.
    pub fn attach_device_any(&mut self, backend: Box<dyn UsbDeviceBackend>) -> Result<u8> {
        self.sweep_detached();
        let port = self
            .available_ports()
            .first()
            .ok_or(RootHubError::NoFreePorts)?;
        self.attach_device(port, backend)?;
        Ok(port)
    }

    pub fn detach_device(&mut self, port: u8) -> Result<()> {
        self.sweep_detached();
        let dev = self.remove_device(port)?;
        tracing::info!(hub = %self.config.name, port, device = %dev.name(), "detached device from port {port}");
        Ok(())
    }

    pub fn set_urb_params(&mut self, hci_size: usize, td_size: usize) -> Result<()> {
        self.pool.set_params(hci_size, td_size)
    }

    pub fn new_urb(&mut self, request: &UrbRequest<'_>) -> std::result::Result<Urb, UrbAllocError> {
        self.pool.alloc(request).map_err(|err| {
            tracing::debug!(hub = %self.config.name, %err, "urb allocation failed");
            err
        })
    }

    pub fn free_urb(&mut self, urb: Urb) -> Result<()> {
        if urb.state() != UrbState::Allocated {
            let (id, state) = (urb.id(), urb.state());
            self.pool.discard(urb);
            return Err(RootHubError::UrbNotAllocated { id, state });
        }
        self.pool.recycle(urb);
        Ok(())
    }

    /// Routes `urb` to its device: by the port it was allocated for, or else by its USB address.
    /// Failed submissions free the URB.
    pub fn submit_urb(&mut self, urb: Urb, led: Option<&mut ActivityLed>) -> Result<UrbId> {
        self.sweep_detached();
        if urb.state() != UrbState::Allocated {
            let (id, state) = (urb.id(), urb.state());
            self.pool.discard(urb);
            return Err(RootHubError::UrbNotAllocated { id, state });
        }

        let xfer_type = urb.xfer_type();
        let port = match urb.port() {
            Some(port) => self.ports.check_port(port).map(|()| port),
            None => self
                .ports
                .find_by_address(urb.dst_address)
                .ok_or(RootHubError::AddressNotResolved(urb.dst_address)),
        };
        let dev = match port {
            Ok(port) => self.ports.get_mut(port).ok_or(RootHubError::PortEmpty(port)),
            Err(err) => Err(err),
        };
        let dev = match dev {
            Ok(dev) => dev,
            Err(err) => {
                tracing::warn!(hub = %self.config.name, urb = %urb.description(), %err, "submit failed");
                self.stats.record_rejected(xfer_type);
                self.pool.recycle(urb);
                return Err(err);
            }
        };

        if let Some(led) = led {
            match urb.direction() {
                Direction::In => led.reading = true,
                Direction::Out => led.writing = true,
                Direction::Setup => {}
            }
        }

        let (id, len) = (urb.id(), urb.len());
        match dev.dispatch(urb) {
            Ok(()) => {
                self.stats.record_submit(xfer_type, len);
                tracing::debug!(hub = %self.config.name, %id, "urb submitted");
                Ok(id)
            }
            Err((err, urb)) => {
                tracing::warn!(hub = %self.config.name, urb = %urb.description(), %err, "submit failed");
                self.stats.record_rejected(xfer_type);
                self.pool.recycle(urb);
                Err(err)
            }
        }
    }

    /// Delivers completed URBs of `port`, waiting up to `timeout` while any are still in flight.
    pub fn reap_async_urbs(&mut self, port: u8, timeout: Duration) {
        self.sweep_detached();
        let slice = Duration::from_millis(self.config.reap_slice_ms.max(1));
        let deadline = Instant::now().checked_add(timeout);
        let Some(dev) = self.ports.get_mut(port) else {
            return;
        };
        loop {
            dev.poll_completions();
            deliver(dev, &mut self.hci, &mut self.pool, &mut self.stats);
            if dev.in_flight() == 0 {
                break;
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => slice,
            };
            if remaining.is_zero() {
                break;
            }
            dev.wait_completion(remaining.min(slice));
        }
    }

    pub fn cancel_urbs_on_endpoint(&mut self, urb: UrbId) -> Result<()> {
        let warn = self.cancel_warn();
        let (port, pipe) = self
            .ports
            .devices()
            .find_map(|dev| dev.pipe_of(urb).map(|pipe| (dev.port(), pipe)))
            .ok_or(RootHubError::UnknownUrb(urb))?;
        let dev = self
            .ports
            .get_mut(port)
            .ok_or(RootHubError::PortEmpty(port))?;
        let cancelled = dev.cancel_pipe(pipe, warn);
        deliver(dev, &mut self.hci, &mut self.pool, &mut self.stats);
        tracing::debug!(hub = %self.config.name, port, pipe, cancelled, "cancelled endpoint");
        Ok(())
    }

    pub fn abort_endpoint(&mut self, port: u8, endpoint: u8, direction: Direction) -> Result<()> {
        let warn = self.cancel_warn();
        self.ports.check_port(port)?;
        let dev = self
            .ports
            .get_mut(port)
            .ok_or(RootHubError::PortEmpty(port))?;
        let cancelled = dev.cancel_pipe(pipe_index(endpoint, direction), warn);
        deliver(dev, &mut self.hci, &mut self.pool, &mut self.stats);
        dev.clear_halt(endpoint, direction);
        tracing::debug!(hub = %self.config.name, port, endpoint, ?direction, cancelled, "aborted endpoint");
        Ok(())
    }

    /// Cancels and completes every in-flight URB on every port.
    pub fn cancel_all_urbs(&mut self) {
        let warn = self.cancel_warn();
        for dev in self.ports.devices_mut() {
            dev.cancel_all(warn);
            deliver(dev, &mut self.hci, &mut self.pool, &mut self.stats);
        }
    }

    pub fn clear_endpoint_halt(&mut self, port: u8, endpoint: u8, direction: Direction) -> Result<()> {
        self.ports.check_port(port)?;
        self.ports
            .get_mut(port)
            .ok_or(RootHubError::PortEmpty(port))?
            .clear_halt(endpoint, direction);
        Ok(())
    }

    pub fn power_on(&mut self) -> Result<()> {
        if self.state == DeviceState::Attached {
            self.state = DeviceState::Powered;
            tracing::info!(hub = %self.config.name, "root hub powered on");
        }
        Ok(())
    }

    pub fn power_off(&mut self) -> Result<()> {
        self.cancel_all_urbs();
        for port in self.ports.occupied().iter() {
            self.reap_async_urbs(port, Duration::ZERO);
        }
        if self.state == DeviceState::Powered {
            self.state = DeviceState::Attached;
            tracing::info!(hub = %self.config.name, "root hub powered off");
        }
        Ok(())
    }

    /// Resets the controller's ports and, synchronously, every attached device. Devices already
    /// in an asynchronous reset are left to finish it.
    pub fn reset_hub(&mut self, force_real: bool) -> Result<()> {
        self.sweep_detached();
        self.hci.reset(force_real);
        let mut first_err = None;
        for port in self.ports.occupied().iter() {
            if self.ports.get(port).map(Device::state) == Some(DeviceState::Reset) {
                continue;
            }
            if let Err(err) = self.device_reset_sync(port, force_real) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Cancels the device's URBs and moves it to `Reset`.
    fn prepare_reset(&mut self, port: u8) -> Result<&mut Device> {
        let warn = self.cancel_warn();
        self.ports.check_port(port)?;
        let dev = self
            .ports
            .get_mut(port)
            .ok_or(RootHubError::PortEmpty(port))?;
        if dev.state() == DeviceState::Reset {
            return Err(RootHubError::DeviceResetting(port));
        }
        dev.cancel_all(warn);
        deliver(dev, &mut self.hci, &mut self.pool, &mut self.stats);
        dev.begin_reset()?;
        Ok(dev)
    }

    pub fn device_reset_sync(&mut self, port: u8, force_real: bool) -> Result<()> {
        let timeout = Duration::from_millis(self.config.reset_timeout_ms);
        let outcome = self.prepare_reset(port)?.reset_sync(force_real, timeout);
        match outcome {
            Ok(()) => {
                tracing::debug!(hub = %self.config.name, port, "device reset");
                Ok(())
            }
            Err(source) => {
                tracing::warn!(hub = %self.config.name, port, %source, "device reset failed, detaching");
                if let Err(err) = self.remove_device(port) {
                    tracing::warn!(hub = %self.config.name, port, %err, "failed to remove device after reset");
                }
                Err(RootHubError::ResetFailed { port, source })
            }
        }
    }

    pub fn device_reset_async(
        &mut self,
        port: u8,
        force_real: bool,
        done: ResetCompletion,
    ) -> Result<()> {
        let floor = Duration::from_millis(self.config.effective_reset_floor_ms());
        let timeout = Duration::from_millis(self.config.reset_timeout_ms);
        let started = self
            .prepare_reset(port)?
            .reset_async(force_real, floor, timeout, done);
        if started.is_err() {
            self.sweep_detached();
        }
        started
    }

    pub fn device_power_on(&mut self, port: u8) -> Result<()> {
        self.ports.check_port(port)?;
        self.ports
            .get_mut(port)
            .ok_or(RootHubError::PortEmpty(port))?
            .power_on()
    }

    pub fn device_power_off(&mut self, port: u8) -> Result<()> {
        let warn = self.cancel_warn();
        self.ports.check_port(port)?;
        let dev = self
            .ports
            .get_mut(port)
            .ok_or(RootHubError::PortEmpty(port))?;
        if dev.state() == DeviceState::Reset {
            return Err(RootHubError::DeviceResetting(port));
        }
        dev.cancel_all(warn);
        deliver(dev, &mut self.hci, &mut self.pool, &mut self.stats);
        dev.power_off()
    }

    pub fn device_suspend(&mut self, port: u8) -> Result<()> {
        self.ports.check_port(port)?;
        self.ports
            .get_mut(port)
            .ok_or(RootHubError::PortEmpty(port))?
            .suspend()
    }

    pub fn device_resume(&mut self, port: u8) -> Result<()> {
        self.ports.check_port(port)?;
        self.ports
            .get_mut(port)
            .ok_or(RootHubError::PortEmpty(port))?
            .resume()
    }

    pub fn device_state(&self, port: u8) -> Result<DeviceState> {
        self.device_ref(port).map(Device::state)
    }

    pub fn device_is_saved_state_supported(&self, port: u8) -> Result<bool> {
        self.device_ref(port).map(Device::supports_saved_state)
    }

    pub fn device_speed(&self, port: u8) -> Result<UsbSpeed> {
        self.device_ref(port).map(Device::speed)
    }

    pub fn device_address(&self, port: u8) -> Result<Option<u8>> {
        self.device_ref(port).map(Device::address)
    }

    pub fn set_periodic_frame_processing(&mut self, hz: u32) {
        tracing::info!(hub = %self.config.name, rate_hz = hz, "periodic frame processing");
        if let Some(rate) = self.frames.set_rate(hz) {
            self.hci.frame_rate_changed(rate);
        }
    }

    /// The rate frames currently run at, after idle back-off.
    pub fn periodic_frame_rate(&self) -> u32 {
        self.frames.current_rate()
    }

    /// The rate last set through [`RootHub::set_periodic_frame_processing`].
    pub fn requested_frame_rate(&self) -> u32 {
        self.frames.rate()
    }

    /// Runs one frame at `now_ns` (monotonic nanoseconds) and returns how long to wait for the
    /// next one, or `None` while frame processing is disabled.
    pub fn process_frame(&mut self, now_ns: u64) -> Option<Duration> {
        let hci = &mut self.hci;
        let tick = self.frames.tick(now_ns, |frame| hci.start_frame(frame))?;
        if tick.ran {
            self.stats.frames += 1;
        }
        if let Some(rate) = tick.rate_changed {
            self.hci.frame_rate_changed(rate);
        }
        Some(tick.next_in)
    }

    /// Frames between this and the previous isochronous transfer on the same pipe, modulo
    /// `2^bits`. 0 for the first transfer or an empty port.
    pub fn update_isoc_frame_delta(
        &mut self,
        port: u8,
        endpoint: u8,
        direction: Direction,
        frame: u32,
        bits: u8,
    ) -> u32 {
        self.ports
            .get_mut(port)
            .map_or(0, |dev| dev.isoc_frame_delta(endpoint, direction, frame, bits))
    }

    /// Quiesces the hub for a saved state: nothing stays in flight, and devices that cannot be
    /// saved are detached. Hand the result to [`RootHub::save_done`] afterwards.
    pub fn save_prep(&mut self) -> SavePrepared {
        self.sweep_detached();
        self.cancel_all_urbs();
        let unsaveable: Vec<u8> = self
            .ports
            .devices()
            .filter(|dev| !dev.supports_saved_state())
            .map(Device::port)
            .collect();

        let mut detached = Vec::new();
        for port in unsaveable {
            match self.remove_device(port) {
                Ok(dev) => match dev.into_backend() {
                    Some(backend) => {
                        tracing::info!(hub = %self.config.name, port, "detached device for saved state");
                        detached.push((port, backend));
                    }
                    None => tracing::warn!(
                        hub = %self.config.name,
                        port,
                        "device still resetting, dropped instead of detached"
                    ),
                },
                Err(err) => tracing::warn!(hub = %self.config.name, port, %err, "force detach failed"),
            }
        }
        SavePrepared { detached }
    }

    /// Reattaches the devices [`RootHub::save_prep`] set aside, each on the port it came from.
    pub fn save_done(&mut self, prepared: SavePrepared) {
        for (port, backend) in prepared.detached {
            if let Err(err) = self.attach_device(port, backend) {
                tracing::warn!(hub = %self.config.name, port, %err, "reattach after save failed");
            }
        }
    }
}

/// Hands every deliverable completion of `dev` to the controller, in per-pipe submission order.
fn deliver<P: RootHubPort>(
    dev: &mut Device,
    hci: &mut P,
    pool: &mut UrbPool,
    stats: &mut RootHubStats,
) {
    while let Some((mut urb, cancelled)) = dev.next_ready() {
        let id = urb.id();
        if cancelled {
            urb.status = UrbStatus::Crc;
            urb.set_state(UrbState::Cancelled);
            dev.retire(id);
            stats.record_cancelled(urb.xfer_type());
            tracing::debug!(urb = %urb.description(), "urb cancelled");
            hci.xfer_completion(&urb);
            pool.recycle(urb);
            continue;
        }

        if !urb.status.is_ok_for(urb.short_ok) {
            if hci.xfer_error(&urb) {
                stats.record_retry(urb.xfer_type());
                tracing::debug!(urb = %urb.description(), status = ?urb.status, "retrying urb");
                match dev.redispatch(urb) {
                    Ok(()) => continue,
                    Err(returned) => {
                        urb = returned;
                        urb.status = UrbStatus::Dnr;
                    }
                }
            }
            if urb.status == UrbStatus::Stall && urb.endpoint != 0 {
                dev.set_halted(urb.endpoint, urb.direction());
            }
        } else if urb.endpoint == 0 && urb.is_control_pipe() {
            if let Some(setup) = urb.setup_packet() {
                dev.observe_control(setup);
            }
        }

        urb.set_state(UrbState::Reaped);
        dev.retire(id);
        stats.record_reaped(&urb);
        tracing::debug!(urb = %urb.description(), status = ?urb.status, len = urb.len(), "urb reaped");
        hci.xfer_completion(&urb);
        pool.recycle(urb);
    }
}

impl<P: RootHubPort> RootHubConnector for RootHub<P> {
    fn set_urb_params(&mut self, hci_size: usize, td_size: usize) -> Result<()> {
        RootHub::set_urb_params(self, hci_size, td_size)
    }

    fn reset(&mut self, force_real: bool) -> Result<()> {
        self.reset_hub(force_real)
    }

    fn power_on(&mut self) -> Result<()> {
        RootHub::power_on(self)
    }

    fn power_off(&mut self) -> Result<()> {
        RootHub::power_off(self)
    }

    fn new_urb(&mut self, request: &UrbRequest<'_>) -> std::result::Result<Urb, UrbAllocError> {
        RootHub::new_urb(self, request)
    }

    fn free_urb(&mut self, urb: Urb) -> Result<()> {
        RootHub::free_urb(self, urb)
    }

    fn submit_urb(&mut self, urb: Urb, led: Option<&mut ActivityLed>) -> Result<UrbId> {
        RootHub::submit_urb(self, urb, led)
    }

    fn reap_async_urbs(&mut self, port: u8, timeout: Duration) {
        RootHub::reap_async_urbs(self, port, timeout)
    }

    fn cancel_urbs_on_endpoint(&mut self, urb: UrbId) -> Result<()> {
        RootHub::cancel_urbs_on_endpoint(self, urb)
    }

    fn cancel_all_urbs(&mut self) {
        RootHub::cancel_all_urbs(self)
    }

    fn abort_endpoint(&mut self, port: u8, endpoint: u8, direction: Direction) -> Result<()> {
        RootHub::abort_endpoint(self, port, endpoint, direction)
    }

    fn attach_device(&mut self, port: u8, backend: Box<dyn UsbDeviceBackend>) -> Result<()> {
        RootHub::attach_device(self, port, backend)
    }

    fn detach_device(&mut self, port: u8) -> Result<()> {
        RootHub::detach_device(self, port)
    }

    fn set_periodic_frame_processing(&mut self, hz: u32) {
        RootHub::set_periodic_frame_processing(self, hz)
    }

    fn periodic_frame_rate(&self) -> u32 {
        RootHub::periodic_frame_rate(self)
    }

    fn update_isoc_frame_delta(
        &mut self,
        port: u8,
        endpoint: u8,
        direction: Direction,
        frame: u32,
        bits: u8,
    ) -> u32 {
        RootHub::update_isoc_frame_delta(self, port, endpoint, direction, frame, bits)
    }

    fn device_reset_sync(&mut self, port: u8, force_real: bool) -> Result<()> {
        RootHub::device_reset_sync(self, port, force_real)
    }

    fn device_reset_async(
        &mut self,
        port: u8,
        force_real: bool,
        done: ResetCompletion,
    ) -> Result<()> {
        RootHub::device_reset_async(self, port, force_real, done)
    }

    fn device_power_on(&mut self, port: u8) -> Result<()> {
        RootHub::device_power_on(self, port)
    }

    fn device_power_off(&mut self, port: u8) -> Result<()> {
        RootHub::device_power_off(self, port)
    }

    fn device_state(&self, port: u8) -> Result<DeviceState> {
        RootHub::device_state(self, port)
    }

    fn device_is_saved_state_supported(&self, port: u8) -> Result<bool> {
        RootHub::device_is_saved_state_supported(self, port)
    }

    fn device_speed(&self, port: u8) -> Result<UsbSpeed> {
        RootHub::device_speed(self, port)
    }
}
