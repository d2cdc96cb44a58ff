use std::sync::mpsc;

use crate::descriptor::DescriptorCache;
use crate::device::UsbSpeed;
use crate::error::BackendError;
use crate::urb::{Urb, UrbId};

/// Hands completed URBs back to the root hub.
///
/// Backends may complete URBs from any thread, immediately inside [`UsbDeviceBackend::submit`]
/// or long after it returned. Completions are picked up by the root hub's reap path.
#[derive(Clone, Debug)]
pub struct CompletionSink {
    tx: mpsc::Sender<Urb>,
}

impl CompletionSink {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<Urb>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Returns `urb` to the root hub. The URB's `status`, length and isochronous packet records
    /// must already describe the outcome.
    pub fn complete(&self, urb: Urb) {
        if let Err(mpsc::SendError(urb)) = self.tx.send(urb) {
            // Device already torn down; nobody is waiting for this URB anymore.
            tracing::debug!(urb = %urb.description(), "dropping completion for detached device");
        }
    }
}

/// A device implementation sitting behind a root hub port: an emulated device or a proxy to a
/// physical one.
///
/// All methods are called with the root hub's per-device lock held, so implementations never see
/// concurrent calls. `reset` may run on a worker thread.
pub trait UsbDeviceBackend: Send {
    /// Shown in logs.
    fn name(&self) -> &str {
        "usb-device"
    }

    fn speed(&self) -> UsbSpeed;

    /// Devices that cannot persist their state are detached for the duration of a save.
    fn supports_saved_state(&self) -> bool {
        true
    }

    /// Raw descriptors, if the device knows them up front. Lets the root hub track which
    /// endpoints the active configuration exposes.
    fn descriptors(&self) -> Option<DescriptorCache> {
        None
    }

    /// Last chance to refuse a transfer synchronously. Once this returns `Ok`, every failure has to
    /// be reported through the URB's completion status.
    fn accepts(&self, urb: &Urb) -> Result<(), BackendError> {
        let _ = urb;
        Ok(())
    }

    /// Takes ownership of `urb`. It must eventually be handed to `sink`, either completed or, after
    /// [`UsbDeviceBackend::cancel`], as-is.
    fn submit(&mut self, urb: Urb, sink: &CompletionSink);

    /// Gives up on an in-flight URB. If the backend still holds it, it must pass it to `sink`
    /// without waiting for the transfer. A no-op for URBs already completed.
    fn cancel(&mut self, id: UrbId, sink: &CompletionSink);

    /// Port reset. `force_real` asks proxies to reset the physical device even if they would
    /// normally only emulate the reset.
    fn reset(&mut self, force_real: bool) -> Result<(), BackendError>;

    fn power_on(&mut self) {}

    fn power_off(&mut self) {}
}
