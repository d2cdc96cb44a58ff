use thiserror::Error;

use crate::device::{DeviceState, UsbSpeed};
use crate::urb::UrbId;

pub type Result<T> = std::result::Result<T, RootHubError>;

/// Errors surfaced synchronously by root hub operations.
///
/// Transfer outcomes are never reported through this type; they arrive as a
/// [`crate::UrbStatus`] on the URB's completion.
#[derive(Debug, Error)]
pub enum RootHubError {
    #[error("invalid port {port} (root hub has {port_count} ports)")]
    PortOutOfRange { port: u8, port_count: u8 },

    #[error("port {0} is not exposed by the host controller")]
    PortNotExposed(u8),

    #[error("port {0} is already occupied")]
    PortOccupied(u8),

    #[error("no device attached at port {0}")]
    PortEmpty(u8),

    #[error("no free root hub ports")]
    NoFreePorts,

    #[error("host controller cannot carry {0} speed devices")]
    UnsupportedSpeed(UsbSpeed),

    #[error("no device answers to address {0}")]
    AddressNotResolved(u8),

    #[error("endpoint {endpoint} is halted")]
    EndpointHalted { endpoint: u8 },

    #[error("endpoint {endpoint} is not part of the active configuration")]
    EndpointNotConfigured { endpoint: u8 },

    #[error("device on port {0} is being reset")]
    DeviceResetting(u8),

    #[error("device on port {port} is not ready (state {state:?})")]
    DeviceNotReady { port: u8, state: DeviceState },

    #[error("device on port {0} is not powered")]
    DeviceNotPowered(u8),

    #[error("illegal device state transition {from:?} -> {to:?}")]
    InvalidStateTransition { from: DeviceState, to: DeviceState },

    #[error("URB parameters must be set before any URB is allocated")]
    UrbParamsLocked,

    #[error("URB {0} is not known to the root hub")]
    UnknownUrb(UrbId),

    #[error("URB {id} is in state {state:?}, expected Allocated")]
    UrbNotAllocated { id: UrbId, state: crate::UrbState },

    #[error("host controller refused port {port}: {source}")]
    HostController {
        port: u8,
        #[source]
        source: HciError,
    },

    #[error("device backend rejected the transfer: {0}")]
    Backend(#[from] BackendError),

    #[error("reset of port {port} failed: {source}")]
    ResetFailed {
        port: u8,
        #[source]
        source: ResetError,
    },

    #[error("failed to spawn reset worker: {0}")]
    ResetWorker(#[source] std::io::Error),
}

/// URB allocation failures.
///
/// [`UrbAllocError::NoCapacity`] is a soft condition: the caller should retry on a later frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UrbAllocError {
    #[error("URB pool exhausted ({in_use} in use)")]
    NoCapacity { in_use: usize },

    #[error("URB data size {len} exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
}

/// Failures reported by a host controller emulation through [`crate::RootHubPort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HciError {
    #[error("port unavailable")]
    PortUnavailable,

    #[error("{0}")]
    Refused(String),
}

/// Failures reported by a device backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("device was removed")]
    Removed,

    #[error("endpoint {0} not supported")]
    UnsupportedEndpoint(u8),

    #[error("device busy")]
    Busy,

    #[error("{0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResetError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("reset took {elapsed_ms}ms (limit {limit_ms}ms)")]
    TimedOut { elapsed_ms: u64, limit_ms: u64 },

    #[error("device was detached while resetting")]
    Aborted,

    #[error("reset thread: {0}")]
    Thread(String),
}

/// Errors produced while parsing raw USB descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor at offset {offset} is truncated ({needed} bytes needed, {available} available)")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("descriptor type {kind:#04x} at offset {offset} has bLength {len}, minimum is {min}")]
    TooShort {
        offset: usize,
        kind: u8,
        len: u8,
        min: usize,
    },

    #[error("expected descriptor type {expected:#04x} at offset {offset}, found {found:#04x}")]
    UnexpectedType {
        offset: usize,
        expected: u8,
        found: u8,
    },

    #[error("descriptor type {kind:#04x} at offset {offset} is out of place")]
    Misplaced { offset: usize, kind: u8 },

    #[error("interface association at offset {offset} names interface {first}, but interface {found} follows")]
    AssociationMismatch { offset: usize, first: u8, found: u8 },

    #[error("interface association at offset {offset} covers {count} interfaces from {first}, but interface {missing} is absent")]
    AssociationGap {
        offset: usize,
        first: u8,
        count: u8,
        missing: u16,
    },

    #[error("interface association at offset {offset} is not followed by any interface")]
    DanglingAssociation { offset: usize },

    #[error("endpoint {endpoint:#04x} is missing its SuperSpeed companion descriptor")]
    MissingCompanion { endpoint: u8 },

    #[error("wTotalLength is {declared}, descriptors span {actual} bytes")]
    TotalLengthMismatch { declared: u16, actual: usize },
}
