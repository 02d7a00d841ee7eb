//! Error types for PL2303 operations

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, string::String};

#[cfg(feature = "std")]
use thiserror::Error;

use crate::transport::{Direction, TransferKind};

/// Errors that can occur when driving a PL2303
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum Pl2303Error {
    /// No matching device on the bus
    #[cfg_attr(feature = "std", error("PL2303 device not found (VID:067B PID:2303)"))]
    DeviceNotFound,

    /// Failed to open the device
    #[cfg_attr(feature = "std", error("Failed to open device: {0}"))]
    OpenFailed(String),

    /// Failed to select the USB configuration
    #[cfg_attr(feature = "std", error("Failed to select configuration: {0}"))]
    ConfigurationFailed(String),

    /// Failed to claim the interface
    #[cfg_attr(feature = "std", error("Failed to claim interface: {0}"))]
    ClaimFailed(String),

    /// Control transfer rejected by the transport
    #[cfg_attr(feature = "std", error("Control transfer failed: {0}"))]
    ControlFailed(String),

    /// Bulk or interrupt transfer rejected by the transport
    #[cfg_attr(feature = "std", error("USB transfer failed: {0}"))]
    TransferFailed(String),

    /// Timeout during a transfer
    #[cfg_attr(feature = "std", error("Timeout during USB transfer"))]
    Timeout,

    /// Initialization aborted, tagged with the step that failed
    #[cfg_attr(feature = "std", error("Initialization failed at {step}: {source}"))]
    Handshake {
        step: String,
        source: Box<Pl2303Error>,
    },

    /// Requested baud rate is above the chip's ceiling
    #[cfg_attr(feature = "std", error("Baud rate {0} exceeds the supported maximum"))]
    UnsupportedBaudRate(u32),

    /// Configuration has no designated interface and more or fewer than one candidate
    #[cfg_attr(feature = "std", error("Expected exactly one interface, found {0}"))]
    InterfaceCount(usize),

    /// Designated interface is absent from the selected configuration
    #[cfg_attr(
        feature = "std",
        error("Interface {0} not present in the selected configuration")
    )]
    InterfaceNotFound(u8),

    /// Claimed interface does not look like a PL2303
    #[cfg_attr(
        feature = "std",
        error("Interface {interface} has class {class:#04x}, expected vendor-specific")
    )]
    WrongInterfaceClass { interface: u8, class: u8 },

    /// No endpoint matches the wanted type and direction
    #[cfg_attr(
        feature = "std",
        error("No {kind} {direction} endpoint on the claimed interface")
    )]
    NoEndpoint {
        kind: TransferKind,
        direction: Direction,
    },

    /// More than one endpoint matches the wanted type and direction
    #[cfg_attr(
        feature = "std",
        error("Found {count} {kind} {direction} endpoints, expected exactly one")
    )]
    AmbiguousEndpoint {
        kind: TransferKind,
        direction: Direction,
        count: usize,
    },

    /// Device answered with something the driver cannot use
    #[cfg_attr(feature = "std", error("Invalid response from device: {0}"))]
    InvalidResponse(String),

    /// Operation attempted on a closed or failed session
    #[cfg_attr(feature = "std", error("Device is closed"))]
    Closed,
}

impl Pl2303Error {
    /// Tag an error with the initialization step it occurred in
    pub fn during(step: impl Into<String>, source: Pl2303Error) -> Self {
        Pl2303Error::Handshake {
            step: step.into(),
            source: Box::new(source),
        }
    }
}

/// Result type for PL2303 operations
pub type Result<T> = core::result::Result<T, Pl2303Error>;

#[cfg(feature = "nusb")]
impl From<nusb::Error> for Pl2303Error {
    fn from(e: nusb::Error) -> Self {
        Pl2303Error::TransferFailed(e.to_string())
    }
}
