//! USB transport abstraction for the PL2303 driver
//!
//! The driver core talks to the device exclusively through [`UsbTransport`],
//! which mirrors the slice of a host USB stack the chip needs: lifecycle,
//! control transfers in both directions, and bulk/interrupt data transfers.
//! The native implementation lives in [`crate::native`]; tests and
//! hardware-free development use [`crate::mock`].

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::fmt;

use maybe_async::maybe_async;

use crate::error::{Pl2303Error, Result};

/// Control request type (bmRequestType bits 5-6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Class,
    Vendor,
}

/// Control request recipient (bmRequestType bits 0-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
}

/// Setup fields of one control transfer, minus direction and length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: RequestType,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// Vendor request addressed to the device
    pub fn vendor(request: u8, value: u16, index: u16) -> Self {
        ControlRequest {
            request_type: RequestType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
        }
    }

    /// Class request addressed to the interface
    pub fn class(request: u8, value: u16, index: u16) -> Self {
        ControlRequest {
            request_type: RequestType::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index,
        }
    }
}

/// Endpoint transfer type (descriptor bmAttributes bits 0-1)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control = 0x00,
    Isochronous = 0x01,
    Bulk = 0x02,
    Interrupt = 0x03,
}

impl TransferKind {
    /// Decode from the descriptor attribute byte
    pub fn from_code(code: u8) -> Self {
        match code & 0x03 {
            0x00 => TransferKind::Control,
            0x01 => TransferKind::Isochronous,
            0x02 => TransferKind::Bulk,
            _ => TransferKind::Interrupt,
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Control => write!(f, "control"),
            TransferKind::Isochronous => write!(f, "isochronous"),
            TransferKind::Bulk => write!(f, "bulk"),
            TransferKind::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// Endpoint direction, carried in bit 7 of the endpoint address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "OUT"),
            Direction::In => write!(f, "IN"),
        }
    }
}

/// One endpoint of an interface, as reported by the descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub kind: TransferKind,
    pub max_packet_size: usize,
}

impl EndpointInfo {
    pub fn direction(&self) -> Direction {
        if self.address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Endpoint number without the direction bit
    pub fn number(&self) -> u8 {
        self.address & 0x0F
    }
}

/// One interface of the active configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub class: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Resolve exactly one endpoint matching the wanted type and direction.
///
/// Zero candidates and several candidates both violate the driver's
/// preconditions and fail fatally; nothing is retried.
pub fn find_endpoint(
    endpoints: &[EndpointInfo],
    kind: TransferKind,
    direction: Direction,
) -> Result<EndpointInfo> {
    let mut matches = endpoints
        .iter()
        .filter(|ep| ep.kind == kind && ep.direction() == direction);
    match (matches.next(), matches.next()) {
        (Some(ep), None) => Ok(*ep),
        (None, _) => Err(Pl2303Error::NoEndpoint { kind, direction }),
        (Some(_), Some(_)) => Err(Pl2303Error::AmbiguousEndpoint {
            kind,
            direction,
            count: 2 + matches.count(),
        }),
    }
}

/// Host USB access layer (sync or async depending on `is_sync` feature)
///
/// One implementation serves one device handle; the driver takes it by
/// value and issues every operation through it, so a recording
/// implementation observes the complete wire protocol.
#[maybe_async(AFIT)]
pub trait UsbTransport {
    /// Open the device handle
    async fn open(&mut self) -> Result<()>;

    /// Select the active configuration by value
    async fn select_configuration(&mut self, configuration: u8) -> Result<()>;

    /// Claim an interface of the active configuration
    async fn claim_interface(&mut self, interface: u8) -> Result<()>;

    /// Interfaces of the active configuration, with their endpoints.
    /// Only meaningful once the device is open and configured.
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;

    /// Control IN transfer reading up to `length` bytes
    async fn control_in(&mut self, request: ControlRequest, length: u16) -> Result<Vec<u8>>;

    /// Control OUT transfer carrying `data` (possibly empty)
    async fn control_out(&mut self, request: ControlRequest, data: &[u8]) -> Result<()>;

    /// Bulk or interrupt IN transfer of up to `length` bytes. Short reads
    /// are a normal outcome, not an error.
    async fn transfer_in(&mut self, endpoint: u8, length: usize) -> Result<Vec<u8>>;

    /// Bulk OUT transfer of the whole buffer; the ack is the byte count
    /// the transport accepted
    async fn transfer_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize>;

    /// Release the claimed interface, then close the handle
    async fn close(&mut self) -> Result<()>;
}
