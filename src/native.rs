//! nusb-backed transport
//!
//! Talks to a real PL2303 through the operating system's USB stack.
//! Only available with the `std` feature; async hosts bring their own
//! [`UsbTransport`] implementation.

use std::collections::HashMap;
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, In, Interrupt, Out};
use nusb::{Endpoint, MaybeFuture};

use crate::error::{Pl2303Error, Result};
use crate::protocol::{PL2303_USB_PRODUCT, PL2303_USB_VENDOR};
use crate::transport::{
    ControlRequest, EndpointInfo, InterfaceInfo, Recipient, RequestType, TransferKind,
    UsbTransport,
};

/// Default timeout for individual USB transfers
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

/// USB transport backed by nusb
///
/// Wraps one enumerated device and hands out raw control and
/// endpoint transfers. Lifecycle calls must run in order (open,
/// select configuration, claim interface) before any transfer,
/// which [`crate::Pl2303::open`] takes care of.
pub struct NusbTransport {
    info: nusb::DeviceInfo,
    device: Option<nusb::Device>,
    interface: Option<nusb::Interface>,
    /// Endpoint address to transfer type, filled in when the
    /// interface is claimed. Routes IN transfers to the right
    /// endpoint flavor.
    endpoint_kinds: HashMap<u8, TransferKind>,
    timeout: Duration,
}

/// Information about a connected PL2303 device
#[derive(Debug, Clone)]
pub struct Pl2303DeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
}

impl std::fmt::Display for Pl2303DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PL2303 at bus {} address {}", self.bus, self.address)
    }
}

fn is_pl2303(info: &nusb::DeviceInfo) -> bool {
    info.vendor_id() == PL2303_USB_VENDOR && info.product_id() == PL2303_USB_PRODUCT
}

fn control_type(request_type: RequestType) -> nusb::transfer::ControlType {
    match request_type {
        RequestType::Class => nusb::transfer::ControlType::Class,
        RequestType::Vendor => nusb::transfer::ControlType::Vendor,
    }
}

fn control_recipient(recipient: Recipient) -> nusb::transfer::Recipient {
    match recipient {
        Recipient::Device => nusb::transfer::Recipient::Device,
        Recipient::Interface => nusb::transfer::Recipient::Interface,
    }
}

fn endpoint_kind(transfer_type: nusb::descriptors::TransferType) -> TransferKind {
    use nusb::descriptors::TransferType;
    match transfer_type {
        TransferType::Control => TransferKind::Control,
        TransferType::Isochronous => TransferKind::Isochronous,
        TransferType::Interrupt => TransferKind::Interrupt,
        _ => TransferKind::Bulk,
    }
}

impl NusbTransport {
    /// Transport for an already enumerated device
    pub fn new(info: nusb::DeviceInfo) -> Self {
        NusbTransport {
            info,
            device: None,
            interface: None,
            endpoint_kinds: HashMap::new(),
            timeout: TRANSFER_TIMEOUT,
        }
    }

    /// Transport for the first PL2303 on the bus
    pub fn first() -> Result<Self> {
        Self::nth(0)
    }

    /// Transport for the nth PL2303 (0-indexed)
    ///
    /// Useful when multiple adapters are connected.
    pub fn nth(index: usize) -> Result<Self> {
        let devices: Vec<_> = nusb::list_devices()
            .wait()
            .map_err(|e| Pl2303Error::OpenFailed(e.to_string()))?
            .filter(is_pl2303)
            .collect();

        let info = devices.get(index).ok_or(Pl2303Error::DeviceNotFound)?;

        log::info!(
            "pl2303: device at bus {} address {}",
            info.busnum(),
            info.device_address()
        );

        Ok(Self::new(info.clone()))
    }

    /// List all connected PL2303 devices
    pub fn list() -> Result<Vec<Pl2303DeviceInfo>> {
        let devices = nusb::list_devices()
            .wait()
            .map_err(|e| Pl2303Error::OpenFailed(e.to_string()))?
            .filter(is_pl2303)
            .map(|d| Pl2303DeviceInfo {
                bus: d.busnum(),
                address: d.device_address(),
            })
            .collect();

        Ok(devices)
    }

    /// Override the per-transfer timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn device(&self) -> Result<&nusb::Device> {
        self.device.as_ref().ok_or(Pl2303Error::Closed)
    }

    fn claimed(&self) -> Result<&nusb::Interface> {
        self.interface.as_ref().ok_or(Pl2303Error::Closed)
    }

    fn bulk_read(&mut self, endpoint: u8, length: usize) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let mut in_ep: Endpoint<Bulk, In> = self
            .claimed()?
            .endpoint(endpoint)
            .map_err(|e| Pl2303Error::TransferFailed(e.to_string()))?;

        // IN requests must be a whole number of packets
        let max_packet_size = in_ep.max_packet_size();
        let request_len = length.div_ceil(max_packet_size) * max_packet_size;
        let mut in_buf = Buffer::new(request_len);
        in_buf.set_requested_len(request_len);

        let completion = in_ep.transfer_blocking(in_buf, timeout);
        let data = completion.into_result().map_err(transfer_error)?;

        let len = data.len().min(length);
        log::trace!("pl2303: bulk read {len} bytes from {endpoint:#04x}");
        Ok(data[..len].to_vec())
    }

    fn interrupt_read(&mut self, endpoint: u8, length: usize) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let mut in_ep: Endpoint<Interrupt, In> = self
            .claimed()?
            .endpoint(endpoint)
            .map_err(|e| Pl2303Error::TransferFailed(e.to_string()))?;

        let max_packet_size = in_ep.max_packet_size();
        let request_len = length.div_ceil(max_packet_size) * max_packet_size;
        let mut in_buf = Buffer::new(request_len);
        in_buf.set_requested_len(request_len);

        let completion = in_ep.transfer_blocking(in_buf, timeout);
        let data = completion.into_result().map_err(transfer_error)?;

        let len = data.len().min(length);
        log::trace!("pl2303: interrupt read {len} bytes from {endpoint:#04x}");
        Ok(data[..len].to_vec())
    }
}

/// Map nusb transfer failures, keeping timeouts distinguishable.
/// `transfer_blocking` cancels the transfer when the timeout elapses,
/// so a cancelled completion here means the deadline passed.
fn transfer_error(e: nusb::transfer::TransferError) -> Pl2303Error {
    match e {
        nusb::transfer::TransferError::Cancelled => Pl2303Error::Timeout,
        other => Pl2303Error::TransferFailed(other.to_string()),
    }
}

impl UsbTransport for NusbTransport {
    fn open(&mut self) -> Result<()> {
        let device = self
            .info
            .open()
            .wait()
            .map_err(|e| Pl2303Error::OpenFailed(e.to_string()))?;

        log::debug!(
            "pl2303: opened VID={:04X} PID={:04X}",
            self.info.vendor_id(),
            self.info.product_id()
        );

        self.device = Some(device);
        Ok(())
    }

    fn select_configuration(&mut self, configuration: u8) -> Result<()> {
        let device = self.device()?;
        let active = device
            .active_configuration()
            .map_err(|e| Pl2303Error::ConfigurationFailed(e.to_string()))?;

        // Selecting the active configuration again would needlessly
        // unbind kernel drivers on some platforms
        if active.configuration_value() != configuration {
            device
                .set_configuration(configuration)
                .wait()
                .map_err(|e| Pl2303Error::ConfigurationFailed(e.to_string()))?;
        }

        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        let kinds: HashMap<u8, TransferKind> = self
            .interfaces()?
            .into_iter()
            .filter(|i| i.number == interface)
            .flat_map(|i| i.endpoints)
            .map(|ep| (ep.address, ep.kind))
            .collect();

        // Detach a bound kernel serial driver before claiming
        let claimed = self
            .device()?
            .detach_and_claim_interface(interface)
            .wait()
            .map_err(|e| Pl2303Error::ClaimFailed(e.to_string()))?;

        log::debug!("pl2303: claimed interface {interface}");
        self.endpoint_kinds = kinds;
        self.interface = Some(claimed);
        Ok(())
    }

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        let device = self.device()?;
        let config = device
            .active_configuration()
            .map_err(|e| Pl2303Error::ConfigurationFailed(e.to_string()))?;

        let mut interfaces = Vec::new();
        for iface in config.interface_alt_settings() {
            if iface.alternate_setting() != 0 {
                continue;
            }
            let endpoints = iface
                .endpoints()
                .map(|ep| EndpointInfo {
                    address: ep.address(),
                    kind: endpoint_kind(ep.transfer_type()),
                    max_packet_size: ep.max_packet_size(),
                })
                .collect();
            interfaces.push(InterfaceInfo {
                number: iface.interface_number(),
                class: iface.class(),
                endpoints,
            });
        }

        Ok(interfaces)
    }

    fn control_in(&mut self, request: ControlRequest, length: u16) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let data = self
            .claimed()?
            .control_in(
                nusb::transfer::ControlIn {
                    control_type: control_type(request.request_type),
                    recipient: control_recipient(request.recipient),
                    request: request.request,
                    value: request.value,
                    index: request.index,
                    length,
                },
                timeout,
            )
            .wait()
            .map_err(|e| Pl2303Error::ControlFailed(e.to_string()))?;

        log::trace!(
            "pl2303: control read {:#04x} value {:#06x}: {} bytes",
            request.request,
            request.value,
            data.len()
        );
        Ok(data)
    }

    fn control_out(&mut self, request: ControlRequest, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        self.claimed()?
            .control_out(
                nusb::transfer::ControlOut {
                    control_type: control_type(request.request_type),
                    recipient: control_recipient(request.recipient),
                    request: request.request,
                    value: request.value,
                    index: request.index,
                    data,
                },
                timeout,
            )
            .wait()
            .map_err(|e| Pl2303Error::ControlFailed(e.to_string()))?;

        log::trace!(
            "pl2303: control write {:#04x} value {:#06x} index {:#06x}",
            request.request,
            request.value,
            request.index
        );
        Ok(())
    }

    fn transfer_in(&mut self, endpoint: u8, length: usize) -> Result<Vec<u8>> {
        let kind = self.endpoint_kinds.get(&endpoint).copied();
        match kind {
            Some(TransferKind::Interrupt) => self.interrupt_read(endpoint, length),
            _ => self.bulk_read(endpoint, length),
        }
    }

    fn transfer_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize> {
        let timeout = self.timeout;
        let mut out_ep: Endpoint<Bulk, Out> = self
            .claimed()?
            .endpoint(endpoint)
            .map_err(|e| Pl2303Error::TransferFailed(e.to_string()))?;

        let mut out_buf = Buffer::new(data.len());
        out_buf.extend_from_slice(data);

        let completion = out_ep.transfer_blocking(out_buf, timeout);
        completion.into_result().map_err(transfer_error)?;

        log::trace!("pl2303: bulk write {} bytes to {endpoint:#04x}", data.len());
        Ok(data.len())
    }

    fn close(&mut self) -> Result<()> {
        self.endpoint_kinds.clear();
        self.interface = None;
        self.device = None;
        log::debug!("pl2303: device released");
        Ok(())
    }
}
