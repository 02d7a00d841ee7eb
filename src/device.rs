//! PL2303 device driver
//!
//! This module provides the main `Pl2303` struct, which owns a transport
//! and drives the chip's vendor handshake, line-coding negotiation and
//! bulk data path. Uses `maybe_async` to support both sync and async modes.

#[cfg(not(feature = "std"))]
use alloc::{format, vec::Vec};

use core::fmt;

use maybe_async::maybe_async;

use crate::error::{Pl2303Error, Result};
use crate::protocol::*;
use crate::transport::{
    find_endpoint, ControlRequest, Direction, InterfaceInfo, TransferKind, UsbTransport,
};

/// Session configuration
///
/// Everything the driver would otherwise have to invent: configuration
/// value, interface designation and endpoint overrides. The defaults
/// select configuration 1 and discover the rest from the descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pl2303Config {
    /// USB configuration value to select
    pub configuration: u8,
    /// Interface to claim; `None` requires exactly one vendor-class interface
    pub interface: Option<u8>,
    /// Line coding applied during initialization
    pub line_coding: LineCoding,
    /// Bulk IN endpoint override, bypassing discovery
    pub bulk_in: Option<u8>,
    /// Bulk OUT endpoint override, bypassing discovery
    pub bulk_out: Option<u8>,
    /// Interrupt IN endpoint override, bypassing discovery
    pub interrupt_in: Option<u8>,
}

impl Default for Pl2303Config {
    fn default() -> Self {
        Pl2303Config {
            configuration: 1,
            interface: None,
            line_coding: LineCoding::default(),
            bulk_in: None,
            bulk_out: None,
            interrupt_in: None,
        }
    }
}

/// Session state. The sequence is linear; an error during initialization
/// ends in `Failed`, which behaves like `Closed` for every caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unopened,
    Opening,
    Handshaking,
    Ready,
    Closed,
    Failed,
}

/// One notification from the interrupt status channel
#[derive(Debug)]
pub enum SerialEvent {
    /// Decoded UART state frame
    Status(UartStatus),
    /// Fault on the status channel; the data path stays usable
    Error(Pl2303Error),
}

/// PL2303 serial bridge
///
/// Owns the transport for the lifetime of the session. Construction runs
/// the full wake-up handshake; on success the chip is in a known mode
/// with flow control disabled and the line coding applied.
pub struct Pl2303<T: UsbTransport> {
    transport: T,
    config: Pl2303Config,
    state: State,
    bulk_in: u8,
    bulk_out: u8,
    interrupt_in: Option<u8>,
}

// Transport implementations are not required to be Debug.
impl<T: UsbTransport> fmt::Debug for Pl2303<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pl2303")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("bulk_in", &format_args!("{:#04x}", self.bulk_in))
            .field("bulk_out", &format_args!("{:#04x}", self.bulk_out))
            .field("interrupt_in", &self.interrupt_in)
            .finish_non_exhaustive()
    }
}

impl<T: UsbTransport> Pl2303<T> {
    /// Open a session: select the configuration, claim the interface and
    /// bring the chip into its operating mode.
    ///
    /// Any step failing poisons the whole sequence; the transport is
    /// closed and the error names the step. A partial handshake leaves
    /// the chip in a state only a fresh open can clear, so nothing is
    /// retried here.
    #[maybe_async]
    pub async fn open(transport: T, config: Pl2303Config) -> Result<Self> {
        if config.line_coding.baud_rate > MAX_BAUD_RATE {
            return Err(Pl2303Error::UnsupportedBaudRate(config.line_coding.baud_rate));
        }

        let mut device = Self {
            transport,
            config,
            state: State::Unopened,
            bulk_in: BULK_IN_EP,
            bulk_out: BULK_OUT_EP,
            interrupt_in: None,
        };

        match device.initialize().await {
            Ok(()) => {
                device.state = State::Ready;
                log::info!(
                    "pl2303: device ready at {} baud",
                    device.config.line_coding.baud_rate
                );
                Ok(device)
            }
            Err(e) => {
                device.state = State::Failed;
                if let Err(close_err) = device.transport.close().await {
                    log::warn!("pl2303: close after failed initialization: {close_err:?}");
                }
                Err(e)
            }
        }
    }

    /// Current session state
    pub fn state(&self) -> State {
        self.state
    }

    /// Line coding in effect, with the baud rate the chip actually runs
    pub fn line_coding(&self) -> LineCoding {
        self.config.line_coding
    }

    /// The documented bring-up sequence. Order matters: each step's
    /// effect is only defined with the previous ones applied.
    #[maybe_async]
    async fn initialize(&mut self) -> Result<()> {
        self.state = State::Opening;
        self.transport
            .open()
            .await
            .map_err(|e| Pl2303Error::during("open", e))?;
        self.transport
            .select_configuration(self.config.configuration)
            .await
            .map_err(|e| Pl2303Error::during("select configuration", e))?;

        let interface = self.resolve_interface()?;
        self.resolve_endpoints(&interface)?;
        self.transport
            .claim_interface(interface.number)
            .await
            .map_err(|e| Pl2303Error::during("claim interface", e))?;

        self.state = State::Handshaking;
        log::debug!("pl2303: starting wake sequence");
        self.wake_sequence().await?;

        self.set_line_coding(self.config.line_coding)
            .await
            .map_err(|e| Pl2303Error::during("set line coding", e))?;
        self.config.line_coding.baud_rate = quantize_baud_rate(self.config.line_coding.baud_rate);

        // Disable all flow control, then reset the upstream data pipes
        self.init_write(0, 0).await?;
        self.init_write(8, 0).await?;
        self.init_write(9, 0).await?;
        Ok(())
    }

    /// Pick the interface to claim, before any transfer happens. Without
    /// a designation the configuration must hold exactly one interface
    /// and it must be vendor-class.
    fn resolve_interface(&self) -> Result<InterfaceInfo> {
        let interfaces = self.transport.interfaces()?;
        match self.config.interface {
            Some(number) => interfaces
                .into_iter()
                .find(|iface| iface.number == number)
                .ok_or(Pl2303Error::InterfaceNotFound(number)),
            None => {
                let count = interfaces.len();
                let mut iter = interfaces.into_iter();
                match (iter.next(), iter.next()) {
                    (Some(iface), None) => {
                        if iface.class != PL2303_INTERFACE_CLASS {
                            return Err(Pl2303Error::WrongInterfaceClass {
                                interface: iface.number,
                                class: iface.class,
                            });
                        }
                        Ok(iface)
                    }
                    _ => Err(Pl2303Error::InterfaceCount(count)),
                }
            }
        }
    }

    /// Resolve the data and status endpoints, honoring explicit
    /// overrides. A missing or ambiguous data endpoint is fatal before
    /// any transfer is attempted; a missing interrupt endpoint just
    /// leaves the session without a status channel.
    fn resolve_endpoints(&mut self, interface: &InterfaceInfo) -> Result<()> {
        self.bulk_in = match self.config.bulk_in {
            Some(ep) => ep,
            None => find_endpoint(&interface.endpoints, TransferKind::Bulk, Direction::In)?.address,
        };
        self.bulk_out = match self.config.bulk_out {
            Some(ep) => ep,
            None => {
                find_endpoint(&interface.endpoints, TransferKind::Bulk, Direction::Out)?.address
            }
        };
        self.interrupt_in = match self.config.interrupt_in {
            Some(ep) => Some(ep),
            None => {
                match find_endpoint(&interface.endpoints, TransferKind::Interrupt, Direction::In) {
                    Ok(ep) => Some(ep.address),
                    Err(Pl2303Error::NoEndpoint { .. }) => None,
                    Err(e) => return Err(e),
                }
            }
        };
        log::debug!(
            "pl2303: endpoints bulk-in {:#04x} bulk-out {:#04x} interrupt-in {:?}",
            self.bulk_in,
            self.bulk_out,
            self.interrupt_in
        );
        Ok(())
    }

    /// Vendor register incantation that wakes the ASIC. The registers
    /// and values are chip magic without documented meaning.
    #[maybe_async]
    async fn wake_sequence(&mut self) -> Result<()> {
        self.init_read(0x8484, 0).await?;
        self.init_write(0x0404, 0).await?;
        self.init_read(0x8484, 0).await?;
        self.init_read(0x8383, 0).await?;
        self.init_read(0x8484, 0).await?;
        self.init_write(0x0404, 1).await?;
        self.init_read(0x8484, 0).await?;
        self.init_read(0x8383, 0).await?;
        self.init_write(0, 1).await?;
        self.init_write(1, 0).await?;
        self.init_write(2, 0x44).await?;
        Ok(())
    }

    /// Vendor read with the failing register in the error tag; the byte
    /// itself is discarded during initialization.
    #[maybe_async]
    async fn init_read(&mut self, value: u16, index: u16) -> Result<()> {
        self.vendor_read(value, index).await.map_err(|e| {
            Pl2303Error::during(format!("vendor read {value:#06x}/{index:#06x}"), e)
        })?;
        Ok(())
    }

    /// Vendor write with the failing register in the error tag
    #[maybe_async]
    async fn init_write(&mut self, value: u16, index: u16) -> Result<()> {
        self.vendor_write(value, index).await.map_err(|e| {
            Pl2303Error::during(format!("vendor write {value:#06x}/{index:#06x}"), e)
        })
    }

    /// Vendor register read: device-recipient vendor IN transfer
    /// returning exactly one byte
    #[maybe_async]
    async fn vendor_read(&mut self, value: u16, index: u16) -> Result<u8> {
        let data = self
            .transport
            .control_in(ControlRequest::vendor(VENDOR_READ_REQUEST, value, index), 1)
            .await?;
        match data.first() {
            Some(&byte) => Ok(byte),
            None => Err(Pl2303Error::InvalidResponse(format!(
                "vendor read {value:#06x} returned no data"
            ))),
        }
    }

    /// Vendor register write: device-recipient vendor OUT transfer with
    /// no payload
    #[maybe_async]
    async fn vendor_write(&mut self, value: u16, index: u16) -> Result<()> {
        self.transport
            .control_out(
                ControlRequest::vendor(VENDOR_WRITE_REQUEST, value, index),
                &[],
            )
            .await
    }

    /// Read-modify-write of the 7-byte line-coding structure. The baud
    /// rate is quantized to the nearest supported rate first; the
    /// remaining fields are the fixed 1/none/8.
    #[maybe_async]
    async fn set_line_coding(&mut self, coding: LineCoding) -> Result<()> {
        let quantized = quantize_baud_rate(coding.baud_rate);
        if quantized != coding.baud_rate {
            log::debug!(
                "pl2303: quantized baud rate {} to {}",
                coding.baud_rate,
                quantized
            );
        }

        let current = self
            .transport
            .control_in(
                ControlRequest::class(GET_LINE_CODING_REQUEST, 0, 0),
                LINE_CODING_SIZE as u16,
            )
            .await?;
        let mut buf: [u8; LINE_CODING_SIZE] = current.as_slice().try_into().map_err(|_| {
            Pl2303Error::InvalidResponse(format!(
                "line coding read returned {} bytes",
                current.len()
            ))
        })?;

        let applied = LineCoding {
            baud_rate: quantized,
            ..coding
        };
        applied.apply_to(&mut buf);

        self.transport
            .control_out(ControlRequest::class(SET_LINE_CODING_REQUEST, 0, 0), &buf)
            .await?;
        log::debug!("pl2303: line coding set to {} baud", quantized);
        Ok(())
    }

    /// Change the baud rate of a running session. Quantizes like `open`
    /// and returns the rate the chip actually runs.
    #[maybe_async]
    pub async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<u32> {
        self.ensure_ready()?;
        if baud_rate > MAX_BAUD_RATE {
            return Err(Pl2303Error::UnsupportedBaudRate(baud_rate));
        }
        let coding = LineCoding {
            baud_rate,
            ..self.config.line_coding
        };
        self.set_line_coding(coding).await?;
        let quantized = quantize_baud_rate(baud_rate);
        self.config.line_coding.baud_rate = quantized;
        Ok(quantized)
    }

    /// Read up to `byte_count` bytes from the bulk IN endpoint. Short
    /// reads are a normal outcome; only transport faults are errors.
    #[maybe_async]
    pub async fn read(&mut self, byte_count: usize) -> Result<Vec<u8>> {
        let endpoint = self.bulk_in;
        self.read_from(endpoint, byte_count).await
    }

    /// Read from an explicitly chosen endpoint
    #[maybe_async]
    pub async fn read_from(&mut self, endpoint: u8, byte_count: usize) -> Result<Vec<u8>> {
        self.ensure_ready()?;
        let data = self.transport.transfer_in(endpoint, byte_count).await?;
        log::trace!("pl2303: read {} of up to {} bytes", data.len(), byte_count);
        Ok(data)
    }

    /// Send the whole buffer to the bulk OUT endpoint. Returns once the
    /// transport has accepted the bytes, which says nothing about the
    /// remote serial peer.
    #[maybe_async]
    pub async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let endpoint = self.bulk_out;
        self.send_to(endpoint, data).await
    }

    /// Send to an explicitly chosen endpoint
    #[maybe_async]
    pub async fn send_to(&mut self, endpoint: u8, data: &[u8]) -> Result<usize> {
        self.ensure_ready()?;
        let accepted = self.transport.transfer_out(endpoint, data).await?;
        log::trace!("pl2303: sent {accepted} bytes");
        Ok(accepted)
    }

    /// Poll the interrupt status channel once.
    ///
    /// `None` means the line was quiet within the transport's deadline.
    /// Channel faults come back as [`SerialEvent::Error`] instead of
    /// failing the session; the data path stays usable.
    #[maybe_async]
    pub async fn poll_status(&mut self) -> Result<Option<SerialEvent>> {
        self.ensure_ready()?;
        let endpoint = self.interrupt_in.ok_or(Pl2303Error::NoEndpoint {
            kind: TransferKind::Interrupt,
            direction: Direction::In,
        })?;

        match self.transport.transfer_in(endpoint, STATUS_FRAME_SIZE).await {
            Ok(frame) if frame.is_empty() => Ok(None),
            Ok(frame) => match UartStatus::from_frame(&frame) {
                Some(status) => Ok(Some(SerialEvent::Status(status))),
                None => {
                    log::warn!("pl2303: runt status frame of {} bytes", frame.len());
                    Ok(Some(SerialEvent::Error(Pl2303Error::InvalidResponse(
                        format!("status frame of {} bytes", frame.len()),
                    ))))
                }
            },
            Err(Pl2303Error::Timeout) => Ok(None),
            Err(e) => Ok(Some(SerialEvent::Error(e))),
        }
    }

    /// Release the interface and close the handle. Every later operation
    /// fails with a state error.
    #[maybe_async]
    pub async fn close(&mut self) -> Result<()> {
        if matches!(self.state, State::Closed | State::Failed) {
            return Err(Pl2303Error::Closed);
        }
        self.state = State::Closed;
        self.transport.close().await?;
        log::info!("pl2303: closed");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            State::Ready => Ok(()),
            _ => Err(Pl2303Error::Closed),
        }
    }
}

// Drop implementation only for sync mode (async requires explicit close)
#[cfg(feature = "is_sync")]
impl<T: UsbTransport> Drop for Pl2303<T> {
    fn drop(&mut self) {
        if self.state == State::Ready {
            if let Err(e) = self.close() {
                log::warn!("pl2303: close during drop failed: {e:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockTransport};
    use crate::transport::EndpointInfo;

    fn open_default(mock: &MockTransport) -> Pl2303<MockTransport> {
        Pl2303::open(mock.clone(), Pl2303Config::default()).unwrap()
    }

    /// The full wire script of a default open, all 19 operations
    fn expected_open_calls() -> Vec<Call> {
        let mut calls = vec![
            Call::Open,
            Call::SelectConfiguration(1),
            Call::ClaimInterface(0),
        ];
        let vendor_ops: [(bool, u16, u16); 11] = [
            (true, 0x8484, 0),
            (false, 0x0404, 0),
            (true, 0x8484, 0),
            (true, 0x8383, 0),
            (true, 0x8484, 0),
            (false, 0x0404, 1),
            (true, 0x8484, 0),
            (true, 0x8383, 0),
            (false, 0, 1),
            (false, 1, 0),
            (false, 2, 0x44),
        ];
        for (is_read, value, index) in vendor_ops {
            if is_read {
                calls.push(Call::ControlIn {
                    request: ControlRequest::vendor(VENDOR_READ_REQUEST, value, index),
                    length: 1,
                });
            } else {
                calls.push(Call::ControlOut {
                    request: ControlRequest::vendor(VENDOR_WRITE_REQUEST, value, index),
                    data: vec![],
                });
            }
        }
        calls.push(Call::ControlIn {
            request: ControlRequest::class(GET_LINE_CODING_REQUEST, 0, 0),
            length: 7,
        });
        calls.push(Call::ControlOut {
            request: ControlRequest::class(SET_LINE_CODING_REQUEST, 0, 0),
            data: vec![0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08],
        });
        for (value, index) in [(0u16, 0u16), (8, 0), (9, 0)] {
            calls.push(Call::ControlOut {
                request: ControlRequest::vendor(VENDOR_WRITE_REQUEST, value, index),
                data: vec![],
            });
        }
        calls
    }

    #[test]
    fn test_open_issues_documented_sequence() {
        let mock = MockTransport::new();
        let device = open_default(&mock);
        assert_eq!(device.state(), State::Ready);

        let expected = expected_open_calls();
        assert_eq!(expected.len(), 19);
        assert_eq!(mock.calls(), expected);
    }

    #[test]
    fn test_open_applies_line_coding_read_modify_write() {
        let mock = MockTransport::new();
        // The device-side register starts with arbitrary content
        mock.set_line_coding_bytes([0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB]);
        let device = open_default(&mock);
        assert_eq!(
            mock.line_coding_bytes(),
            [0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]
        );
        assert_eq!(device.line_coding().baud_rate, 9600);
    }

    #[test]
    fn test_open_quantizes_requested_rate() {
        let mock = MockTransport::new();
        let config = Pl2303Config {
            line_coding: LineCoding {
                baud_rate: 10_000,
                ..Default::default()
            },
            ..Default::default()
        };
        let device = Pl2303::open(mock.clone(), config).unwrap();
        assert_eq!(device.line_coding().baud_rate, 9600);
        assert_eq!(
            mock.line_coding_bytes(),
            [0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]
        );
    }

    #[test]
    fn test_open_rejects_excessive_baud_rate() {
        let mock = MockTransport::new();
        let config = Pl2303Config {
            line_coding: LineCoding {
                baud_rate: 7_000_000,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = Pl2303::open(mock.clone(), config).unwrap_err();
        assert!(matches!(err, Pl2303Error::UnsupportedBaudRate(7_000_000)));
        // Checked before the transport is even opened
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_open_fails_on_ambiguous_endpoints() {
        let interface = InterfaceInfo {
            number: 0,
            class: PL2303_INTERFACE_CLASS,
            endpoints: vec![
                EndpointInfo {
                    address: 0x81,
                    kind: TransferKind::Bulk,
                    max_packet_size: 64,
                },
                EndpointInfo {
                    address: 0x83,
                    kind: TransferKind::Bulk,
                    max_packet_size: 64,
                },
                EndpointInfo {
                    address: 0x02,
                    kind: TransferKind::Bulk,
                    max_packet_size: 64,
                },
            ],
        };
        let mock = MockTransport::with_interfaces(vec![interface]);
        let err = Pl2303::open(mock.clone(), Pl2303Config::default()).unwrap_err();
        assert!(matches!(
            err,
            Pl2303Error::AmbiguousEndpoint { count: 2, .. }
        ));
        // No transfer was attempted and the handle was released again
        let calls = mock.calls();
        assert_eq!(calls, vec![Call::Open, Call::SelectConfiguration(1), Call::Close]);
    }

    #[test]
    fn test_open_fails_on_multiple_interfaces() {
        let eps = || {
            vec![
                EndpointInfo {
                    address: 0x81,
                    kind: TransferKind::Interrupt,
                    max_packet_size: 10,
                },
                EndpointInfo {
                    address: 0x02,
                    kind: TransferKind::Bulk,
                    max_packet_size: 64,
                },
                EndpointInfo {
                    address: 0x83,
                    kind: TransferKind::Bulk,
                    max_packet_size: 64,
                },
            ]
        };
        let interfaces = vec![
            InterfaceInfo {
                number: 0,
                class: PL2303_INTERFACE_CLASS,
                endpoints: eps(),
            },
            InterfaceInfo {
                number: 1,
                class: PL2303_INTERFACE_CLASS,
                endpoints: eps(),
            },
        ];

        let mock = MockTransport::with_interfaces(interfaces.clone());
        let err = Pl2303::open(mock.clone(), Pl2303Config::default()).unwrap_err();
        assert!(matches!(err, Pl2303Error::InterfaceCount(2)));

        // An explicit designation resolves the ambiguity
        let mock = MockTransport::with_interfaces(interfaces);
        let config = Pl2303Config {
            interface: Some(1),
            ..Default::default()
        };
        let device = Pl2303::open(mock.clone(), config).unwrap();
        assert_eq!(device.state(), State::Ready);
        assert!(mock.calls().contains(&Call::ClaimInterface(1)));
    }

    #[test]
    fn test_open_fails_on_missing_designated_interface() {
        let mock = MockTransport::new();
        let config = Pl2303Config {
            interface: Some(5),
            ..Default::default()
        };
        let err = Pl2303::open(mock.clone(), config).unwrap_err();
        assert!(matches!(err, Pl2303Error::InterfaceNotFound(5)));
        // Checked from the descriptors alone, no claim was attempted
        assert_eq!(
            mock.calls(),
            vec![Call::Open, Call::SelectConfiguration(1), Call::Close]
        );
    }

    #[test]
    fn test_open_fails_on_wrong_interface_class() {
        let interface = InterfaceInfo {
            number: 0,
            class: 0x0A,
            endpoints: vec![],
        };
        let mock = MockTransport::with_interfaces(vec![interface]);
        let err = Pl2303::open(mock.clone(), Pl2303Config::default()).unwrap_err();
        assert!(matches!(
            err,
            Pl2303Error::WrongInterfaceClass {
                interface: 0,
                class: 0x0A,
            }
        ));
        assert!(!mock.calls().iter().any(|c| matches!(c, Call::ClaimInterface(_))));
    }

    #[test]
    fn test_open_tags_failing_step() {
        let mock = MockTransport::new();
        // Call 3 is the first vendor read, right after the lifecycle calls
        mock.fail_call(3);
        let err = Pl2303::open(mock.clone(), Pl2303Config::default()).unwrap_err();
        match err {
            Pl2303Error::Handshake { step, source } => {
                assert!(step.contains("0x8484"), "step was {step:?}");
                assert!(matches!(*source, Pl2303Error::TransferFailed(_)));
            }
            other => panic!("expected handshake error, got {other:?}"),
        }
        // The transport still gets released
        assert_eq!(mock.calls().last(), Some(&Call::Close));
    }

    #[test]
    fn test_read_and_send() {
        let mock = MockTransport::new();
        let mut device = open_default(&mock);

        mock.push_read(BULK_IN_EP, b"hello".to_vec());
        let data = device.read(64).unwrap();
        assert_eq!(data, b"hello");

        let accepted = device.send(b"abc").unwrap();
        assert_eq!(accepted, 3);

        let calls = mock.calls();
        assert!(calls.contains(&Call::TransferIn {
            endpoint: BULK_IN_EP,
            length: 64,
        }));
        assert!(calls.contains(&Call::TransferOut {
            endpoint: BULK_OUT_EP,
            data: b"abc".to_vec(),
        }));
    }

    #[test]
    fn test_read_times_out_without_data() {
        let mock = MockTransport::new();
        let mut device = open_default(&mock);
        assert!(matches!(device.read(64), Err(Pl2303Error::Timeout)));
    }

    #[test]
    fn test_endpoint_overrides_bypass_discovery() {
        // No bulk-in endpoint in the descriptors at all
        let interface = InterfaceInfo {
            number: 0,
            class: PL2303_INTERFACE_CLASS,
            endpoints: vec![EndpointInfo {
                address: 0x02,
                kind: TransferKind::Bulk,
                max_packet_size: 64,
            }],
        };
        let mock = MockTransport::with_interfaces(vec![interface]);
        let config = Pl2303Config {
            bulk_in: Some(0x85),
            ..Default::default()
        };
        let mut device = Pl2303::open(mock.clone(), config).unwrap();

        mock.push_read(0x85, vec![1, 2, 3]);
        assert_eq!(device.read(16).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_operations_after_close() {
        let mock = MockTransport::new();
        let mut device = open_default(&mock);
        device.close().unwrap();
        assert_eq!(device.state(), State::Closed);

        assert!(matches!(device.read(16), Err(Pl2303Error::Closed)));
        assert!(matches!(device.send(b"x"), Err(Pl2303Error::Closed)));
        assert!(matches!(device.poll_status(), Err(Pl2303Error::Closed)));
        assert!(matches!(
            device.set_baud_rate(9600),
            Err(Pl2303Error::Closed)
        ));
        assert!(matches!(device.close(), Err(Pl2303Error::Closed)));

        // Released exactly once
        let closes = mock.calls().iter().filter(|c| **c == Call::Close).count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_poll_status_decodes_frames() {
        let mock = MockTransport::new();
        let mut device = open_default(&mock);

        let mut frame = vec![0u8; STATUS_FRAME_SIZE];
        frame[STATUS_BYTE_INDEX] = 0x81; // DCD | CTS
        mock.push_read(INTERRUPT_IN_EP, frame);

        match device.poll_status().unwrap() {
            Some(SerialEvent::Status(status)) => {
                assert!(status.contains(UartStatus::DCD));
                assert!(status.contains(UartStatus::CTS));
                assert!(!status.contains(UartStatus::RING));
            }
            other => panic!("expected status event, got {other:?}"),
        }

        // Quiet line: the transport times out, no event
        assert!(device.poll_status().unwrap().is_none());
    }

    #[test]
    fn test_poll_status_surfaces_channel_faults_as_events() {
        let mock = MockTransport::new();
        let mut device = open_default(&mock);

        // Runt frame that does not reach the state byte
        mock.push_read(INTERRUPT_IN_EP, vec![0u8; 4]);
        match device.poll_status().unwrap() {
            Some(SerialEvent::Error(Pl2303Error::InvalidResponse(_))) => {}
            other => panic!("expected error event, got {other:?}"),
        }

        // Transport fault on the next poll
        mock.fail_call(mock.calls().len());
        match device.poll_status().unwrap() {
            Some(SerialEvent::Error(Pl2303Error::TransferFailed(_))) => {}
            other => panic!("expected error event, got {other:?}"),
        }

        // The data path is still usable afterwards
        mock.push_read(BULK_IN_EP, b"ok".to_vec());
        assert_eq!(device.read(16).unwrap(), b"ok");
    }

    #[test]
    fn test_poll_status_without_interrupt_endpoint() {
        let interface = InterfaceInfo {
            number: 0,
            class: PL2303_INTERFACE_CLASS,
            endpoints: vec![
                EndpointInfo {
                    address: 0x02,
                    kind: TransferKind::Bulk,
                    max_packet_size: 64,
                },
                EndpointInfo {
                    address: 0x83,
                    kind: TransferKind::Bulk,
                    max_packet_size: 64,
                },
            ],
        };
        let mock = MockTransport::with_interfaces(vec![interface]);
        let mut device = Pl2303::open(mock, Pl2303Config::default()).unwrap();
        assert!(matches!(
            device.poll_status(),
            Err(Pl2303Error::NoEndpoint {
                kind: TransferKind::Interrupt,
                direction: Direction::In,
            })
        ));
    }

    #[test]
    fn test_set_baud_rate_renegotiates() {
        let mock = MockTransport::new();
        let mut device = open_default(&mock);

        assert_eq!(device.set_baud_rate(115_200).unwrap(), 115_200);
        assert_eq!(
            mock.line_coding_bytes(),
            [0x00, 0xC2, 0x01, 0x00, 0x00, 0x00, 0x08]
        );

        // Quantized like open, and the actual rate is reported back
        assert_eq!(device.set_baud_rate(10_000).unwrap(), 9600);
        assert_eq!(device.line_coding().baud_rate, 9600);

        assert!(matches!(
            device.set_baud_rate(MAX_BAUD_RATE + 1),
            Err(Pl2303Error::UnsupportedBaudRate(_))
        ));
    }

    #[test]
    fn test_debug_format_elides_transport() {
        // MockTransport does not implement Debug; the session must
        // still be formattable so assertions can print it.
        let mock = MockTransport::new();
        let device = open_default(&mock);
        let formatted = format!("{device:?}");
        assert!(formatted.contains("Ready"), "formatted was {formatted}");
        assert!(formatted.contains("0x83"), "formatted was {formatted}");
    }

    #[test]
    fn test_drop_closes_session() {
        let mock = MockTransport::new();
        {
            let _device = open_default(&mock);
        }
        assert_eq!(mock.calls().last(), Some(&Call::Close));
    }
}
