//! Mock USB transport
//!
//! A scripted, in-memory implementation of [`UsbTransport`] that emulates
//! the device side of the PL2303 protocol, from the line-coding register
//! down to queued bulk and interrupt payloads. Every operation is
//! recorded, so tests can replay the wire protocol call-for-call. Useful
//! for testing and development without real hardware.
//!
//! Clones share one device state: keep one handle for scripting and
//! inspection while the driver owns the other.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::error::{Pl2303Error, Result};
use crate::protocol::{
    BULK_IN_EP, BULK_OUT_EP, GET_LINE_CODING_REQUEST, INTERRUPT_IN_EP, LINE_CODING_SIZE,
    PL2303_INTERFACE_CLASS, SET_LINE_CODING_REQUEST,
};
use crate::transport::{
    ControlRequest, EndpointInfo, InterfaceInfo, RequestType, TransferKind, UsbTransport,
};

/// One recorded transport operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    SelectConfiguration(u8),
    ClaimInterface(u8),
    ControlIn { request: ControlRequest, length: u16 },
    ControlOut { request: ControlRequest, data: Vec<u8> },
    TransferIn { endpoint: u8, length: usize },
    TransferOut { endpoint: u8, data: Vec<u8> },
    Close,
}

struct MockState {
    calls: Vec<Call>,
    interfaces: Vec<InterfaceInfo>,
    line_coding: [u8; LINE_CODING_SIZE],
    reads: HashMap<u8, VecDeque<Vec<u8>>>,
    fail_at: Option<usize>,
    opened: bool,
    configuration: Option<u8>,
    claimed: Option<u8>,
}

/// Scripted transport double
#[derive(Clone)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

/// The interface layout every real PL2303 reports
fn classic_interface() -> InterfaceInfo {
    InterfaceInfo {
        number: 0,
        class: PL2303_INTERFACE_CLASS,
        endpoints: vec![
            EndpointInfo {
                address: INTERRUPT_IN_EP,
                kind: TransferKind::Interrupt,
                max_packet_size: 10,
            },
            EndpointInfo {
                address: BULK_OUT_EP,
                kind: TransferKind::Bulk,
                max_packet_size: 64,
            },
            EndpointInfo {
                address: BULK_IN_EP,
                kind: TransferKind::Bulk,
                max_packet_size: 64,
            },
        ],
    }
}

impl MockTransport {
    /// Mock with the classic PL2303 descriptor layout
    pub fn new() -> Self {
        Self::with_interfaces(vec![classic_interface()])
    }

    /// Mock with an arbitrary descriptor layout
    pub fn with_interfaces(interfaces: Vec<InterfaceInfo>) -> Self {
        MockTransport {
            state: Rc::new(RefCell::new(MockState {
                calls: Vec::new(),
                interfaces,
                line_coding: [0; LINE_CODING_SIZE],
                reads: HashMap::new(),
                fail_at: None,
                opened: false,
                configuration: None,
                claimed: None,
            })),
        }
    }

    /// Snapshot of every operation recorded so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Current content of the emulated line-coding register
    pub fn line_coding_bytes(&self) -> [u8; LINE_CODING_SIZE] {
        self.state.borrow().line_coding
    }

    /// Seed the emulated line-coding register
    pub fn set_line_coding_bytes(&self, bytes: [u8; LINE_CODING_SIZE]) {
        self.state.borrow_mut().line_coding = bytes;
    }

    /// Queue a payload that the next IN transfer on `endpoint` yields.
    /// An endpoint with nothing queued times out instead.
    pub fn push_read(&self, endpoint: u8, data: Vec<u8>) {
        self.state
            .borrow_mut()
            .reads
            .entry(endpoint)
            .or_default()
            .push_back(data);
    }

    /// Make the operation with index `n` (0-based, in recording order)
    /// fail with a transport fault after being recorded
    pub fn fail_call(&self, n: usize) {
        self.state.borrow_mut().fail_at = Some(n);
    }

    fn record(&self, call: Call) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let index = state.calls.len();
        state.calls.push(call);
        if state.fail_at == Some(index) {
            return Err(Pl2303Error::TransferFailed("injected fault".into()));
        }
        Ok(())
    }

    fn ensure_claimed(&self) -> Result<()> {
        let state = self.state.borrow();
        if !state.opened || state.claimed.is_none() {
            return Err(Pl2303Error::TransferFailed(
                "interface not claimed".into(),
            ));
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn open(&mut self) -> Result<()> {
        self.record(Call::Open)?;
        let mut state = self.state.borrow_mut();
        if state.opened {
            return Err(Pl2303Error::OpenFailed("already open".into()));
        }
        state.opened = true;
        Ok(())
    }

    fn select_configuration(&mut self, configuration: u8) -> Result<()> {
        self.record(Call::SelectConfiguration(configuration))?;
        let mut state = self.state.borrow_mut();
        if !state.opened {
            return Err(Pl2303Error::ConfigurationFailed("device not open".into()));
        }
        state.configuration = Some(configuration);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        self.record(Call::ClaimInterface(interface))?;
        let mut state = self.state.borrow_mut();
        if state.configuration.is_none() {
            return Err(Pl2303Error::ClaimFailed("no configuration selected".into()));
        }
        if !state.interfaces.iter().any(|i| i.number == interface) {
            return Err(Pl2303Error::ClaimFailed(format!("no interface {interface}")));
        }
        state.claimed = Some(interface);
        Ok(())
    }

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        let state = self.state.borrow();
        if !state.opened {
            return Err(Pl2303Error::TransferFailed("device not open".into()));
        }
        Ok(state.interfaces.clone())
    }

    fn control_in(&mut self, request: ControlRequest, length: u16) -> Result<Vec<u8>> {
        self.record(Call::ControlIn { request, length })?;
        self.ensure_claimed()?;
        let state = self.state.borrow();
        match (request.request_type, request.request) {
            (RequestType::Class, GET_LINE_CODING_REQUEST) => Ok(state.line_coding.to_vec()),
            (RequestType::Vendor, _) => Ok(vec![0; length as usize]),
            _ => Err(Pl2303Error::TransferFailed(format!(
                "unexpected control read {:#04x}",
                request.request
            ))),
        }
    }

    fn control_out(&mut self, request: ControlRequest, data: &[u8]) -> Result<()> {
        self.record(Call::ControlOut {
            request,
            data: data.to_vec(),
        })?;
        self.ensure_claimed()?;
        let mut state = self.state.borrow_mut();
        match (request.request_type, request.request) {
            (RequestType::Class, SET_LINE_CODING_REQUEST) => {
                if data.len() != LINE_CODING_SIZE {
                    return Err(Pl2303Error::TransferFailed(format!(
                        "line coding write of {} bytes",
                        data.len()
                    )));
                }
                state.line_coding.copy_from_slice(data);
                Ok(())
            }
            (RequestType::Vendor, _) => Ok(()),
            _ => Err(Pl2303Error::TransferFailed(format!(
                "unexpected control write {:#04x}",
                request.request
            ))),
        }
    }

    fn transfer_in(&mut self, endpoint: u8, length: usize) -> Result<Vec<u8>> {
        self.record(Call::TransferIn { endpoint, length })?;
        self.ensure_claimed()?;
        let mut state = self.state.borrow_mut();
        match state.reads.get_mut(&endpoint).and_then(|q| q.pop_front()) {
            Some(data) => Ok(data),
            None => Err(Pl2303Error::Timeout),
        }
    }

    fn transfer_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize> {
        self.record(Call::TransferOut {
            endpoint,
            data: data.to_vec(),
        })?;
        self.ensure_claimed()?;
        Ok(data.len())
    }

    fn close(&mut self) -> Result<()> {
        self.record(Call::Close)?;
        let mut state = self.state.borrow_mut();
        state.claimed = None;
        state.configuration = None;
        state.opened = false;
        Ok(())
    }
}
