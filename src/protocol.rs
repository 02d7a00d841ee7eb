//! PL2303 protocol constants and types
//!
//! Covers the vendor register handshake, the CDC-style line-coding
//! structure and the interrupt status frame of the Prolific PL2303 family.
//! Register values are opaque magic defined by the chip; they carry no
//! structure beyond "read returns one byte, write carries none".

use bitflags::bitflags;

// USB device identifiers
pub const PL2303_USB_VENDOR: u16 = 0x067B;
pub const PL2303_USB_PRODUCT: u16 = 0x2303;

// Every PL2303 revision reports a vendor-specific interface
pub const PL2303_INTERFACE_CLASS: u8 = 0xFF;

// Classic endpoint layout shipped by the chips. Descriptor discovery is
// authoritative; these are defaults for mocks and odd clones.
pub const INTERRUPT_IN_EP: u8 = 0x81;
pub const BULK_OUT_EP: u8 = 0x02;
pub const BULK_IN_EP: u8 = 0x83;

// Control request codes
pub const VENDOR_READ_REQUEST: u8 = 0x01;
pub const VENDOR_WRITE_REQUEST: u8 = 0x01;
pub const GET_LINE_CODING_REQUEST: u8 = 0x21;
pub const SET_LINE_CODING_REQUEST: u8 = 0x20;

/// Size of the line-coding structure exchanged with the chip
pub const LINE_CODING_SIZE: usize = 7;

/// Interrupt frames are 10 bytes on every known chip revision
pub const STATUS_FRAME_SIZE: usize = 10;
/// Offset of the UART state byte within an interrupt frame
pub const STATUS_BYTE_INDEX: usize = 8;

/// Baud rate applied when the caller does not pick one
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Rates the chip's baud generator supports, ascending
pub const BAUD_RATES: [u32; 25] = [
    75, 150, 300, 600, 1200, 1800, 2400, 3600, 4800, 7200, 9600, 14400, 19200, 28800, 38400,
    57600, 115_200, 230_400, 460_800, 614_400, 921_600, 1_228_800, 2_457_600, 3_000_000,
    6_000_000,
];

/// Fastest rate the chip supports; requests above this are rejected
pub const MAX_BAUD_RATE: u32 = BAUD_RATES[BAUD_RATES.len() - 1];

/// Map a requested rate to the nearest supported one by absolute
/// distance. Ties go to the earlier table entry.
pub fn quantize_baud_rate(requested: u32) -> u32 {
    let mut best = BAUD_RATES[0];
    for &rate in &BAUD_RATES[1..] {
        if rate.abs_diff(requested) < best.abs_diff(requested) {
            best = rate;
        }
    }
    best
}

/// Stop-bit setting (the driver only ever programs one stop bit)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One = 0,
}

/// Parity setting (the driver only ever programs no parity)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None = 0,
}

/// Line coding negotiated with the chip.
///
/// Only the baud rate varies; stop bits, parity and data bits are fixed
/// at 1/none/8 in every configuration command this driver issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCoding {
    pub baud_rate: u32,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub data_bits: u8,
}

impl Default for LineCoding {
    fn default() -> Self {
        LineCoding {
            baud_rate: DEFAULT_BAUD_RATE,
            stop_bits: StopBits::One,
            parity: Parity::None,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    /// Overwrite a 7-byte line-coding buffer read back from the device.
    ///
    /// Bytes 0-3 take the baud rate as little-endian u32, byte 4 the stop
    /// bits, byte 5 the parity, byte 6 the data bits.
    pub fn apply_to(&self, buf: &mut [u8; LINE_CODING_SIZE]) {
        buf[0..4].copy_from_slice(&self.baud_rate.to_le_bytes());
        buf[4] = self.stop_bits as u8;
        buf[5] = self.parity as u8;
        buf[6] = self.data_bits;
    }
}

bitflags! {
    /// UART state bits carried in byte 8 of an interrupt frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UartStatus: u8 {
        const DCD = 0x01;
        const DSR = 0x02;
        const BREAK_ERROR = 0x04;
        const RING = 0x08;
        const FRAME_ERROR = 0x10;
        const PARITY_ERROR = 0x20;
        const OVERRUN_ERROR = 0x40;
        const CTS = 0x80;
    }
}

impl UartStatus {
    /// Decode the state byte from a full interrupt frame. Returns `None`
    /// for runt frames that do not reach the state byte.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        frame
            .get(STATUS_BYTE_INDEX)
            .map(|&b| UartStatus::from_bits_retain(b))
    }
}
