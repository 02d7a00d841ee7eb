//! pl2303 - Prolific PL2303 USB-to-serial bridge driver
//!
//! This crate implements the vendor protocol of the PL2303 family in
//! user space, on top of a pluggable USB transport. Opening a device
//! runs the whole bring-up, from USB configuration selection through
//! the undocumented wake-up handshake to line-coding negotiation.
//! After that the device behaves like a plain serial port: bulk data
//! transfers plus modem status polling.
//!
//! # Transports
//!
//! - [`NusbTransport`]: real hardware through the OS USB stack (`std`)
//! - [`MockTransport`]: scripted device emulation for tests (`std`)
//! - Any other [`UsbTransport`] implementation, e.g. WebUSB on wasm
//!
//! With `--no-default-features` the crate is `no_std` (requiring
//! `alloc`) and all device methods become `async`.
//!
//! # Example
//!
//! ```no_run
//! use pl2303::{NusbTransport, Pl2303, Pl2303Config};
//!
//! let transport = NusbTransport::first()?;
//! let mut port = Pl2303::open(transport, Pl2303Config::default())?;
//!
//! port.send(b"AT\r\n")?;
//! let reply = port.read(64)?;
//! println!("{} bytes: {:02X?}", reply.len(), reply);
//!
//! port.close()?;
//! # Ok::<(), pl2303::Pl2303Error>(())
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod device;
pub mod error;
pub mod protocol;
pub mod transport;

#[cfg(feature = "std")]
pub mod mock;
#[cfg(feature = "std")]
pub mod native;

// Re-exports
pub use device::{Pl2303, Pl2303Config, SerialEvent, State};
pub use error::{Pl2303Error, Result};
pub use protocol::{
    LineCoding, Parity, StopBits, UartStatus, BAUD_RATES, DEFAULT_BAUD_RATE, MAX_BAUD_RATE,
};
pub use transport::{
    ControlRequest, Direction, EndpointInfo, InterfaceInfo, Recipient, RequestType, TransferKind,
    UsbTransport,
};

#[cfg(feature = "std")]
pub use mock::MockTransport;
#[cfg(feature = "std")]
pub use native::{NusbTransport, Pl2303DeviceInfo};

/// Open the first PL2303 on the bus with default settings
#[cfg(feature = "std")]
pub fn open_first() -> Result<Pl2303<NusbTransport>> {
    let transport = NusbTransport::first()?;
    Pl2303::open(transport, Pl2303Config::default())
}

/// Open the first PL2303 on the bus at the given baud rate
///
/// The rate is quantized to the nearest supported value; query the
/// result through [`Pl2303::line_coding`].
#[cfg(feature = "std")]
pub fn open_with_baud(baud_rate: u32) -> Result<Pl2303<NusbTransport>> {
    let transport = NusbTransport::first()?;
    let config = Pl2303Config {
        line_coding: protocol::LineCoding {
            baud_rate,
            ..Default::default()
        },
        ..Default::default()
    };
    Pl2303::open(transport, config)
}
