//! Transport adapters: USB CCID and NFC ISO-DEP.

pub mod ccid;
pub mod nfc;
pub mod transport;
pub mod usb;

pub use nfc::{IsoDepLink, NfcTransport};
pub use transport::Transport;
pub use usb::UsbTransport;
