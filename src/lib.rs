//! OpenPGP Security-Token Client
//!
//! A client library for OpenPGP smart cards reached over a direct USB
//! CCID transport or an NFC ISO-DEP tag. Key generation, PIN
//! verification, decryption, and signing all run on the token; private
//! key material never crosses the transport.
//!
//! The layering is strict: the [`adapters::ccid`] transceiver speaks the
//! USB CCID bulk protocol, [`adapters`] unify USB and NFC behind one
//! [`Transport`](adapters::Transport) trait, and
//! [`SecurityTokenConnection`] turns that into a blocking
//! `communicate(CommandApdu) -> ResponseApdu` primitive that the
//! [`ops`] use-cases compose.
//!
//! All calls block the current thread; run them off any UI thread and
//! serialize access to one connection.

pub mod adapters;
pub mod commands;
pub mod connection;
pub mod domain;
pub mod infra;
pub mod ops;

pub use adapters::{IsoDepLink, NfcTransport, Transport, UsbTransport};
pub use connection::SecurityTokenConnection;
pub use domain::{
    AlgorithmAttributes, CommandApdu, KeySlot, OpenPgpCapabilities, Pin, PinType, PwStatus,
    ResponseApdu,
};
pub use infra::{ConfigManager, TokenConfig, TokenError, TokenResult};
pub use ops::{RsaKeyParts, TokenOperations};
