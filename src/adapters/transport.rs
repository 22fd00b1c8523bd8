//! Uniform transport interface over USB-CCID and NFC ISO-DEP.
//!
//! A `Transport` moves opaque APDU bytes to the card and back; everything
//! above this trait is transport-agnostic. The platform layer picks the
//! concrete implementation and injects it into the connection.

use crate::infra::error::TokenResult;

/// Blocking byte-level access to a security token.
///
/// Implementations are single-threaded by construction: all methods take
/// `&mut self`, so concurrent use is an ownership violation rather than a
/// runtime race.
pub trait Transport {
    /// Establish the physical link and power the card application up.
    fn connect(&mut self) -> TokenResult<()>;

    /// Exchange one raw APDU, blocking until the card answers.
    ///
    /// # Errors
    ///
    /// Any transport failure surfaces as an I/O-class error and
    /// invalidates the current connection.
    fn send_and_receive(&mut self, data: &[u8]) -> TokenResult<Vec<u8>>;

    /// Tear the link down. Safe to call repeatedly; never fails.
    fn release(&mut self);

    fn is_connected(&self) -> bool;

    /// Whether the physical link persists between calls.
    ///
    /// True for USB, where the cable keeps the session alive; false for
    /// NFC, where the tag may leave the field between exchanges.
    fn allow_persistent_connection(&self) -> bool;
}
