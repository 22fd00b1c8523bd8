//! NFC transport over an ISO-DEP (ISO14443-4) tag.
//!
//! The platform layer owns tag discovery and hands this transport an
//! [`IsoDepLink`]; framing and chaining happen in the platform's ISO-DEP
//! driver, so one exchange here is one `transceive` call.

use std::time::Duration;

use crate::adapters::transport::Transport;
use crate::infra::config::TokenConfig;
use crate::infra::error::{TokenError, TokenResult};

/// ISO-DEP tag handle supplied by the platform layer.
pub trait IsoDepLink {
    /// Establish the ISO-DEP link.
    ///
    /// The timeout must cover on-card asymmetric crypto, which can run
    /// for tens of seconds on RSA-4096 tags.
    fn connect(&mut self, timeout: Duration) -> TokenResult<()>;

    /// Exchange one APDU with the tag.
    fn transceive(&mut self, data: &[u8]) -> TokenResult<Vec<u8>>;

    /// Close the link. Never fails.
    fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Transport over an NFC ISO-DEP tag.
pub struct NfcTransport {
    link: Box<dyn IsoDepLink>,
    connect_timeout: Duration,
}

impl NfcTransport {
    pub fn new(link: Box<dyn IsoDepLink>) -> Self {
        Self {
            link,
            connect_timeout: Duration::from_secs(TokenConfig::default().nfc_timeout_seconds),
        }
    }

    /// Apply the configured connect timeout.
    pub fn with_config(mut self, config: &TokenConfig) -> Self {
        self.connect_timeout = Duration::from_secs(config.nfc_timeout_seconds);
        self
    }
}

impl Transport for NfcTransport {
    fn connect(&mut self) -> TokenResult<()> {
        self.link.connect(self.connect_timeout)?;
        log::info!("NFC transport connected (ISO-DEP)");
        Ok(())
    }

    fn send_and_receive(&mut self, data: &[u8]) -> TokenResult<Vec<u8>> {
        if !self.link.is_connected() {
            return Err(TokenError::NfcError("tag left the field".to_string()));
        }
        self.link.transceive(data)
    }

    fn release(&mut self) {
        self.link.close();
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// The tag may be removed between calls; sessions must not assume the
    /// link outlives one exchange.
    fn allow_persistent_connection(&self) -> bool {
        false
    }
}
