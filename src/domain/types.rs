//! Type-safe wrappers using new-type pattern
//!
//! Validated value types for PINs and key slots, preventing malformed
//! inputs from reaching the card.

use std::fmt;

use crate::infra::error::{TokenError, TokenResult};

/// Password references on the OpenPGP application.
///
/// PW1 has two access contexts with distinct VERIFY parameters: `0x81`
/// unlocks signing (PSO:CDS), `0x82` unlocks everything else PW1 guards.
/// PW3 (`0x83`) is the admin PIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinType {
    /// PW1 in signing context (VERIFY P2 = 0x81).
    Pw1Signature,
    /// PW1 in general context (VERIFY P2 = 0x82).
    Pw1,
    /// PW3, the admin PIN (VERIFY P2 = 0x83).
    Pw3,
}

impl PinType {
    /// The P2 reference byte used with VERIFY and CHANGE REFERENCE DATA.
    pub fn p2(self) -> u8 {
        match self {
            PinType::Pw1Signature => 0x81,
            PinType::Pw1 => 0x82,
            PinType::Pw3 => 0x83,
        }
    }

    /// Minimum PIN length the card enforces for this reference.
    pub fn min_length(self) -> usize {
        match self {
            PinType::Pw1Signature | PinType::Pw1 => 6,
            PinType::Pw3 => 8,
        }
    }

    /// Whether this reference is an admin (PW3) reference.
    pub fn is_admin(self) -> bool {
        matches!(self, PinType::Pw3)
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinType::Pw1Signature => write!(f, "PW1 (signature)"),
            PinType::Pw1 => write!(f, "PW1"),
            PinType::Pw3 => write!(f, "PW3"),
        }
    }
}

/// Type-safe wrapper for card PINs
#[derive(Clone)]
pub struct Pin(Vec<u8>);

impl Pin {
    /// Create a new Pin after validation
    pub fn new(pin: impl AsRef<[u8]>) -> TokenResult<Self> {
        let pin = pin.as_ref();
        Self::validate_pin(pin)?;
        Ok(Pin(pin.to_vec()))
    }

    /// Get the PIN bytes for the VERIFY data field
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check this PIN against the length floor of a password reference.
    pub fn validate_for(&self, pin_type: PinType) -> TokenResult<()> {
        if self.0.len() < pin_type.min_length() {
            return Err(TokenError::ValidationError(format!(
                "{pin_type} requires at least {} characters, got {}",
                pin_type.min_length(),
                self.0.len()
            )));
        }
        Ok(())
    }

    /// Validate basic PIN format
    fn validate_pin(pin: &[u8]) -> TokenResult<()> {
        if pin.len() < 4 {
            return Err(TokenError::ValidationError(format!(
                "PIN too short: {} characters (minimum 4)",
                pin.len()
            )));
        }

        // The card caps PIN length at 127 bytes in the PW status bytes.
        if pin.len() > 127 {
            return Err(TokenError::ValidationError(format!(
                "PIN too long: {} characters (maximum 127)",
                pin.len()
            )));
        }

        if pin.iter().any(|&b| b < 0x20 || b == 0x7F) {
            return Err(TokenError::ValidationError(
                "PIN must not contain control characters".to_string(),
            ));
        }

        Ok(())
    }
}

// PINs never appear in logs or panic messages.
impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin(<{} bytes>)", self.0.len())
    }
}

/// The three key slots of the OpenPGP application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    Signature,
    Decryption,
    Authentication,
}

impl KeySlot {
    /// Control reference template naming this slot in MSE, GENERATE
    /// ASYMMETRIC KEY PAIR, and key import.
    pub fn crt(self) -> &'static [u8] {
        match self {
            KeySlot::Signature => &[0xB6, 0x00],
            KeySlot::Decryption => &[0xB8, 0x00],
            KeySlot::Authentication => &[0xA4, 0x00],
        }
    }

    /// CRT tag byte alone, as used inside the 4D key import template.
    pub fn crt_tag(self) -> u16 {
        match self {
            KeySlot::Signature => 0xB6,
            KeySlot::Decryption => 0xB8,
            KeySlot::Authentication => 0xA4,
        }
    }

    /// Tag of the algorithm-attributes DO describing this slot (C1/C2/C3).
    pub fn algorithm_attributes_tag(self) -> u16 {
        match self {
            KeySlot::Signature => 0xC1,
            KeySlot::Decryption => 0xC2,
            KeySlot::Authentication => 0xC3,
        }
    }

    /// Tag of the fingerprint DO for this slot (C7/C8/C9).
    pub fn fingerprint_tag(self) -> u16 {
        match self {
            KeySlot::Signature => 0xC7,
            KeySlot::Decryption => 0xC8,
            KeySlot::Authentication => 0xC9,
        }
    }

    /// Tag of the generation-timestamp DO for this slot (CE/CF/D0).
    pub fn timestamp_tag(self) -> u16 {
        match self {
            KeySlot::Signature => 0xCE,
            KeySlot::Decryption => 0xCF,
            KeySlot::Authentication => 0xD0,
        }
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySlot::Signature => write!(f, "signature"),
            KeySlot::Decryption => write!(f, "decryption"),
            KeySlot::Authentication => write!(f, "authentication"),
        }
    }
}
