//! Parsed card capabilities from the application-related data DO.
//!
//! The OpenPGP application publishes everything a client needs to gate
//! operations under one composite DO (tag `6E`): the AID with version and
//! serial, historical bytes, extended capabilities (`C0`), per-slot
//! algorithm attributes (`C1`–`C3`), and the PW status bytes (`C4`).
//! Version 3 cards additionally publish extended-length info (`7F66`).
//!
//! Parsed once at connect time, cached by the connection, and refreshed
//! explicitly after operations that can change the card's feature set.

use crate::domain::tlv::{self, Tlv};
use crate::domain::types::KeySlot;
use crate::infra::error::{TokenError, TokenResult};

/// Algorithm identifiers used in algorithm-attribute DOs.
mod algo {
    pub const RSA: u8 = 1;
    pub const ECDH: u8 = 18;
    pub const ECDSA: u8 = 19;
    pub const EDDSA: u8 = 22;
}

/// Algorithm attributes of one key slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmAttributes {
    Rsa {
        modulus_bits: u16,
        exponent_bits: u16,
        import_format: u8,
    },
    Ecdh {
        curve_oid: Vec<u8>,
    },
    Ecdsa {
        curve_oid: Vec<u8>,
    },
    Eddsa {
        curve_oid: Vec<u8>,
    },
    Unknown {
        algorithm_id: u8,
    },
}

impl AlgorithmAttributes {
    /// Parse one C1/C2/C3 value.
    pub fn parse(data: &[u8]) -> TokenResult<Self> {
        let id = *data.first().ok_or_else(|| {
            TokenError::ResponseDecodeError("empty algorithm attributes".to_string())
        })?;

        match id {
            algo::RSA => {
                if data.len() < 6 {
                    return Err(TokenError::ResponseDecodeError(format!(
                        "RSA algorithm attributes too short: {} bytes",
                        data.len()
                    )));
                }
                Ok(AlgorithmAttributes::Rsa {
                    modulus_bits: u16::from_be_bytes([data[1], data[2]]),
                    exponent_bits: u16::from_be_bytes([data[3], data[4]]),
                    import_format: data[5],
                })
            }
            algo::ECDH => Ok(AlgorithmAttributes::Ecdh {
                curve_oid: data[1..].to_vec(),
            }),
            algo::ECDSA => Ok(AlgorithmAttributes::Ecdsa {
                curve_oid: data[1..].to_vec(),
            }),
            algo::EDDSA => Ok(AlgorithmAttributes::Eddsa {
                curve_oid: data[1..].to_vec(),
            }),
            other => Ok(AlgorithmAttributes::Unknown { algorithm_id: other }),
        }
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, AlgorithmAttributes::Rsa { .. })
    }
}

/// PW status bytes (DO `C4`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PwStatus {
    /// PW1 stays valid for multiple PSO:CDS commands when nonzero.
    pub pw1_valid_multiple: bool,
    pub pw1_max_length: u8,
    pub reset_code_max_length: u8,
    pub pw3_max_length: u8,
    pub pw1_tries_remaining: u8,
    pub reset_code_tries_remaining: u8,
    pub pw3_tries_remaining: u8,
}

impl PwStatus {
    fn parse(data: &[u8]) -> TokenResult<Self> {
        if data.len() < 7 {
            return Err(TokenError::ResponseDecodeError(format!(
                "PW status bytes too short: {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            pw1_valid_multiple: data[0] != 0,
            pw1_max_length: data[1],
            reset_code_max_length: data[2],
            pw3_max_length: data[3],
            pw1_tries_remaining: data[4],
            reset_code_tries_remaining: data[5],
            pw3_tries_remaining: data[6],
        })
    }
}

/// Everything the client caches about the connected card.
#[derive(Debug, Clone)]
pub struct OpenPgpCapabilities {
    aid: Vec<u8>,
    version_major: u8,
    version_minor: u8,
    manufacturer: u16,
    serial_number: u32,
    has_extended_length: bool,
    max_command_bytes: usize,
    max_response_bytes: usize,
    supports_key_import: bool,
    supports_get_challenge: bool,
    supports_algorithm_change: bool,
    supports_mse: bool,
    pw_status: PwStatus,
    sign_algorithm: Option<AlgorithmAttributes>,
    decrypt_algorithm: Option<AlgorithmAttributes>,
    auth_algorithm: Option<AlgorithmAttributes>,
}

impl OpenPgpCapabilities {
    /// Parse the application-related data returned by GET DATA `6E`.
    ///
    /// Tolerates cards that return the contents without the outer `6E`
    /// wrapper, and cards that flatten the `73` discretionary objects.
    ///
    /// # Errors
    ///
    /// Fails when the TLV structure is malformed or the mandatory AID is
    /// missing.
    pub fn parse(data: &[u8]) -> TokenResult<Self> {
        let top = tlv::read_all(data)?;
        let inner = match tlv::find(&top, 0x6E) {
            Some(wrapper) => tlv::read_all(&wrapper.value)?,
            None => top,
        };

        // Discretionary objects may sit under 73 or directly at this level.
        let mut objects: Vec<Tlv> = Vec::new();
        for t in &inner {
            if t.tag == 0x73 {
                objects.extend(tlv::read_all(&t.value)?);
            } else {
                objects.push(t.clone());
            }
        }

        let aid = tlv::find(&objects, 0x4F)
            .map(|t| t.value.clone())
            .ok_or_else(|| {
                TokenError::ResponseDecodeError(
                    "application related data carries no AID".to_string(),
                )
            })?;
        if aid.len() < 14 {
            return Err(TokenError::ResponseDecodeError(format!(
                "AID too short: {} bytes",
                aid.len()
            )));
        }

        let version_major = aid[6];
        let version_minor = aid[7];
        let manufacturer = u16::from_be_bytes([aid[8], aid[9]]);
        let serial_number = u32::from_be_bytes([aid[10], aid[11], aid[12], aid[13]]);

        let has_extended_length = tlv::find(&objects, 0x5F52)
            .map(|t| historical_bytes_support_extended_length(&t.value))
            .unwrap_or(false);

        let mut caps = Self {
            aid,
            version_major,
            version_minor,
            manufacturer,
            serial_number,
            has_extended_length,
            max_command_bytes: 255,
            max_response_bytes: 256,
            supports_key_import: false,
            supports_get_challenge: false,
            supports_algorithm_change: false,
            supports_mse: false,
            pw_status: PwStatus::default(),
            sign_algorithm: None,
            decrypt_algorithm: None,
            auth_algorithm: None,
        };

        if let Some(c0) = tlv::find(&objects, 0xC0) {
            caps.apply_extended_capabilities(&c0.value);
        }

        // Version 3 cards publish APDU size limits in extended length info.
        if let Some(eli) = tlv::find(&objects, 0x7F66) {
            let sizes = tlv::read_all(&eli.value)?;
            let mut values = sizes
                .iter()
                .filter(|t| t.tag == 0x02 && t.value.len() >= 2)
                .map(|t| usize::from(u16::from_be_bytes([t.value[0], t.value[1]])));
            if let Some(max_cmd) = values.next() {
                caps.max_command_bytes = max_cmd;
            }
            if let Some(max_rsp) = values.next() {
                caps.max_response_bytes = max_rsp;
            }
        } else if caps.has_extended_length {
            // Extended length advertised without explicit limits; assume
            // the extended-form maximums.
            caps.max_command_bytes = 65535;
            caps.max_response_bytes = 65536;
        }

        if let Some(c4) = tlv::find(&objects, 0xC4) {
            caps.pw_status = PwStatus::parse(&c4.value)?;
        }

        caps.sign_algorithm = tlv::find(&objects, 0xC1)
            .map(|t| AlgorithmAttributes::parse(&t.value))
            .transpose()?;
        caps.decrypt_algorithm = tlv::find(&objects, 0xC2)
            .map(|t| AlgorithmAttributes::parse(&t.value))
            .transpose()?;
        caps.auth_algorithm = tlv::find(&objects, 0xC3)
            .map(|t| AlgorithmAttributes::parse(&t.value))
            .transpose()?;

        Ok(caps)
    }

    fn apply_extended_capabilities(&mut self, c0: &[u8]) {
        let Some(&flags) = c0.first() else {
            return;
        };
        self.supports_get_challenge = flags & 0x40 != 0;
        self.supports_key_import = flags & 0x20 != 0;
        self.supports_algorithm_change = flags & 0x04 != 0;
        // Byte 9 reports MSE command support on v3 cards.
        self.supports_mse = c0.get(9).copied().unwrap_or(0) != 0;
    }

    pub fn aid(&self) -> &[u8] {
        &self.aid
    }

    /// Application version, BCD-coded in the AID (e.g. 3.4).
    pub fn version(&self) -> (u8, u8) {
        (self.version_major, self.version_minor)
    }

    pub fn manufacturer(&self) -> u16 {
        self.manufacturer
    }

    pub fn serial_number(&self) -> u32 {
        self.serial_number
    }

    pub fn has_extended_length(&self) -> bool {
        self.has_extended_length
    }

    /// Largest command data field the card accepts.
    pub fn max_command_bytes(&self) -> usize {
        self.max_command_bytes
    }

    /// Largest response the card produces in one logical reply.
    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    pub fn supports_key_import(&self) -> bool {
        self.supports_key_import
    }

    pub fn supports_get_challenge(&self) -> bool {
        self.supports_get_challenge
    }

    pub fn supports_algorithm_change(&self) -> bool {
        self.supports_algorithm_change
    }

    pub fn supports_mse(&self) -> bool {
        self.supports_mse
    }

    pub fn pw_status(&self) -> &PwStatus {
        &self.pw_status
    }

    pub fn algorithm_for(&self, slot: KeySlot) -> Option<&AlgorithmAttributes> {
        match slot {
            KeySlot::Signature => self.sign_algorithm.as_ref(),
            KeySlot::Decryption => self.decrypt_algorithm.as_ref(),
            KeySlot::Authentication => self.auth_algorithm.as_ref(),
        }
    }
}

/// Extended-length support lives in the card-capabilities compact-TLV of
/// the historical bytes: tag 7, third byte, bit 0x40.
fn historical_bytes_support_extended_length(historical: &[u8]) -> bool {
    // Category indicator other than 0x00 means no compact-TLV follows.
    if historical.first() != Some(&0x00) {
        return false;
    }

    // The last three bytes are the status indicator, not compact-TLV.
    let end = historical.len().saturating_sub(3).max(1);
    let mut pos = 1;
    while pos < end {
        let tag = historical[pos] >> 4;
        let len = usize::from(historical[pos] & 0x0F);
        pos += 1;
        if pos + len > historical.len() {
            break;
        }
        if tag == 7 && len >= 3 {
            return historical[pos + 2] & 0x40 != 0;
        }
        pos += len;
    }
    false
}
