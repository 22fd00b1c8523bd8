//! APDU command factory for the OpenPGP card application.
//!
//! Builds the concrete [`CommandApdu`] values the token operations are
//! composed from. Commands here are pure data; nothing is sent until a
//! connection transmits them.

use crate::domain::apdu::CommandApdu;
use crate::domain::types::{KeySlot, PinType};

/// AID of the OpenPGP card application (RID + PIX, without version and
/// serial).
pub const OPENPGP_AID: &[u8] = &[0xD2, 0x76, 0x00, 0x01, 0x24, 0x01];

/// ISO7816 / OpenPGP instruction codes.
mod ins {
    /// SELECT application.
    pub const SELECT: u8 = 0xA4;
    /// GET RESPONSE (fetch chained response data).
    pub const GET_RESPONSE: u8 = 0xC0;
    /// GET DATA (read data object).
    pub const GET_DATA: u8 = 0xCA;
    /// PUT DATA (write data object).
    pub const PUT_DATA: u8 = 0xDA;
    /// PUT DATA with odd INS (key import).
    pub const PUT_DATA_ODD: u8 = 0xDB;
    /// VERIFY PIN.
    pub const VERIFY: u8 = 0x20;
    /// CHANGE REFERENCE DATA (change PIN).
    pub const CHANGE_REFERENCE_DATA: u8 = 0x24;
    /// RESET RETRY COUNTER (unblock PW1).
    pub const RESET_RETRY_COUNTER: u8 = 0x2C;
    /// PERFORM SECURITY OPERATION (decipher / signature).
    pub const PERFORM_SECURITY_OPERATION: u8 = 0x2A;
    /// MANAGE SECURITY ENVIRONMENT (key routing).
    pub const MANAGE_SECURITY_ENVIRONMENT: u8 = 0x22;
    /// GENERATE ASYMMETRIC KEY PAIR.
    pub const GENERATE_ASYMMETRIC_KEY_PAIR: u8 = 0x47;
    /// TERMINATE DF (begin factory reset).
    pub const TERMINATE_DF: u8 = 0xE6;
    /// ACTIVATE FILE (finish factory reset).
    pub const ACTIVATE_FILE: u8 = 0x44;
}

/// Data-object tags addressed by GET/PUT DATA.
pub mod tags {
    /// Application related data (composite).
    pub const APPLICATION_RELATED_DATA: u16 = 0x006E;
    /// Extended header list (key import template).
    pub const EXTENDED_HEADER_LIST: u16 = 0x004D;
}

/// SELECT the OpenPGP application by AID.
pub fn select_openpgp() -> CommandApdu {
    CommandApdu::new(0x00, ins::SELECT, 0x04, 0x00, OPENPGP_AID)
}

/// GET DATA for a one- or two-byte tag.
pub fn get_data(tag: u16) -> CommandApdu {
    CommandApdu::new(
        0x00,
        ins::GET_DATA,
        (tag >> 8) as u8,
        (tag & 0xFF) as u8,
        vec![],
    )
    .with_expected_response_length(256)
}

/// GET RESPONSE with the given Le; used to drain `61xx` chains.
pub fn get_response(length: usize) -> CommandApdu {
    CommandApdu::new(0x00, ins::GET_RESPONSE, 0x00, 0x00, vec![])
        .with_expected_response_length(length)
}

/// VERIFY a PIN against the given password reference.
pub fn verify(pin_type: PinType, pin: &[u8]) -> CommandApdu {
    CommandApdu::new(0x00, ins::VERIFY, 0x00, pin_type.p2(), pin)
}

/// CHANGE REFERENCE DATA: old and new PIN concatenated.
///
/// The command only knows the two stored references, so both PW1
/// contexts map to `0x81`.
pub fn change_reference_data(pin_type: PinType, old_pin: &[u8], new_pin: &[u8]) -> CommandApdu {
    let p2 = if pin_type.is_admin() { 0x83 } else { 0x81 };
    let mut data = Vec::with_capacity(old_pin.len() + new_pin.len());
    data.extend_from_slice(old_pin);
    data.extend_from_slice(new_pin);
    CommandApdu::new(0x00, ins::CHANGE_REFERENCE_DATA, 0x00, p2, data)
}

/// RESET RETRY COUNTER: set a new PW1 after PW3 has been verified.
pub fn reset_retry_counter(new_pin: &[u8]) -> CommandApdu {
    CommandApdu::new(0x00, ins::RESET_RETRY_COUNTER, 0x02, 0x81, new_pin)
}

/// PUT DATA for a simple data object.
pub fn put_data(tag: u16, data: impl Into<Vec<u8>>) -> CommandApdu {
    CommandApdu::new(
        0x00,
        ins::PUT_DATA,
        (tag >> 8) as u8,
        (tag & 0xFF) as u8,
        data,
    )
}

/// PUT DATA (odd INS) carrying an extended-header-list key import
/// template.
pub fn put_key(template: impl Into<Vec<u8>>) -> CommandApdu {
    CommandApdu::new(0x00, ins::PUT_DATA_ODD, 0x3F, 0xFF, template)
}

/// GENERATE ASYMMETRIC KEY PAIR: create a new key in `slot`.
pub fn generate_key_pair(slot: KeySlot) -> CommandApdu {
    CommandApdu::new(
        0x00,
        ins::GENERATE_ASYMMETRIC_KEY_PAIR,
        0x80,
        0x00,
        slot.crt(),
    )
    .with_expected_response_length(256)
}

/// GENERATE ASYMMETRIC KEY PAIR in read mode: fetch the public key of
/// `slot` without touching the private part.
pub fn read_public_key(slot: KeySlot) -> CommandApdu {
    CommandApdu::new(
        0x00,
        ins::GENERATE_ASYMMETRIC_KEY_PAIR,
        0x81,
        0x00,
        slot.crt(),
    )
    .with_expected_response_length(256)
}

/// PSO:DECIPHER over a padded/framed cryptogram.
pub fn pso_decipher(data: impl Into<Vec<u8>>) -> CommandApdu {
    CommandApdu::new(0x00, ins::PERFORM_SECURITY_OPERATION, 0x80, 0x86, data)
        .with_expected_response_length(256)
}

/// PSO:COMPUTE DIGITAL SIGNATURE over a DSI/DigestInfo.
pub fn pso_compute_digital_signature(data: impl Into<Vec<u8>>) -> CommandApdu {
    CommandApdu::new(0x00, ins::PERFORM_SECURITY_OPERATION, 0x9E, 0x9A, data)
        .with_expected_response_length(256)
}

/// MSE:SET: route `key` into the decryption or authentication role.
pub fn mse_set(role: KeySlot, key: KeySlot) -> CommandApdu {
    let p2 = match role {
        KeySlot::Signature => 0xB6,
        KeySlot::Decryption => 0xB8,
        KeySlot::Authentication => 0xA4,
    };
    let key_reference = match key {
        KeySlot::Signature => 0x01,
        KeySlot::Decryption => 0x02,
        KeySlot::Authentication => 0x03,
    };
    CommandApdu::new(
        0x00,
        ins::MANAGE_SECURITY_ENVIRONMENT,
        0x41,
        p2,
        vec![0x83, 0x01, key_reference],
    )
}

/// TERMINATE DF; only accepted once PW1 and PW3 are blocked.
pub fn terminate_df() -> CommandApdu {
    CommandApdu::new(0x00, ins::TERMINATE_DF, 0x00, 0x00, vec![])
}

/// ACTIVATE FILE; re-initializes a terminated application.
pub fn activate_file() -> CommandApdu {
    CommandApdu::new(0x00, ins::ACTIVATE_FILE, 0x00, 0x00, vec![])
}
