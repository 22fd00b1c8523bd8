//! High-level token operations.
//!
//! Each operation is a short deterministic sequence of
//! [`SecurityTokenConnection::communicate`] calls. A non-success status
//! word at any step aborts the sequence and surfaces as a typed error;
//! nothing here retries beyond what the connection layer already does.

use crate::commands;
use crate::connection::SecurityTokenConnection;
use crate::domain::apdu::ResponseApdu;
use crate::domain::capabilities::AlgorithmAttributes;
use crate::domain::tlv::{self, TlvBuilder};
use crate::domain::types::{KeySlot, Pin, PinType};
use crate::infra::error::{TokenError, TokenResult};

/// RSA private key material in the card's import format (CRT form is not
/// used; the card derives what it needs from e, p, q).
pub struct RsaKeyParts {
    pub exponent: Vec<u8>,
    pub prime1: Vec<u8>,
    pub prime2: Vec<u8>,
}

/// Composed multi-step use-cases over one connection.
pub struct TokenOperations {
    connection: SecurityTokenConnection,
}

impl TokenOperations {
    pub fn new(connection: SecurityTokenConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &SecurityTokenConnection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut SecurityTokenConnection {
        &mut self.connection
    }

    pub fn into_connection(self) -> SecurityTokenConnection {
        self.connection
    }

    /// Sign a DigestInfo with the signature key.
    ///
    /// Verifies PW1 in signing context, then runs PSO:COMPUTE DIGITAL
    /// SIGNATURE. On cards where PW1 is consumed per signature, the
    /// cached verification is dropped afterwards.
    ///
    /// # Errors
    ///
    /// Rejected before any APDU when the card has no signature key.
    pub fn sign_digest(&mut self, pin: &Pin, digest_info: &[u8]) -> TokenResult<Vec<u8>> {
        if self
            .connection
            .capabilities()?
            .algorithm_for(KeySlot::Signature)
            .is_none()
        {
            return Err(TokenError::UnsupportedByCard(
                "no signature key on this card".to_string(),
            ));
        }

        self.connection.verify_pin(PinType::Pw1Signature, pin)?;

        let response = self
            .connection
            .communicate(&commands::pso_compute_digital_signature(digest_info))?;

        if !self.connection.capabilities()?.pw_status().pw1_valid_multiple {
            self.connection
                .set_pin_validated(PinType::Pw1Signature, false);
        }

        let signature = Self::expect_success(response, "PSO:COMPUTE DIGITAL SIGNATURE")?;
        log::info!("created signature, {} bytes", signature.len());
        Ok(signature)
    }

    /// Decrypt an encrypted session key with the decryption key.
    ///
    /// The cryptogram framing follows the decryption slot's algorithm:
    /// RSA gets the `00` padding-indicator byte, ECDH wraps the ephemeral
    /// public point in a cipher DO (`A6` / `7F49` / `86`). Non-RSA
    /// algorithms are routed through MSE:SET first on cards that support
    /// it.
    pub fn decrypt_session_key(&mut self, pin: &Pin, cryptogram: &[u8]) -> TokenResult<Vec<u8>> {
        let algorithm = self
            .connection
            .capabilities()?
            .algorithm_for(KeySlot::Decryption)
            .cloned()
            .ok_or_else(|| {
                TokenError::UnsupportedByCard("no decryption key on this card".to_string())
            })?;

        let payload = match &algorithm {
            AlgorithmAttributes::Rsa { .. } => {
                let mut padded = Vec::with_capacity(cryptogram.len() + 1);
                padded.push(0x00);
                padded.extend_from_slice(cryptogram);
                padded
            }
            AlgorithmAttributes::Ecdh { .. } => TlvBuilder::new()
                .add(0x86, cryptogram)
                .wrap(0x7F49)
                .wrap(0xA6)
                .build(),
            other => {
                return Err(TokenError::UnsupportedByCard(format!(
                    "decryption key has non-decryption algorithm {other:?}"
                )));
            }
        };

        self.connection.verify_pin(PinType::Pw1, pin)?;

        if !algorithm.is_rsa() && self.connection.capabilities()?.supports_mse() {
            let response = self
                .connection
                .communicate(&commands::mse_set(KeySlot::Decryption, KeySlot::Decryption))?;
            Self::expect_success(response, "MSE:SET")?;
        }

        let response = self.connection.communicate(&commands::pso_decipher(payload))?;
        let session_key = Self::expect_success(response, "PSO:DECIPHER")?;
        log::info!("deciphered session key, {} bytes", session_key.len());
        Ok(session_key)
    }

    /// Change PW1 or PW3 via CHANGE REFERENCE DATA.
    ///
    /// The card re-locks the reference afterwards, so the cached
    /// verification state is dropped.
    pub fn change_pin(&mut self, pin_type: PinType, old_pin: &Pin, new_pin: &Pin) -> TokenResult<()> {
        new_pin.validate_for(pin_type)?;

        let response = self.connection.communicate(&commands::change_reference_data(
            pin_type,
            old_pin.as_bytes(),
            new_pin.as_bytes(),
        ))?;
        Self::expect_success(response, "CHANGE REFERENCE DATA")?;

        if pin_type.is_admin() {
            self.connection.set_pin_validated(PinType::Pw3, false);
        } else {
            self.connection.set_pin_validated(PinType::Pw1Signature, false);
            self.connection.set_pin_validated(PinType::Pw1, false);
        }

        log::info!("{pin_type} changed");
        Ok(())
    }

    /// Unblock PW1 by setting a new value, after PW3 verification.
    pub fn reset_pin_retry_counter(&mut self, admin_pin: &Pin, new_pin: &Pin) -> TokenResult<()> {
        new_pin.validate_for(PinType::Pw1)?;
        self.connection.verify_pin(PinType::Pw3, admin_pin)?;

        let response = self
            .connection
            .communicate(&commands::reset_retry_counter(new_pin.as_bytes()))?;
        Self::expect_success(response, "RESET RETRY COUNTER")?;

        log::info!("PW1 reset");
        Ok(())
    }

    /// Wipe the card back to factory state.
    ///
    /// Blocks PW1 and PW3 by exhausting their retry counters with a
    /// deliberately wrong PIN, then terminates and re-activates the
    /// application. Capabilities are refreshed from the re-initialized
    /// card before returning.
    pub fn factory_reset(&mut self) -> TokenResult<()> {
        log::warn!("factory reset: wiping all keys and PINs");

        self.block_pin(PinType::Pw1)?;
        self.block_pin(PinType::Pw3)?;

        let response = self.connection.communicate(&commands::terminate_df())?;
        Self::expect_success(response, "TERMINATE DF")?;

        let response = self.connection.communicate(&commands::activate_file())?;
        Self::expect_success(response, "ACTIVATE FILE")?;

        self.connection.reset_pin_state();
        self.connection.refresh_capabilities()?;

        log::info!("card re-initialized");
        Ok(())
    }

    /// Exhaust one PIN's retry counter with an invalid value.
    fn block_pin(&mut self, pin_type: PinType) -> TokenResult<()> {
        // Retry counters default to 3; one spare attempt covers cards
        // configured higher before the loop gives up.
        let wrong_pin = [0xFF; 8];
        for _ in 0..4 {
            let response = self
                .connection
                .communicate(&commands::verify(pin_type, &wrong_pin))?;

            if response.is_success() {
                // The counter is not advancing; abort instead of looping.
                return Err(TokenError::CardStatus {
                    status_word: response.status_word(),
                    context: format!("VERIFY with invalid PIN succeeded while blocking {pin_type}"),
                });
            }

            match response.pin_tries_remaining() {
                Some(0) => return Ok(()),
                Some(tries) => log::debug!("blocking {pin_type}: {tries} tries remaining"),
                None if response.status_word() == 0x6983 => return Ok(()),
                None => {
                    return Err(TokenError::from_status_word(
                        response.status_word(),
                        "VERIFY while blocking",
                    ));
                }
            }
        }

        Err(TokenError::CardStatus {
            status_word: 0x63C0,
            context: format!("{pin_type} did not block after four attempts"),
        })
    }

    /// Import an RSA private key into `slot`.
    ///
    /// Requires PW3. The key travels as an extended header list (`4D`):
    /// the slot's CRT, the `7F48` component-length template, and the
    /// concatenated `e || p || q` data under `5F48`.
    pub fn import_rsa_key(
        &mut self,
        admin_pin: &Pin,
        slot: KeySlot,
        key: &RsaKeyParts,
    ) -> TokenResult<()> {
        let caps = self.connection.capabilities()?;
        if !caps.supports_key_import() {
            return Err(TokenError::UnsupportedByCard(
                "key import is not available".to_string(),
            ));
        }
        match caps.algorithm_for(slot) {
            Some(a) if a.is_rsa() => {}
            Some(other) => {
                return Err(TokenError::UnsupportedByCard(format!(
                    "{slot} slot is configured for {other:?}, not RSA"
                )));
            }
            None => {
                return Err(TokenError::UnsupportedByCard(format!(
                    "{slot} slot reports no algorithm attributes"
                )));
            }
        }

        self.connection.verify_pin(PinType::Pw3, admin_pin)?;

        let mut lengths = Vec::new();
        lengths.push(0x91);
        lengths.extend(tlv::encode_length(key.exponent.len()));
        lengths.push(0x92);
        lengths.extend(tlv::encode_length(key.prime1.len()));
        lengths.push(0x93);
        lengths.extend(tlv::encode_length(key.prime2.len()));

        let mut key_data =
            Vec::with_capacity(key.exponent.len() + key.prime1.len() + key.prime2.len());
        key_data.extend_from_slice(&key.exponent);
        key_data.extend_from_slice(&key.prime1);
        key_data.extend_from_slice(&key.prime2);

        let template = TlvBuilder::new()
            .add_raw(slot.crt())
            .add(0x7F48, &lengths)
            .add(0x5F48, &key_data)
            .wrap(commands::tags::EXTENDED_HEADER_LIST)
            .build();

        let response = self.connection.communicate(&commands::put_key(template))?;
        Self::expect_success(response, "PUT DATA key import")?;

        log::info!("imported RSA key into the {slot} slot");
        Ok(())
    }

    /// Store the OpenPGP fingerprint for `slot` after an import.
    pub fn put_fingerprint(
        &mut self,
        admin_pin: &Pin,
        slot: KeySlot,
        fingerprint: &[u8; 20],
    ) -> TokenResult<()> {
        self.connection.verify_pin(PinType::Pw3, admin_pin)?;
        let response = self
            .connection
            .communicate(&commands::put_data(slot.fingerprint_tag(), fingerprint.to_vec()))?;
        Self::expect_success(response, "PUT DATA fingerprint")?;
        Ok(())
    }

    /// Generate a new key pair in `slot` on the card.
    ///
    /// Returns the public key template (`7F49`) for fingerprint
    /// computation by the caller. Capabilities are refreshed since key
    /// material changed.
    pub fn generate_key(&mut self, admin_pin: &Pin, slot: KeySlot) -> TokenResult<Vec<u8>> {
        self.connection.verify_pin(PinType::Pw3, admin_pin)?;

        let response = self
            .connection
            .communicate(&commands::generate_key_pair(slot))?;
        let public_key = Self::expect_success(response, "GENERATE ASYMMETRIC KEY PAIR")?;

        self.connection.refresh_capabilities()?;

        log::info!(
            "generated key in the {slot} slot, public template {} bytes",
            public_key.len()
        );
        Ok(public_key)
    }

    /// Read the public key template of `slot` without PIN verification.
    pub fn read_public_key(&mut self, slot: KeySlot) -> TokenResult<Vec<u8>> {
        let response = self
            .connection
            .communicate(&commands::read_public_key(slot))?;
        Self::expect_success(response, "read public key")
    }

    fn expect_success(response: ResponseApdu, operation: &str) -> TokenResult<Vec<u8>> {
        if response.is_success() {
            Ok(response.into_data())
        } else {
            Err(TokenError::from_status_word(
                response.status_word(),
                operation,
            ))
        }
    }
}
