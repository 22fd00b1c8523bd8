//! Session-level orchestration above a [`Transport`].
//!
//! A `SecurityTokenConnection` owns one transport for the lifetime of a
//! session (device attach to detach). It selects the OpenPGP application,
//! caches the card's capabilities, tracks PIN verification state, and
//! exposes the single [`communicate`](SecurityTokenConnection::communicate)
//! primitive everything above it is built on.
//!
//! Commands run strictly one at a time; the `&mut self` receivers encode
//! the half-duplex protocol in the type system.

use crate::adapters::transport::Transport;
use crate::commands::{self, tags};
use crate::domain::apdu::{CommandApdu, ResponseApdu};
use crate::domain::capabilities::OpenPgpCapabilities;
use crate::domain::types::{Pin, PinType};
use crate::infra::error::{TokenError, TokenResult};

pub struct SecurityTokenConnection {
    transport: Box<dyn Transport>,
    capabilities: Option<OpenPgpCapabilities>,
    pw1_validated_signature: bool,
    pw1_validated: bool,
    pw3_validated: bool,
}

impl std::fmt::Debug for SecurityTokenConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityTokenConnection")
            .field("capabilities", &self.capabilities)
            .field("pw1_validated_signature", &self.pw1_validated_signature)
            .field("pw1_validated", &self.pw1_validated)
            .field("pw3_validated", &self.pw3_validated)
            .finish_non_exhaustive()
    }
}

impl SecurityTokenConnection {
    /// Connect the transport, select the OpenPGP application, and read
    /// the card's capabilities.
    ///
    /// # Errors
    ///
    /// Fails when the transport cannot connect, the application is not
    /// present, or the capability data is malformed.
    pub fn connect(mut transport: Box<dyn Transport>) -> TokenResult<Self> {
        transport.connect()?;

        let mut connection = Self {
            transport,
            capabilities: None,
            pw1_validated_signature: false,
            pw1_validated: false,
            pw3_validated: false,
        };

        let response = connection.communicate(&commands::select_openpgp())?;
        if !response.is_success() {
            return Err(TokenError::from_status_word(
                response.status_word(),
                "SELECT OpenPGP application",
            ));
        }

        connection.refresh_capabilities()?;

        let caps = connection.capabilities()?;
        let (major, minor) = caps.version();
        log::info!(
            "OpenPGP application selected: version {major}.{minor}, serial {:08X}",
            caps.serial_number()
        );

        Ok(connection)
    }

    /// Re-read and re-parse the application related data.
    ///
    /// Required after operations that can change the card's feature set
    /// (factory reset, key replacement).
    pub fn refresh_capabilities(&mut self) -> TokenResult<()> {
        let response = self.communicate(&commands::get_data(tags::APPLICATION_RELATED_DATA))?;
        if !response.is_success() {
            return Err(TokenError::from_status_word(
                response.status_word(),
                "GET DATA application related data",
            ));
        }

        self.capabilities = Some(OpenPgpCapabilities::parse(response.data())?);
        Ok(())
    }

    /// The cached capabilities of the connected card.
    pub fn capabilities(&self) -> TokenResult<&OpenPgpCapabilities> {
        self.capabilities
            .as_ref()
            .ok_or_else(|| TokenError::IoError("capabilities not loaded".to_string()))
    }

    /// Send one command and assemble its complete response.
    ///
    /// Two auto-continuations are handled here and nowhere else: `61xx`
    /// replies are drained with GET RESPONSE and concatenated, and a
    /// `6Cxx` reply retries the same command once with the corrected Le.
    /// Every other status word is returned to the caller untouched.
    ///
    /// # Errors
    ///
    /// Transport and decode failures; also rejects commands the card's
    /// parsed capabilities cannot carry, before anything is sent.
    pub fn communicate(&mut self, command: &CommandApdu) -> TokenResult<ResponseApdu> {
        self.check_against_capabilities(command)?;

        let mut response = self.exchange(command)?;

        if response.is_wrong_le() {
            let corrected = usize::from(response.corrected_le());
            let corrected = if corrected == 0 { 256 } else { corrected };
            log::debug!("wrong Le, retrying with Le={corrected}");
            response = self.exchange(&command.clone().with_expected_response_length(corrected))?;
        }

        if !response.has_more_data() {
            return Ok(response);
        }

        let mut data = response.data().to_vec();
        while response.has_more_data() {
            let remaining = usize::from(response.remaining_bytes());
            let le = if remaining == 0 { 256 } else { remaining };
            log::trace!("GET RESPONSE for {le} more bytes");
            response = self.exchange(&commands::get_response(le))?;
            data.extend_from_slice(response.data());
        }

        Ok(ResponseApdu::from_parts(
            data,
            response.sw1(),
            response.sw2(),
        ))
    }

    fn exchange(&mut self, command: &CommandApdu) -> TokenResult<ResponseApdu> {
        let raw = self.transport.send_and_receive(&command.encode())?;
        ResponseApdu::from_bytes(&raw)
    }

    /// Reject a command the connected card cannot carry.
    fn check_against_capabilities(&self, command: &CommandApdu) -> TokenResult<()> {
        let Some(caps) = &self.capabilities else {
            // Still selecting; nothing to gate against yet.
            return Ok(());
        };

        if command.data().len() > caps.max_command_bytes() {
            return Err(TokenError::UnsupportedByCard(format!(
                "command data of {} bytes exceeds the card maximum of {}",
                command.data().len(),
                caps.max_command_bytes()
            )));
        }

        if command.is_extended() && !caps.has_extended_length() {
            return Err(TokenError::UnsupportedByCard(
                "extended-length APDUs".to_string(),
            ));
        }

        Ok(())
    }

    /// Verify a PIN, skipping the exchange when this reference was
    /// already verified in this session.
    ///
    /// # Errors
    ///
    /// A failed VERIFY clears the cached state and reports the remaining
    /// tries via [`TokenError::WrongPin`].
    pub fn verify_pin(&mut self, pin_type: PinType, pin: &Pin) -> TokenResult<()> {
        if self.is_pin_validated(pin_type) {
            log::trace!("{pin_type} already verified in this session");
            return Ok(());
        }

        pin.validate_for(pin_type)?;
        self.check_pin_length_against_card(pin_type, pin)?;

        let response = self.communicate(&commands::verify(pin_type, pin.as_bytes()))?;
        if response.is_success() {
            self.set_pin_validated(pin_type, true);
            log::info!("{pin_type} verified");
            Ok(())
        } else {
            self.set_pin_validated(pin_type, false);
            Err(TokenError::from_status_word(
                response.status_word(),
                "VERIFY",
            ))
        }
    }

    fn check_pin_length_against_card(&self, pin_type: PinType, pin: &Pin) -> TokenResult<()> {
        let Some(caps) = &self.capabilities else {
            return Ok(());
        };
        let max = if pin_type.is_admin() {
            caps.pw_status().pw3_max_length
        } else {
            caps.pw_status().pw1_max_length
        };
        if max != 0 && pin.len() > usize::from(max) {
            return Err(TokenError::ValidationError(format!(
                "{pin_type} accepts at most {max} characters, got {}",
                pin.len()
            )));
        }
        Ok(())
    }

    pub fn is_pin_validated(&self, pin_type: PinType) -> bool {
        match pin_type {
            PinType::Pw1Signature => self.pw1_validated_signature,
            PinType::Pw1 => self.pw1_validated,
            PinType::Pw3 => self.pw3_validated,
        }
    }

    pub(crate) fn set_pin_validated(&mut self, pin_type: PinType, validated: bool) {
        match pin_type {
            PinType::Pw1Signature => self.pw1_validated_signature = validated,
            PinType::Pw1 => self.pw1_validated = validated,
            PinType::Pw3 => self.pw3_validated = validated,
        }
    }

    /// Forget all cached PIN verifications, e.g. after a factory reset.
    pub fn reset_pin_state(&mut self) {
        self.pw1_validated_signature = false;
        self.pw1_validated = false;
        self.pw3_validated = false;
    }

    /// Whether the underlying link survives between calls.
    pub fn allow_persistent_connection(&self) -> bool {
        self.transport.allow_persistent_connection()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Release the transport. The connection is unusable afterwards.
    pub fn release(&mut self) {
        self.transport.release();
        self.capabilities = None;
        self.reset_pin_state();
    }
}
