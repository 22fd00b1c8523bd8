//! Error types for security-token operations.
//! Error handling types and result definitions for the transport and card layers.

use thiserror::Error;

/// Result type for token operations
pub type TokenResult<T> = Result<T, TokenError>;

/// Comprehensive error types for token operations
#[derive(Error, Debug, miette::Diagnostic)]
pub enum TokenError {
    #[error("USB transport error: {0}")]
    UsbError(String),

    #[error("NFC transport error: {0}")]
    NfcError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("CCID protocol error: {0}")]
    CcidError(String),

    /// The reader reported a failed command in a `RDR_to_PC` reply.
    #[error("CCID command failed: iccStatus={icc_status}, error=0x{error:02X}")]
    CcidCommandFailed { icc_status: u8, error: u8 },

    /// The reply carried a sequence number other than the one we sent.
    #[error("CCID sequence mismatch: sent {expected}, reply carried {actual}")]
    CcidSequenceMismatch { expected: u8, actual: u8 },

    #[error("no supported ICC voltage produced an ATR")]
    VoltageSelectionExhausted,

    #[error("malformed response: {0}")]
    ResponseDecodeError(String),

    /// Non-success status word the connection layer does not auto-correct.
    #[error("card returned status 0x{status_word:04X}: {context}")]
    CardStatus { status_word: u16, context: String },

    #[error("wrong PIN, {tries_remaining} tries remaining")]
    WrongPin { tries_remaining: u8 },

    #[error("PIN is blocked")]
    PinBlocked,

    #[error("security status not satisfied: {0}")]
    SecurityStatusNotSatisfied(String),

    /// Operation rejected before any APDU was sent.
    #[error("not supported by the connected card: {0}")]
    UnsupportedByCard(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl TokenError {
    /// Map a non-success status word to the matching typed error.
    ///
    /// `63Cx` and `6983` become the dedicated PIN variants; everything else
    /// passes through as an opaque [`TokenError::CardStatus`].
    pub fn from_status_word(sw: u16, context: &str) -> Self {
        match sw {
            sw if (sw & 0xFFF0) == 0x63C0 => TokenError::WrongPin {
                tries_remaining: (sw & 0x000F) as u8,
            },
            0x6983 => TokenError::PinBlocked,
            0x6982 => TokenError::SecurityStatusNotSatisfied(context.to_string()),
            _ => TokenError::CardStatus {
                status_word: sw,
                context: context.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for TokenError {
    fn from(error: std::io::Error) -> Self {
        TokenError::IoError(error.to_string())
    }
}

impl From<rusb::Error> for TokenError {
    fn from(error: rusb::Error) -> Self {
        TokenError::UsbError(error.to_string())
    }
}
