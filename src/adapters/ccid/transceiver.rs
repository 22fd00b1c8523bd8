//! USB CCID bulk-transfer protocol engine.
//!
//! Implements the reader side of the CCID protocol on top of raw bulk
//! IN/OUT endpoints: ICC power management with voltage negotiation,
//! `XfrBlock` exchanges with per-instance sequence numbers, outbound and
//! inbound message chaining, and time-extension handling. Callers only
//! ever see a complete [`CcidDataBlock`] or a typed error; the USB quirks
//! stay below this line.
//!
//! # Protocol Overview
//!
//! Every CCID message starts with a 10-byte header:
//!
//! ```text
//! Offset  Size  Description
//! 0       1     Message type (0x62/0x63/0x6F out, 0x80/0x81 in)
//! 1       4     Data length (little-endian)
//! 5       1     Slot number
//! 6       1     Sequence number
//! 7       3     Type-specific bytes (bStatus/bError/bChainParameter in)
//! 10      N     Payload
//! ```
//!
//! Bits 6-7 of the inbound status byte report the command outcome:
//! 0 = processed, 1 = failed (bError holds the cause), 2 = more time
//! requested. A time-extension reply is not an answer; the real reply
//! follows on the same exchange.

use std::time::Duration;

use crate::adapters::ccid::descriptor::{CcidDescription, Voltage};
use crate::infra::error::{TokenError, TokenResult};

/// CCID message types.
mod message_type {
    /// PC to Reader: ICC power on (requests the ATR).
    pub const PC_TO_RDR_ICC_POWER_ON: u8 = 0x62;
    /// PC to Reader: ICC power off.
    pub const PC_TO_RDR_ICC_POWER_OFF: u8 = 0x63;
    /// PC to Reader: Transfer block (send APDU).
    pub const PC_TO_RDR_XFR_BLOCK: u8 = 0x6F;
    /// Reader to PC: Data block (APDU response or ATR).
    pub const RDR_TO_PC_DATA_BLOCK: u8 = 0x80;
    /// Reader to PC: Slot status.
    pub const RDR_TO_PC_SLOT_STATUS: u8 = 0x81;
}

/// CCID header size in bytes.
pub const CCID_HEADER_SIZE: usize = 10;

/// Only slot 0 is addressed; multi-slot readers are out of scope.
const SLOT: u8 = 0;

/// Timeout for one bulk transfer within an exchange.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeout for power-on, where the card may run slow self-tests.
const POWER_TIMEOUT: Duration = Duration::from_secs(100);

/// Raw bulk endpoint access.
///
/// Implemented by the rusb device handle wrapper and by test doubles;
/// the transceiver is generic over this seam so the whole protocol layer
/// runs against canned transfers in tests.
pub trait BulkTransfer {
    /// Write to a bulk OUT endpoint, returning the byte count written.
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> TokenResult<usize>;

    /// Read from a bulk IN endpoint into `buf`, returning the byte count.
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> TokenResult<usize>;
}

/// One `RDR_to_PC` reply envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcidDataBlock {
    pub slot: u8,
    pub sequence_number: u8,
    /// Raw bStatus byte; bits 6-7 are the command status.
    pub status: u8,
    pub error: u8,
    pub chain_parameter: u8,
    pub data: Vec<u8>,
}

impl CcidDataBlock {
    /// Command status from bits 6-7 of bStatus:
    /// 0 = processed, 1 = failed, 2 = time extension requested.
    pub fn icc_status(&self) -> u8 {
        (self.status >> 6) & 0x03
    }

    pub fn is_time_extension_request(&self) -> bool {
        self.icc_status() == 2
    }

    pub fn is_failed(&self) -> bool {
        self.icc_status() == 1
    }
}

/// CCID protocol engine over a pair of bulk endpoints.
///
/// Owns the per-connection sequence counter; one instance lives for the
/// duration of one physical connection and is not reused.
pub struct CcidTransceiver<D: BulkTransfer> {
    device: D,
    endpoint_in: u8,
    endpoint_out: u8,
    /// Bulk OUT max packet size; larger messages are split at this bound.
    max_packet_out: usize,
    description: CcidDescription,
    sequence: u8,
    transfer_timeout: Duration,
    power_timeout: Duration,
}

impl<D: BulkTransfer> CcidTransceiver<D> {
    pub fn new(
        device: D,
        endpoint_in: u8,
        endpoint_out: u8,
        max_packet_out: usize,
        description: CcidDescription,
    ) -> Self {
        Self {
            device,
            endpoint_in,
            endpoint_out,
            max_packet_out: max_packet_out.max(CCID_HEADER_SIZE),
            description,
            sequence: 0,
            transfer_timeout: TRANSFER_TIMEOUT,
            power_timeout: POWER_TIMEOUT,
        }
    }

    /// Override the default transfer and power-on timeouts.
    pub fn with_timeouts(mut self, transfer: Duration, power: Duration) -> Self {
        self.transfer_timeout = transfer;
        self.power_timeout = power;
        self
    }

    pub fn description(&self) -> &CcidDescription {
        &self.description
    }

    /// Power the ICC on and return its ATR.
    ///
    /// Readers with automatic voltage selection get a single attempt with
    /// bPowerSelect `0x00`. Otherwise the advertised voltages are tried
    /// from 5V downward, powering the ICC off between failed attempts.
    ///
    /// # Errors
    ///
    /// Fails with [`TokenError::VoltageSelectionExhausted`] when no
    /// voltage produces a successful reply.
    pub fn icc_power_on(&mut self) -> TokenResult<Vec<u8>> {
        let voltages = self.description.power_on_voltages();

        for (attempt, voltage) in voltages.iter().enumerate() {
            if attempt > 0 {
                // Failed activation leaves the slot half-powered; clear it
                // before the next attempt.
                let _ = self.icc_power_off();
            }

            log::debug!("ICC power on, voltage {voltage}");
            match self.attempt_power_on(*voltage) {
                Ok(block) => {
                    log::debug!("ATR: {}", hex::encode(&block.data));
                    return Ok(block.data);
                }
                // Only an activation rejection moves to the next voltage;
                // transport and framing errors abort the power-on.
                Err(TokenError::CcidCommandFailed { icc_status, error }) => {
                    log::debug!(
                        "power on at {voltage} rejected: iccStatus={icc_status}, error=0x{error:02X}"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        log::warn!("all power-on voltages exhausted");
        Err(TokenError::VoltageSelectionExhausted)
    }

    fn attempt_power_on(&mut self, voltage: Voltage) -> TokenResult<CcidDataBlock> {
        let sequence = self.next_sequence();

        let mut header = [0u8; CCID_HEADER_SIZE];
        header[0] = message_type::PC_TO_RDR_ICC_POWER_ON;
        header[5] = SLOT;
        header[6] = sequence;
        header[7] = voltage.power_select_byte();

        self.send_message(&header)?;
        self.receive_data_block(sequence, self.power_timeout)
    }

    /// Power the ICC off. Best effort; the reply is read and discarded.
    pub fn icc_power_off(&mut self) -> TokenResult<()> {
        let sequence = self.next_sequence();

        let mut header = [0u8; CCID_HEADER_SIZE];
        header[0] = message_type::PC_TO_RDR_ICC_POWER_OFF;
        header[5] = SLOT;
        header[6] = sequence;

        self.send_message(&header)?;
        // The slot-status reply may report an error for an already
        // unpowered card; either way the slot ends up off.
        let _ = self.read_data_block(self.transfer_timeout)?;
        Ok(())
    }

    /// Exchange one APDU-bearing `XfrBlock` and return the reply envelope.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, sequence mismatch, or a failed command
    /// status; time-extension replies are consumed internally.
    pub fn send_xfr_block(&mut self, payload: &[u8]) -> TokenResult<CcidDataBlock> {
        let sequence = self.next_sequence();

        let mut message = Vec::with_capacity(CCID_HEADER_SIZE + payload.len());
        message.push(message_type::PC_TO_RDR_XFR_BLOCK);
        message.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        message.push(SLOT);
        message.push(sequence);
        message.extend_from_slice(&[0, 0, 0]);
        message.extend_from_slice(payload);

        log::trace!("CCID TX: {}", hex::encode(&message));

        self.send_message(&message)?;
        let block = self.receive_data_block(sequence, self.transfer_timeout)?;

        log::trace!("CCID RX: {}", hex::encode(&block.data));
        Ok(block)
    }

    /// Write one CCID message, splitting at the bulk-OUT packet size.
    ///
    /// The message stays one logical unit however many USB packets it
    /// spans; the reader reassembles on dwLength.
    fn send_message(&self, message: &[u8]) -> TokenResult<()> {
        for chunk in message.chunks(self.max_packet_out) {
            let written = self
                .device
                .write_bulk(self.endpoint_out, chunk, self.transfer_timeout)?;
            if written != chunk.len() {
                return Err(TokenError::UsbError(format!(
                    "incomplete bulk write: {written}/{} bytes",
                    chunk.len()
                )));
            }
        }
        Ok(())
    }

    /// Read replies until one carries a substantive answer.
    ///
    /// Validates the echoed sequence number and consumes time-extension
    /// replies without surfacing them.
    fn receive_data_block(
        &mut self,
        expected_sequence: u8,
        timeout: Duration,
    ) -> TokenResult<CcidDataBlock> {
        loop {
            let block = self.read_data_block(timeout)?;

            if block.sequence_number != expected_sequence {
                return Err(TokenError::CcidSequenceMismatch {
                    expected: expected_sequence,
                    actual: block.sequence_number,
                });
            }

            if block.is_time_extension_request() {
                log::debug!("time extension requested (bError={}), waiting", block.error);
                continue;
            }

            if block.is_failed() {
                return Err(TokenError::CcidCommandFailed {
                    icc_status: block.icc_status(),
                    error: block.error,
                });
            }

            return Ok(block);
        }
    }

    /// Read one complete CCID message, reassembling across bulk-IN
    /// transfers until the declared dwLength is satisfied.
    fn read_data_block(&mut self, timeout: Duration) -> TokenResult<CcidDataBlock> {
        let buffer_len = self
            .description
            .max_message_length()
            .max(CCID_HEADER_SIZE + 256);
        let mut buf = vec![0u8; buffer_len];

        let read = self.device.read_bulk(self.endpoint_in, &mut buf, timeout)?;
        if read < CCID_HEADER_SIZE {
            return Err(TokenError::CcidError(format!(
                "reply header truncated: {read} bytes"
            )));
        }

        let declared = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        let total = CCID_HEADER_SIZE + declared;

        let mut message = buf[..read].to_vec();
        while message.len() < total {
            let read = self.device.read_bulk(self.endpoint_in, &mut buf, timeout)?;
            if read == 0 {
                return Err(TokenError::CcidError(format!(
                    "reply ended early: {}/{total} bytes",
                    message.len()
                )));
            }
            message.extend_from_slice(&buf[..read]);
        }

        match message[0] {
            message_type::RDR_TO_PC_DATA_BLOCK | message_type::RDR_TO_PC_SLOT_STATUS => {}
            other => {
                return Err(TokenError::CcidError(format!(
                    "unrecognized reply message type 0x{other:02X}"
                )));
            }
        }

        Ok(CcidDataBlock {
            slot: message[5],
            sequence_number: message[6],
            status: message[7],
            error: message[8],
            chain_parameter: message[9],
            data: message[CCID_HEADER_SIZE..total].to_vec(),
        })
    }

    fn next_sequence(&mut self) -> u8 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }
}
