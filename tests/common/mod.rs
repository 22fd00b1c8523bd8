//! Shared test doubles for connection and operation tests.
//!
//! `MockTransport` plays the card side of a session: it serves scripted
//! replies in order and optionally asserts the exact request bytes. The
//! request log is shared, so tests can inspect traffic after the
//! transport moved into a connection.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use openpgp_token::domain::tlv::TlvBuilder;
use openpgp_token::{TokenError, TokenResult, Transport};

struct Exchange {
    expected_request: Option<Vec<u8>>,
    reply: Vec<u8>,
}

pub struct MockTransport {
    script: VecDeque<Exchange>,
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
    connected: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            sent: Rc::new(RefCell::new(Vec::new())),
            connected: false,
        }
    }

    /// Script a reply for the next exchange, asserting the request bytes.
    pub fn expect(mut self, request: &[u8], reply: &[u8]) -> Self {
        self.script.push_back(Exchange {
            expected_request: Some(request.to_vec()),
            reply: reply.to_vec(),
        });
        self
    }

    /// Script a reply for the next exchange, accepting any request.
    pub fn reply(mut self, reply: &[u8]) -> Self {
        self.script.push_back(Exchange {
            expected_request: None,
            reply: reply.to_vec(),
        });
        self
    }

    /// Handle on the request log, usable after the transport is moved.
    pub fn sent_log(&self) -> Rc<RefCell<Vec<Vec<u8>>>> {
        Rc::clone(&self.sent)
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> TokenResult<()> {
        self.connected = true;
        Ok(())
    }

    fn send_and_receive(&mut self, data: &[u8]) -> TokenResult<Vec<u8>> {
        if !self.connected {
            return Err(TokenError::IoError("transport released".to_string()));
        }
        self.sent.borrow_mut().push(data.to_vec());

        let exchange = self.script.pop_front().ok_or_else(|| {
            TokenError::IoError(format!("unscripted command: {}", hex::encode(data)))
        })?;

        if let Some(expected) = &exchange.expected_request {
            assert_eq!(
                hex::encode(data),
                hex::encode(expected),
                "request differs from scripted expectation"
            );
        }

        Ok(exchange.reply)
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn allow_persistent_connection(&self) -> bool {
        true
    }
}

/// RSA-2048 algorithm attributes (2048-bit modulus, 17-bit exponent,
/// standard import format).
pub const RSA_2048_ATTRIBUTES: [u8; 6] = [0x01, 0x08, 0x00, 0x00, 0x11, 0x00];

/// ECDH over P-256.
pub const ECDH_P256_ATTRIBUTES: [u8; 9] = [18, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];

/// Application related data of a v3.4 card: RSA-2048 in all slots,
/// extended length up to 2048 bytes, key import and MSE available,
/// three tries on each PIN.
pub fn sample_application_data() -> Vec<u8> {
    application_data(&RSA_2048_ATTRIBUTES)
}

/// Same card, with a configurable decryption-slot algorithm.
pub fn application_data(decrypt_algorithm: &[u8]) -> Vec<u8> {
    let aid = [
        0xD2, 0x76, 0x00, 0x01, 0x24, 0x01, // RID + PIX
        0x03, 0x04, // version 3.4
        0x00, 0x06, // manufacturer
        0x05, 0x27, 0x46, 0x31, // serial
        0x00, 0x00, // RFU
    ];
    let historical = [0x00, 0x73, 0x00, 0x00, 0xE0, 0x05, 0x90, 0x00];
    let extended_caps = [
        0x74, 0x00, 0x00, 0xFF, 0x08, 0x00, 0x00, 0xFF, 0x00, 0x01,
    ];
    let pw_status = [0x00, 0x7F, 0x7F, 0x7F, 0x03, 0x03, 0x03];
    let extended_length_info = TlvBuilder::new()
        .add(0x02, &[0x08, 0x00])
        .add(0x02, &[0x08, 0x00])
        .build();

    let discretionary = TlvBuilder::new()
        .add(0xC0, &extended_caps)
        .add(0xC1, &RSA_2048_ATTRIBUTES)
        .add(0xC2, decrypt_algorithm)
        .add(0xC3, &RSA_2048_ATTRIBUTES)
        .add(0xC4, &pw_status)
        .wrap(0x73)
        .build();

    TlvBuilder::new()
        .add(0x4F, &aid)
        .add(0x5F52, &historical)
        .add(0x7F66, &extended_length_info)
        .add_raw(&discretionary)
        .wrap(0x6E)
        .build()
}

/// The scripted reply to GET DATA 6E: capability TLV plus 9000.
pub fn capabilities_reply() -> Vec<u8> {
    let mut reply = sample_application_data();
    reply.extend_from_slice(&[0x90, 0x00]);
    reply
}

/// Raw SELECT request bytes for the OpenPGP AID.
pub const SELECT_OPENPGP: &[u8] = &[
    0x00, 0xA4, 0x04, 0x00, 0x06, 0xD2, 0x76, 0x00, 0x01, 0x24, 0x01,
];

/// Raw GET DATA request for the application related data.
pub const GET_APPLICATION_DATA: &[u8] = &[0x00, 0xCA, 0x00, 0x6E, 0x00];

/// A transport scripted through the connect handshake.
pub fn scripted_handshake() -> MockTransport {
    scripted_handshake_with(sample_application_data())
}

/// Connect handshake serving custom application related data.
pub fn scripted_handshake_with(application_data: Vec<u8>) -> MockTransport {
    let mut reply = application_data;
    reply.extend_from_slice(&[0x90, 0x00]);
    MockTransport::new()
        .expect(SELECT_OPENPGP, &[0x90, 0x00])
        .expect(GET_APPLICATION_DATA, &reply)
}
