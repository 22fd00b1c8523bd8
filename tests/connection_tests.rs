//! Session-layer tests against a scripted transport.

mod common;

use common::{scripted_handshake, GET_APPLICATION_DATA, SELECT_OPENPGP};
use openpgp_token::{
    commands, CommandApdu, Pin, PinType, SecurityTokenConnection, TokenError,
};

#[test]
fn test_connect_selects_application_and_parses_capabilities() {
    let transport = scripted_handshake();
    let sent = transport.sent_log();

    let connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();
    let caps = connection.capabilities().unwrap();

    assert_eq!(caps.version(), (3, 4));
    assert_eq!(caps.serial_number(), 0x05274631);
    assert_eq!(caps.max_command_bytes(), 2048);
    assert_eq!(caps.pw_status().pw1_tries_remaining, 3);

    let sent = sent.borrow();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], SELECT_OPENPGP);
    assert_eq!(sent[1], GET_APPLICATION_DATA);
}

#[test]
fn test_connect_fails_when_application_missing() {
    // File-not-found for the AID.
    let transport = common::MockTransport::new().expect(SELECT_OPENPGP, &[0x6A, 0x82]);

    match SecurityTokenConnection::connect(Box::new(transport)) {
        Err(TokenError::CardStatus { status_word, .. }) => assert_eq!(status_word, 0x6A82),
        other => panic!("expected CardStatus, got {other:?}"),
    }
}

#[test]
fn test_communicate_drains_more_data_chain() {
    let transport = scripted_handshake()
        // First reply carries two bytes and announces three more.
        .expect(&[0x00, 0xCA, 0x5F, 0x50, 0x00], &[0xAA, 0xBB, 0x61, 0x03])
        .expect(&[0x00, 0xC0, 0x00, 0x00, 0x03], &[0xCC, 0xDD, 0xEE, 0x90, 0x00]);

    let mut connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();
    let response = connection.communicate(&commands::get_data(0x5F50)).unwrap();

    assert!(response.is_success());
    assert_eq!(response.data(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
}

#[test]
fn test_communicate_retries_once_on_wrong_le() {
    let transport = scripted_handshake()
        .expect(&[0x00, 0xCA, 0x00, 0x4F, 0x00], &[0x6C, 0x0A])
        .expect(
            &[0x00, 0xCA, 0x00, 0x4F, 0x0A],
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x90, 0x00],
        );

    let mut connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();
    let response = connection.communicate(&commands::get_data(0x004F)).unwrap();

    assert!(response.is_success());
    assert_eq!(response.data().len(), 10);
}

#[test]
fn test_verify_pin_is_cached_per_session() {
    let transport = scripted_handshake().expect(
        &[0x00, 0x20, 0x00, 0x82, 0x06, b'1', b'2', b'3', b'4', b'5', b'6'],
        &[0x90, 0x00],
    );
    let sent = transport.sent_log();

    let mut connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();
    let pin = Pin::new(b"123456").unwrap();

    connection.verify_pin(PinType::Pw1, &pin).unwrap();
    assert!(connection.is_pin_validated(PinType::Pw1));

    // Second verification is served from the session cache; an exchange
    // here would hit the end of the script and fail.
    connection.verify_pin(PinType::Pw1, &pin).unwrap();
    assert_eq!(sent.borrow().len(), 3);
}

#[test]
fn test_failed_verify_clears_cache_and_reports_tries() {
    let transport = scripted_handshake()
        .reply(&[0x63, 0xC1])
        .reply(&[0x90, 0x00]);

    let mut connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();
    let pin = Pin::new(b"999999").unwrap();

    match connection.verify_pin(PinType::Pw1, &pin) {
        Err(TokenError::WrongPin { tries_remaining }) => assert_eq!(tries_remaining, 1),
        other => panic!("expected WrongPin, got {other:?}"),
    }
    assert!(!connection.is_pin_validated(PinType::Pw1));

    // A subsequent verify goes back to the card.
    connection
        .verify_pin(PinType::Pw1, &Pin::new(b"123456").unwrap())
        .unwrap();
    assert!(connection.is_pin_validated(PinType::Pw1));
}

#[test]
fn test_blocked_pin_is_typed() {
    let transport = scripted_handshake().reply(&[0x69, 0x83]);

    let mut connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();
    assert!(matches!(
        connection.verify_pin(PinType::Pw3, &Pin::new(b"12345678").unwrap()),
        Err(TokenError::PinBlocked)
    ));
}

#[test]
fn test_oversized_command_rejected_before_sending() {
    let transport = scripted_handshake();
    let sent = transport.sent_log();

    let mut connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();

    // Sample card takes at most 2048 command bytes.
    let oversized = CommandApdu::new(0x00, 0x2A, 0x80, 0x86, vec![0u8; 3000]);
    assert!(matches!(
        connection.communicate(&oversized),
        Err(TokenError::UnsupportedByCard(_))
    ));

    // Nothing beyond the handshake went out.
    assert_eq!(sent.borrow().len(), 2);
}

#[test]
fn test_refresh_capabilities_rereads_card() {
    let transport = scripted_handshake()
        .expect(GET_APPLICATION_DATA, &common::capabilities_reply());
    let sent = transport.sent_log();

    let mut connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();
    connection.refresh_capabilities().unwrap();

    assert_eq!(sent.borrow().len(), 3);
    assert!(connection.capabilities().is_ok());
}

#[test]
fn test_short_transport_reply_is_a_decode_error() {
    let transport = scripted_handshake().reply(&[0x90]);

    let mut connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();
    assert!(matches!(
        connection.communicate(&commands::get_data(0x004F)),
        Err(TokenError::ResponseDecodeError(_))
    ));
}

#[test]
fn test_release_invalidates_connection() {
    let transport = scripted_handshake();

    let mut connection = SecurityTokenConnection::connect(Box::new(transport)).unwrap();
    assert!(connection.is_connected());

    connection.release();
    assert!(!connection.is_connected());
    assert!(connection.capabilities().is_err());
    assert!(connection.communicate(&commands::get_data(0x004F)).is_err());
}
