//! Use-case sequences against a scripted transport.

mod common;

use common::{
    application_data, scripted_handshake, scripted_handshake_with, GET_APPLICATION_DATA,
    ECDH_P256_ATTRIBUTES,
};
use openpgp_token::{
    KeySlot, Pin, PinType, RsaKeyParts, SecurityTokenConnection, TokenError, TokenOperations,
};

fn user_pin() -> Pin {
    Pin::new(b"123456").unwrap()
}

fn admin_pin() -> Pin {
    Pin::new(b"12345678").unwrap()
}

const VERIFY_PW1: &[u8] = &[0x00, 0x20, 0x00, 0x82, 0x06, b'1', b'2', b'3', b'4', b'5', b'6'];
const VERIFY_PW1_SIG: &[u8] = &[0x00, 0x20, 0x00, 0x81, 0x06, b'1', b'2', b'3', b'4', b'5', b'6'];
const VERIFY_PW3: &[u8] = &[
    0x00, 0x20, 0x00, 0x83, 0x08, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8',
];

fn operations(transport: common::MockTransport) -> TokenOperations {
    TokenOperations::new(SecurityTokenConnection::connect(Box::new(transport)).unwrap())
}

#[test]
fn test_decrypt_session_key_rsa() {
    let cryptogram = [0x11u8; 16];
    let mut decipher_request = vec![0x00, 0x2A, 0x80, 0x86, 0x11, 0x00];
    decipher_request.extend_from_slice(&cryptogram);
    decipher_request.push(0x00);

    let session_key = [0x42u8; 24];
    let mut decipher_reply = session_key.to_vec();
    decipher_reply.extend_from_slice(&[0x90, 0x00]);

    let transport = scripted_handshake()
        .expect(VERIFY_PW1, &[0x90, 0x00])
        .expect(&decipher_request, &decipher_reply);

    let mut ops = operations(transport);
    let decrypted = ops.decrypt_session_key(&user_pin(), &cryptogram).unwrap();
    assert_eq!(decrypted, session_key);
}

#[test]
fn test_decrypt_session_key_ecdh_uses_mse_and_cipher_template() {
    let point = [0x04u8; 8];
    // A6 > 7F49 > 86 framing around the ephemeral point.
    let mut decipher_request = vec![0x00, 0x2A, 0x80, 0x86, 0x0F];
    decipher_request.extend_from_slice(&[0xA6, 0x0D, 0x7F, 0x49, 0x0A, 0x86, 0x08]);
    decipher_request.extend_from_slice(&point);
    decipher_request.push(0x00);

    let transport = scripted_handshake_with(application_data(&ECDH_P256_ATTRIBUTES))
        .expect(VERIFY_PW1, &[0x90, 0x00])
        .expect(&[0x00, 0x22, 0x41, 0xB8, 0x03, 0x83, 0x01, 0x02], &[0x90, 0x00])
        .expect(&decipher_request, &[0x5A, 0x5A, 0x90, 0x00]);

    let mut ops = operations(transport);
    let shared = ops.decrypt_session_key(&user_pin(), &point).unwrap();
    assert_eq!(shared, vec![0x5A, 0x5A]);
}

#[test]
fn test_sign_digest_reverifies_when_pin_is_single_use() {
    let digest_info = [0x30u8, 0x31, 0x30, 0x0D];
    let mut sign_request = vec![0x00, 0x2A, 0x9E, 0x9A, 0x04];
    sign_request.extend_from_slice(&digest_info);
    sign_request.push(0x00);

    let signature = [0x99u8; 8];
    let mut sign_reply = signature.to_vec();
    sign_reply.extend_from_slice(&[0x90, 0x00]);

    // Sample card has pw1_valid_multiple = false, so each signature
    // requires a fresh VERIFY.
    let transport = scripted_handshake()
        .expect(VERIFY_PW1_SIG, &[0x90, 0x00])
        .expect(&sign_request, &sign_reply)
        .expect(VERIFY_PW1_SIG, &[0x90, 0x00])
        .expect(&sign_request, &sign_reply);
    let sent = transport.sent_log();

    let mut ops = operations(transport);
    assert_eq!(ops.sign_digest(&user_pin(), &digest_info).unwrap(), signature);
    assert_eq!(ops.sign_digest(&user_pin(), &digest_info).unwrap(), signature);
    assert_eq!(sent.borrow().len(), 6);
}

#[test]
fn test_change_pin_sends_old_and_new() {
    let mut change_request = vec![0x00, 0x24, 0x00, 0x81, 0x0C];
    change_request.extend_from_slice(b"123456654321");

    let transport = scripted_handshake().expect(&change_request, &[0x90, 0x00]);

    let mut ops = operations(transport);
    ops.change_pin(PinType::Pw1, &user_pin(), &Pin::new(b"654321").unwrap())
        .unwrap();

    // The card re-locked PW1; the cached verification must be gone.
    assert!(!ops.connection().is_pin_validated(PinType::Pw1));
}

#[test]
fn test_change_pin_rejects_short_replacement() {
    let transport = scripted_handshake();
    let mut ops = operations(transport);

    assert!(matches!(
        ops.change_pin(PinType::Pw3, &admin_pin(), &Pin::new(b"1234").unwrap()),
        Err(TokenError::ValidationError(_))
    ));
}

#[test]
fn test_factory_reset_sequence() {
    let verify_pw1_wrong: Vec<u8> = {
        let mut v = vec![0x00, 0x20, 0x00, 0x82, 0x08];
        v.extend_from_slice(&[0xFF; 8]);
        v
    };
    let verify_pw3_wrong: Vec<u8> = {
        let mut v = vec![0x00, 0x20, 0x00, 0x83, 0x08];
        v.extend_from_slice(&[0xFF; 8]);
        v
    };

    let transport = scripted_handshake()
        .expect(&verify_pw1_wrong, &[0x63, 0xC2])
        .expect(&verify_pw1_wrong, &[0x63, 0xC1])
        .expect(&verify_pw1_wrong, &[0x63, 0xC0])
        .expect(&verify_pw3_wrong, &[0x63, 0xC2])
        .expect(&verify_pw3_wrong, &[0x63, 0xC1])
        .expect(&verify_pw3_wrong, &[0x69, 0x83])
        .expect(&[0x00, 0xE6, 0x00, 0x00], &[0x90, 0x00])
        .expect(&[0x00, 0x44, 0x00, 0x00], &[0x90, 0x00])
        .expect(GET_APPLICATION_DATA, &common::capabilities_reply());

    let mut ops = operations(transport);
    ops.factory_reset().unwrap();
    assert!(ops.connection().capabilities().is_ok());
}

#[test]
fn test_factory_reset_aborts_when_terminate_fails() {
    let verify_pw1_wrong: Vec<u8> = {
        let mut v = vec![0x00, 0x20, 0x00, 0x82, 0x08];
        v.extend_from_slice(&[0xFF; 8]);
        v
    };
    let verify_pw3_wrong: Vec<u8> = {
        let mut v = vec![0x00, 0x20, 0x00, 0x83, 0x08];
        v.extend_from_slice(&[0xFF; 8]);
        v
    };

    let transport = scripted_handshake()
        .expect(&verify_pw1_wrong, &[0x63, 0xC0])
        .expect(&verify_pw3_wrong, &[0x63, 0xC0])
        // Conditions of use not satisfied; no ACTIVATE FILE may follow.
        .expect(&[0x00, 0xE6, 0x00, 0x00], &[0x69, 0x85]);
    let sent = transport.sent_log();

    let mut ops = operations(transport);
    match ops.factory_reset() {
        Err(TokenError::CardStatus { status_word, .. }) => assert_eq!(status_word, 0x6985),
        other => panic!("expected CardStatus, got {other:?}"),
    }
    assert_eq!(sent.borrow().len(), 5, "sequence must stop at TERMINATE DF");
}

#[test]
fn test_import_rsa_key_template_layout() {
    let key = RsaKeyParts {
        exponent: vec![0x01, 0x00, 0x01],
        prime1: vec![0xA1, 0xA2, 0xA3, 0xA4],
        prime2: vec![0xB1, 0xB2, 0xB3, 0xB4],
    };

    // 4D wraps: B6 00 CRT, 7F48 length template, 5F48 concatenated parts.
    let mut put_key_request = vec![0x00, 0xDB, 0x3F, 0xFF, 0x1B];
    put_key_request.extend_from_slice(&[0x4D, 0x19, 0xB6, 0x00]);
    put_key_request.extend_from_slice(&[0x7F, 0x48, 0x06, 0x91, 0x03, 0x92, 0x04, 0x93, 0x04]);
    put_key_request.extend_from_slice(&[0x5F, 0x48, 0x0B, 0x01, 0x00, 0x01]);
    put_key_request.extend_from_slice(&[0xA1, 0xA2, 0xA3, 0xA4, 0xB1, 0xB2, 0xB3, 0xB4]);

    let transport = scripted_handshake()
        .expect(VERIFY_PW3, &[0x90, 0x00])
        .expect(&put_key_request, &[0x90, 0x00]);

    let mut ops = operations(transport);
    ops.import_rsa_key(&admin_pin(), KeySlot::Signature, &key)
        .unwrap();
}

#[test]
fn test_import_rejected_for_ecdh_slot() {
    let transport = scripted_handshake_with(application_data(&ECDH_P256_ATTRIBUTES));
    let sent = transport.sent_log();

    let mut ops = operations(transport);
    let key = RsaKeyParts {
        exponent: vec![0x01, 0x00, 0x01],
        prime1: vec![0xA1; 4],
        prime2: vec![0xB1; 4],
    };

    assert!(matches!(
        ops.import_rsa_key(&admin_pin(), KeySlot::Decryption, &key),
        Err(TokenError::UnsupportedByCard(_))
    ));
    // Rejected before VERIFY or PUT DATA went out.
    assert_eq!(sent.borrow().len(), 2);
}

#[test]
fn test_generate_key_returns_template_and_refreshes() {
    let public_key_template = [0x7F, 0x49, 0x03, 0x81, 0x01, 0x03];
    let mut generate_reply = public_key_template.to_vec();
    generate_reply.extend_from_slice(&[0x90, 0x00]);

    let transport = scripted_handshake()
        .expect(VERIFY_PW3, &[0x90, 0x00])
        .expect(&[0x00, 0x47, 0x80, 0x00, 0x02, 0xB6, 0x00, 0x00], &generate_reply)
        .expect(GET_APPLICATION_DATA, &common::capabilities_reply());

    let mut ops = operations(transport);
    let template = ops.generate_key(&admin_pin(), KeySlot::Signature).unwrap();
    assert_eq!(template, public_key_template);
}

#[test]
fn test_read_public_key_needs_no_pin() {
    let transport = scripted_handshake().expect(
        &[0x00, 0x47, 0x81, 0x00, 0x02, 0xB8, 0x00, 0x00],
        &[0x7F, 0x49, 0x00, 0x90, 0x00],
    );

    let mut ops = operations(transport);
    let template = ops.read_public_key(KeySlot::Decryption).unwrap();
    assert_eq!(template, vec![0x7F, 0x49, 0x00]);
}

#[test]
fn test_reset_retry_counter_after_admin_verify() {
    let mut reset_request = vec![0x00, 0x2C, 0x02, 0x81, 0x06];
    reset_request.extend_from_slice(b"654321");

    let transport = scripted_handshake()
        .expect(VERIFY_PW3, &[0x90, 0x00])
        .expect(&reset_request, &[0x90, 0x00]);

    let mut ops = operations(transport);
    ops.reset_pin_retry_counter(&admin_pin(), &Pin::new(b"654321").unwrap())
        .unwrap();
}
