// Copyright (c) 2019-2025 The Umbra Project developers

//! The transaction extra field.
//!
//! Extra is a TLV trailer. Tags:
//!
//! | tag  | payload |
//! |------|---------|
//! | 0x00 | padding; everything after the tag is ignored |
//! | 0x01 | 32-byte tx public key (no length byte) |
//! | 0x02 | nonce: `len u8` then inner fields; inner tag 0x00 = 32-byte payment id |
//! | 0x03 | encrypted message: `len u8` then ciphertext |
//!
//! Unknown tags carry a `len u8` and are skipped.

use umb_crypto::PublicKey;

use crate::types::PaymentId;

const TAG_PADDING: u8 = 0x00;
const TAG_TX_PUBLIC_KEY: u8 = 0x01;
const TAG_NONCE: u8 = 0x02;
const TAG_MESSAGE: u8 = 0x03;

const NONCE_PAYMENT_ID: u8 = 0x00;

/// Largest payload a length-prefixed field can carry.
pub const MAX_FIELD_SIZE: usize = u8::MAX as usize;

/// A parsed extra field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExtraField {
    TxPublicKey(PublicKey),
    PaymentId(PaymentId),
    Message(Vec<u8>),
    Unknown { tag: u8, payload: Vec<u8> },
}

/// Parse extra into fields, skipping what cannot be understood.
///
/// Parsing is tolerant: a truncated or malformed trailer yields the
/// fields recovered so far, matching how relayed transactions with
/// foreign extra data must still scan.
pub fn parse(extra: &[u8]) -> Vec<ExtraField> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < extra.len() {
        let tag = extra[pos];
        pos += 1;

        match tag {
            TAG_PADDING => break,
            TAG_TX_PUBLIC_KEY => {
                let Some(raw) = extra.get(pos..pos + 32) else {
                    break;
                };
                pos += 32;
                let bytes: [u8; 32] = raw.try_into().expect("slice is 32 bytes");
                if let Ok(key) = PublicKey::from_bytes(&bytes) {
                    fields.push(ExtraField::TxPublicKey(key));
                }
            }
            TAG_NONCE => {
                let Some(payload) = read_length_prefixed(extra, &mut pos) else {
                    break;
                };
                if payload.len() == 33 && payload[0] == NONCE_PAYMENT_ID {
                    let bytes: [u8; 32] = payload[1..].try_into().expect("slice is 32 bytes");
                    fields.push(ExtraField::PaymentId(PaymentId(bytes)));
                }
            }
            TAG_MESSAGE => {
                let Some(payload) = read_length_prefixed(extra, &mut pos) else {
                    break;
                };
                fields.push(ExtraField::Message(payload.to_vec()));
            }
            _ => {
                let Some(payload) = read_length_prefixed(extra, &mut pos) else {
                    break;
                };
                fields.push(ExtraField::Unknown {
                    tag,
                    payload: payload.to_vec(),
                });
            }
        }
    }

    fields
}

fn read_length_prefixed<'a>(extra: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let len = *extra.get(*pos)? as usize;
    *pos += 1;
    let payload = extra.get(*pos..*pos + len)?;
    *pos += len;
    Some(payload)
}

/// Append the tx public key field.
pub fn add_tx_public_key(extra: &mut Vec<u8>, key: &PublicKey) {
    extra.push(TAG_TX_PUBLIC_KEY);
    extra.extend_from_slice(&key.to_bytes());
}

/// Append a payment id nonce field.
pub fn add_payment_id(extra: &mut Vec<u8>, id: &PaymentId) {
    extra.push(TAG_NONCE);
    extra.push(33);
    extra.push(NONCE_PAYMENT_ID);
    extra.extend_from_slice(&id.0);
}

/// Append an encrypted message field. Fails if the ciphertext exceeds
/// [`MAX_FIELD_SIZE`].
pub fn add_message(extra: &mut Vec<u8>, ciphertext: &[u8]) -> Result<(), crate::EncodingError> {
    if ciphertext.len() > MAX_FIELD_SIZE {
        return Err(crate::EncodingError::FieldTooLong);
    }
    extra.push(TAG_MESSAGE);
    extra.push(ciphertext.len() as u8);
    extra.extend_from_slice(ciphertext);
    Ok(())
}

/// First tx public key in extra, if any.
pub fn extract_tx_public_key(extra: &[u8]) -> Option<PublicKey> {
    parse(extra).into_iter().find_map(|field| match field {
        ExtraField::TxPublicKey(key) => Some(key),
        _ => None,
    })
}

/// First payment id in extra, if any.
pub fn extract_payment_id(extra: &[u8]) -> Option<PaymentId> {
    parse(extra).into_iter().find_map(|field| match field {
        ExtraField::PaymentId(id) => Some(id),
        _ => None,
    })
}

/// All encrypted message payloads, in order.
pub fn extract_messages(extra: &[u8]) -> Vec<Vec<u8>> {
    parse(extra)
        .into_iter()
        .filter_map(|field| match field {
            ExtraField::Message(bytes) => Some(bytes),
            _ => None,
        })
        .collect()
}
