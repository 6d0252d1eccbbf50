// Copyright (c) 2019-2025 The Umbra Project developers

//! Canonical byte encoding.
//!
//! Little-endian fixed-width integers, `u64` length prefixes on vectors,
//! one discriminant byte per sum type (values documented on the types in
//! [`crate::types`]). The prefix hash, the relay payload and the size
//! limit all use this encoding.

use displaydoc::Display;
use umb_crypto::{KeyImage, PublicKey, RingSignature};

use crate::types::{
    KeyInput, MultisigInput, Transaction, TransactionPrefix, TxInput, TxOutput, TxOutputTarget,
};

/// An error while encoding or decoding a transaction blob.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum EncodingError {
    /// Blob ended before the structure was complete
    UnexpectedEnd,
    /// Unknown discriminant `{0}`
    UnknownDiscriminant(u8),
    /// Embedded key or key image bytes are invalid
    InvalidKey,
    /// A length-prefixed field exceeds its maximum size
    FieldTooLong,
}

impl std::error::Error for EncodingError {}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes32(&mut self, v: &[u8; 32]) {
        self.buf.extend_from_slice(v);
    }

    fn var_bytes(&mut self, v: &[u8]) {
        self.u64(v.len() as u64);
        self.buf.extend_from_slice(v);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EncodingError> {
        let slice = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or(EncodingError::UnexpectedEnd)?;
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, EncodingError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, EncodingError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, EncodingError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn bytes32(&mut self) -> Result<[u8; 32], EncodingError> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    fn len(&mut self) -> Result<usize, EncodingError> {
        let len = self.u64()?;
        // A length can never exceed what is left in the buffer.
        if len > (self.buf.len() - self.pos) as u64 {
            return Err(EncodingError::UnexpectedEnd);
        }
        Ok(len as usize)
    }

    fn finished(&self) -> bool {
        self.pos == self.buf.len()
    }
}

fn write_input(w: &mut Writer, input: &TxInput) {
    match input {
        TxInput::Coinbase { height } => {
            w.u8(0);
            w.u64(*height);
        }
        TxInput::Key(key) => {
            w.u8(1);
            w.u64(key.amount);
            w.u64(key.ring_indices.len() as u64);
            for index in &key.ring_indices {
                w.u32(*index);
            }
            w.bytes32(key.key_image.as_bytes());
        }
        TxInput::Multisig(ms) => {
            w.u8(2);
            w.u64(ms.amount);
            w.u32(ms.global_index);
            w.u8(ms.signature_count);
        }
    }
}

fn read_input(r: &mut Reader<'_>) -> Result<TxInput, EncodingError> {
    match r.u8()? {
        0 => Ok(TxInput::Coinbase { height: r.u64()? }),
        1 => {
            let amount = r.u64()?;
            let count = r.len()?;
            let mut ring_indices = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                ring_indices.push(r.u32()?);
            }
            let key_image =
                KeyImage::from_bytes(&r.bytes32()?).map_err(|_| EncodingError::InvalidKey)?;
            Ok(TxInput::Key(KeyInput {
                amount,
                ring_indices,
                key_image,
            }))
        }
        2 => Ok(TxInput::Multisig(MultisigInput {
            amount: r.u64()?,
            global_index: r.u32()?,
            signature_count: r.u8()?,
        })),
        other => Err(EncodingError::UnknownDiscriminant(other)),
    }
}

fn write_output(w: &mut Writer, output: &TxOutput) {
    w.u64(output.amount);
    match &output.target {
        TxOutputTarget::Key(key) => {
            w.u8(0);
            w.bytes32(&key.to_bytes());
        }
        TxOutputTarget::Multisig { keys, required } => {
            w.u8(1);
            w.u64(keys.len() as u64);
            for key in keys {
                w.bytes32(&key.to_bytes());
            }
            w.u8(*required);
        }
    }
}

fn read_output(r: &mut Reader<'_>) -> Result<TxOutput, EncodingError> {
    let amount = r.u64()?;
    let target = match r.u8()? {
        0 => TxOutputTarget::Key(
            PublicKey::from_bytes(&r.bytes32()?).map_err(|_| EncodingError::InvalidKey)?,
        ),
        1 => {
            let count = r.len()?;
            let mut keys = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                keys.push(
                    PublicKey::from_bytes(&r.bytes32()?)
                        .map_err(|_| EncodingError::InvalidKey)?,
                );
            }
            let required = r.u8()?;
            TxOutputTarget::Multisig { keys, required }
        }
        other => return Err(EncodingError::UnknownDiscriminant(other)),
    };
    Ok(TxOutput { amount, target })
}

/// Encode a prefix.
pub fn prefix_to_bytes(prefix: &TransactionPrefix) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(prefix.version);
    w.u64(prefix.unlock_time);
    w.u64(prefix.inputs.len() as u64);
    for input in &prefix.inputs {
        write_input(&mut w, input);
    }
    w.u64(prefix.outputs.len() as u64);
    for output in &prefix.outputs {
        write_output(&mut w, output);
    }
    w.var_bytes(&prefix.extra);
    w.buf
}

fn read_prefix(r: &mut Reader<'_>) -> Result<TransactionPrefix, EncodingError> {
    let version = r.u8()?;
    let unlock_time = r.u64()?;

    let input_count = r.len()?;
    let mut inputs = Vec::with_capacity(input_count.min(1024));
    for _ in 0..input_count {
        inputs.push(read_input(r)?);
    }

    let output_count = r.len()?;
    let mut outputs = Vec::with_capacity(output_count.min(1024));
    for _ in 0..output_count {
        outputs.push(read_output(r)?);
    }

    let extra_len = r.len()?;
    let extra = r.take(extra_len)?.to_vec();

    Ok(TransactionPrefix {
        version,
        unlock_time,
        inputs,
        outputs,
        extra,
    })
}

/// Encode a full transaction.
pub fn transaction_to_bytes(tx: &Transaction) -> Vec<u8> {
    let mut w = Writer::new();
    w.buf = prefix_to_bytes(&tx.prefix);
    w.u64(tx.signatures.len() as u64);
    for sig in &tx.signatures {
        w.bytes32(&sig.c_zero);
        w.u64(sig.responses.len() as u64);
        for response in &sig.responses {
            w.bytes32(response);
        }
        w.bytes32(sig.key_image.as_bytes());
    }
    w.buf
}

/// Decode a full transaction, requiring the blob to be fully consumed.
pub fn transaction_from_bytes(bytes: &[u8]) -> Result<Transaction, EncodingError> {
    let mut r = Reader::new(bytes);
    let prefix = read_prefix(&mut r)?;

    let sig_count = r.len()?;
    let mut signatures = Vec::with_capacity(sig_count.min(1024));
    for _ in 0..sig_count {
        let c_zero = r.bytes32()?;
        let response_count = r.len()?;
        let mut responses = Vec::with_capacity(response_count.min(1024));
        for _ in 0..response_count {
            responses.push(r.bytes32()?);
        }
        let key_image =
            KeyImage::from_bytes(&r.bytes32()?).map_err(|_| EncodingError::InvalidKey)?;
        signatures.push(RingSignature {
            c_zero,
            responses,
            key_image,
        });
    }

    if !r.finished() {
        return Err(EncodingError::FieldTooLong);
    }

    Ok(Transaction { prefix, signatures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extra;
    use crate::types::PaymentId;
    use rand::{rngs::StdRng, SeedableRng};
    use umb_crypto::KeyPair;

    fn sample_tx(rng: &mut StdRng) -> Transaction {
        let signer = KeyPair::generate(rng);
        let image = umb_crypto::key_image(&signer.secret, &signer.public).unwrap();

        let mut extra_bytes = Vec::new();
        extra::add_tx_public_key(&mut extra_bytes, &KeyPair::generate(rng).public);
        extra::add_payment_id(&mut extra_bytes, &PaymentId([5; 32]));

        Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![TxInput::Key(KeyInput {
                    amount: 3000,
                    ring_indices: vec![4, 9, 17],
                    key_image: image,
                })],
                outputs: vec![
                    TxOutput {
                        amount: 2000,
                        target: TxOutputTarget::Key(KeyPair::generate(rng).public),
                    },
                    TxOutput {
                        amount: 900,
                        target: TxOutputTarget::Multisig {
                            keys: vec![KeyPair::generate(rng).public],
                            required: 1,
                        },
                    },
                ],
                extra: extra_bytes,
            },
            signatures: vec![],
        }
    }

    #[test]
    fn test_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);
        let tx = sample_tx(&mut rng);
        let bytes = transaction_to_bytes(&tx);
        assert_eq!(transaction_from_bytes(&bytes).unwrap(), tx);
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut bytes = transaction_to_bytes(&sample_tx(&mut rng));
        bytes.push(0);
        assert!(transaction_from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_truncation_rejected() {
        let mut rng = StdRng::seed_from_u64(13);
        let bytes = transaction_to_bytes(&sample_tx(&mut rng));
        assert_eq!(
            transaction_from_bytes(&bytes[..bytes.len() - 1]),
            Err(EncodingError::UnexpectedEnd)
        );
    }

    #[test]
    fn test_hash_ignores_signatures() {
        let mut rng = StdRng::seed_from_u64(14);
        let tx = sample_tx(&mut rng);

        let signer = KeyPair::generate(&mut rng);
        let image = umb_crypto::key_image(&signer.secret, &signer.public).unwrap();
        let mut signed = tx.clone();
        signed.signatures.push(umb_crypto::RingSignature {
            c_zero: [1; 32],
            responses: vec![[2; 32]],
            key_image: image,
        });

        assert_eq!(tx.hash(), signed.hash());
        assert!(signed.blob_size() > tx.blob_size());
    }
}
