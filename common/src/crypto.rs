// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ed25519 point handling and the login challenge.
//!
//! All public keys and curve points cross the wire as 32-byte compressed
//! Edwards points rendered as lowercase hex; signatures are 64 raw bytes
//! (128 hex chars). Signature verification is plain RFC 8032 EdDSA.
//!
//! The login challenge is a Diffie-Hellman exchange on the identity key:
//! the server picks a fresh scalar `d`, sends `Q = d·B` and expects the
//! client to answer with `a·Q` where `a` is its identity scalar. The server
//! precomputes the same point as `d·P` with `P` the client's public key, so
//! only the holder of `a` can produce the expected response.

use curve25519_dalek::{EdwardsPoint, Scalar, edwards::CompressedEdwardsY};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Not valid hex, not 32/64 bytes, or not a point on the curve.
    #[error("Malformed key or point encoding")]
    MalformedKey,
    /// The signature does not verify under the given key.
    #[error("Signature verification failed")]
    BadSignature,
}

/// A freshly issued login challenge.
///
/// `challenge` goes to the client; `expected` stays in the session and is
/// compared against the client's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginChallenge {
    pub challenge: String,
    pub expected: String,
}

fn decode_array<const N: usize>(hex_str: &str) -> Result<[u8; N], CryptoError> {
    let bytes = hex::decode(hex_str).map_err(|_| CryptoError::MalformedKey)?;
    bytes.try_into().map_err(|_| CryptoError::MalformedKey)
}

/// Decompress a lowercase-hex compressed Edwards point.
///
/// Fails with [`CryptoError::MalformedKey`] when the encoding is not valid
/// hex, not 32 bytes, or does not land on the curve.
pub fn decompress(key_hex: &str) -> Result<EdwardsPoint, CryptoError> {
    let bytes: [u8; 32] = decode_array(key_hex)?;
    CompressedEdwardsY(bytes)
        .decompress()
        .ok_or(CryptoError::MalformedKey)
}

/// Compress an Edwards point to its 64-char lowercase hex encoding.
pub fn compress(point: &EdwardsPoint) -> String {
    hex::encode(point.compress().as_bytes())
}

/// Issue a challenge against an identity public key.
///
/// The public key must already have been validated; an invalid encoding
/// still fails cleanly with [`CryptoError::MalformedKey`].
pub fn generate_challenge(public_hex: &str) -> Result<LoginChallenge, CryptoError> {
    let public = decompress(public_hex)?;
    let secret = Scalar::random(&mut OsRng);
    let point = EdwardsPoint::mul_base(&secret);
    Ok(LoginChallenge {
        challenge: compress(&point),
        expected: compress(&(public * secret)),
    })
}

/// Verify an Ed25519 signature over a hex-encoded message.
///
/// `public_hex` is the signer's compressed identity key, `message_hex` the
/// signed bytes and `signature_hex` the 64-byte signature, all hex.
pub fn verify(public_hex: &str, message_hex: &str, signature_hex: &str) -> Result<(), CryptoError> {
    let key_bytes: [u8; 32] = decode_array(public_hex)?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::MalformedKey)?;
    let message = hex::decode(message_hex).map_err(|_| CryptoError::MalformedKey)?;
    let signature_bytes: [u8; 64] = decode_array(signature_hex)?;
    let signature = Signature::from_bytes(&signature_bytes);
    key.verify(&message, &signature)
        .map_err(|_| CryptoError::BadSignature)
}
