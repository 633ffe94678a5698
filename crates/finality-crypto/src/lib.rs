//! Cryptographic primitives for the Avalanche finality subsystem.
//!
//! Quorum peers sign their poll responses with a delegated secp256k1 key.
//! This crate wraps the `k256` implementation:
//! - [`PrivateKey`] signs responses
//! - [`PublicKey`] verifies them and derives the peer's [`NodeId`](finality_ids::NodeId)
//! - [`Signature`] is the 64-byte `r || s` encoding carried on the wire

pub mod secp256k1;

pub use secp256k1::{PrivateKey, PublicKey, Signature};

use thiserror::Error;

/// Cryptographic errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("verification failed: {0}")]
    VerificationFailed(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
