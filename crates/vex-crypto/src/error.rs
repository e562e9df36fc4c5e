use thiserror::Error;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Missing signature")]
    MissingSignature,

    #[error("Public key does not belong to {0}")]
    KeyMismatch(String),

    #[error("Invalid seed length: expected 32, got {0}")]
    InvalidSeedLength(usize),

    #[error("Invalid seed encoding: {0}")]
    InvalidSeed(String),
}

impl From<ed25519_dalek::SignatureError> for CryptoError {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        CryptoError::InvalidSignature
    }
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::InvalidSeed(e.to_string())
    }
}
