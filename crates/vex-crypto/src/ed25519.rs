use crate::error::CryptoError;
use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use std::fmt;
use vex_types::{Address, Block, Ed25519PublicKey, Ed25519Signature, Transaction};
use zeroize::Zeroizing;

/// Ed25519 keypair used for transaction and block signing.
/// The signing key is zeroized on drop.
pub struct Keypair {
    signing_key: ed25519_dalek::SigningKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let signing_key = ed25519_dalek::SigningKey::generate(&mut csprng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create from a hex-encoded 32-byte seed
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(hex::decode(seed_hex.trim())?);
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidSeedLength(bytes.len()));
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&bytes);
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    pub fn address(&self) -> Address {
        self.public_key().to_address()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let signature = self.signing_key.sign(message);
        Ed25519Signature::from_bytes(signature.to_bytes())
    }

    /// Sign a transaction in place over its content hash.
    ///
    /// The sender must be this keypair's address; the hash is refreshed
    /// first so stale digests never get signed.
    pub fn sign_transaction(&self, tx: &mut Transaction) -> Result<(), CryptoError> {
        if tx.sender != self.address() {
            return Err(CryptoError::KeyMismatch(tx.sender.to_string()));
        }
        tx.refresh_hash();
        tx.signature = Some(self.sign(tx.tx_hash.as_bytes()));
        tx.public_key = Some(self.public_key());
        Ok(())
    }

    /// Sign a block in place over its hash.
    pub fn sign_block(&self, block: &mut Block) -> Result<(), CryptoError> {
        if block.validator_key != self.public_key() {
            return Err(CryptoError::KeyMismatch(block.validator.to_string()));
        }
        block.hash = block.calculate_hash();
        block.signature = Some(self.sign(block.hash.as_bytes()));
        Ok(())
    }

    /// Seed bytes (sensitive)
    pub fn to_seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    /// Hex-encoded seed (sensitive)
    pub fn to_seed_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(*self.to_seed()))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.address())
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.to_seed())
    }
}

/// Verify an ed25519 signature.
pub fn verify(
    public_key: &Ed25519PublicKey,
    message: &[u8],
    signature: &Ed25519Signature,
) -> Result<(), CryptoError> {
    let pk = ed25519_dalek::VerifyingKey::from_bytes(public_key.as_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    pk.verify(message, &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Check a transaction's signature against its hash and sender.
///
/// Does not check the hash itself; callers compare `hash_matches` first.
pub fn verify_transaction(tx: &Transaction) -> Result<(), CryptoError> {
    let (signature, public_key) = match (&tx.signature, &tx.public_key) {
        (Some(sig), Some(pk)) => (sig, pk),
        _ => return Err(CryptoError::MissingSignature),
    };
    if public_key.to_address() != tx.sender {
        return Err(CryptoError::KeyMismatch(tx.sender.to_string()));
    }
    verify(public_key, tx.tx_hash.as_bytes(), signature)
}

/// Check a block's signature against its hash and validator.
pub fn verify_block(block: &Block) -> Result<(), CryptoError> {
    let signature = block.signature.as_ref().ok_or(CryptoError::MissingSignature)?;
    if block.validator_key.to_address() != block.validator {
        return Err(CryptoError::KeyMismatch(block.validator.to_string()));
    }
    verify(&block.validator_key, block.hash.as_bytes(), signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vex_types::Hash;

    fn transfer_from(kp: &Keypair) -> Transaction {
        Transaction::transfer(kp.address(), Address::from_bytes([2u8; 20]), 100, 1)
    }

    #[test]
    fn test_keypair_from_seed() {
        let seed = [42u8; 32];
        let kp1 = Keypair::from_seed(&seed);
        let kp2 = Keypair::from_seed(&seed);

        assert_eq!(kp1.public_key(), kp2.public_key());
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn test_seed_hex_roundtrip() {
        let kp = Keypair::generate();
        let restored = Keypair::from_seed_hex(&kp.to_seed_hex()).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());

        assert_eq!(
            Keypair::from_seed_hex("abcd").unwrap_err(),
            CryptoError::InvalidSeedLength(2)
        );
        assert!(Keypair::from_seed_hex("not hex").is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::generate();
        let message = b"hello vex";

        let signature = keypair.sign(message);
        assert!(verify(&keypair.public_key(), message, &signature).is_ok());
        assert_eq!(
            verify(&keypair.public_key(), b"other", &signature),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn test_transaction_sign_verify() {
        let kp = Keypair::generate();
        let mut tx = transfer_from(&kp);
        kp.sign_transaction(&mut tx).unwrap();

        assert!(tx.is_signed());
        assert!(tx.hash_matches());
        assert!(verify_transaction(&tx).is_ok());
    }

    #[test]
    fn test_transaction_verify_with_other_key_fails() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let mut tx = transfer_from(&kp);
        kp.sign_transaction(&mut tx).unwrap();

        // Swapping in a foreign key breaks the sender binding
        tx.public_key = Some(other.public_key());
        assert!(matches!(verify_transaction(&tx), Err(CryptoError::KeyMismatch(_))));

        // A foreign signature over the same hash fails verification
        tx.public_key = Some(kp.public_key());
        tx.signature = Some(other.sign(tx.tx_hash.as_bytes()));
        assert_eq!(verify_transaction(&tx), Err(CryptoError::VerificationFailed));
    }

    #[test]
    fn test_transaction_mutation_after_signing_fails() {
        let kp = Keypair::generate();
        let mut tx = transfer_from(&kp);
        kp.sign_transaction(&mut tx).unwrap();

        tx.amount += 1;
        assert!(!tx.hash_matches());

        // Re-deriving the hash without re-signing invalidates the signature
        let sig = tx.signature;
        let pk = tx.public_key;
        tx.tx_hash = tx.calculate_hash();
        tx.signature = sig;
        tx.public_key = pk;
        assert_eq!(verify_transaction(&tx), Err(CryptoError::VerificationFailed));
    }

    #[test]
    fn test_sign_transaction_for_other_sender_rejected() {
        let kp = Keypair::generate();
        let mut tx = Transaction::transfer(Address::from_bytes([9u8; 20]), kp.address(), 1, 1);
        assert!(kp.sign_transaction(&mut tx).is_err());
        assert_eq!(verify_transaction(&tx), Err(CryptoError::MissingSignature));
    }

    #[test]
    fn test_block_sign_verify() {
        let kp = Keypair::generate();
        let mut block = Block::new(1, Hash::compute(b"p"), vec![], kp.public_key(), 10, 5);
        assert_eq!(verify_block(&block), Err(CryptoError::MissingSignature));

        kp.sign_block(&mut block).unwrap();
        assert!(verify_block(&block).is_ok());

        let other = Keypair::generate();
        block.signature = Some(other.sign(block.hash.as_bytes()));
        assert_eq!(verify_block(&block), Err(CryptoError::VerificationFailed));
        assert!(other.sign_block(&mut block).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_signature_binds_message(
            seed in proptest::array::uniform32(proptest::prelude::any::<u8>()),
            message in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..128),
            flip in proptest::prelude::any::<usize>(),
        ) {
            let kp = Keypair::from_seed(&seed);
            let signature = kp.sign(&message);
            proptest::prop_assert!(verify(&kp.public_key(), &message, &signature).is_ok());

            let mut tampered = message.clone();
            let at = flip % tampered.len();
            tampered[at] ^= 0x01;
            proptest::prop_assert_eq!(
                verify(&kp.public_key(), &tampered, &signature),
                Err(CryptoError::VerificationFailed)
            );
        }
    }
}
