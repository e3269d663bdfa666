//! Transactions and signed transaction bundles.
//!
//! An elementary [`Tx`] names a target sub-ledger ("dapp"), a value, a fee, and opaque data whose
//! meaning belongs to the sub-ledger. Transactions travel in [`SuperTx`] bundles: one or more
//! transactions authorized together by a single Ed25519 signature. The signer's verifying key
//! doubles as the sender account on every sub-ledger the bundle touches.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::crypto::global_hash;
use crate::errors::ValidationError;
use crate::types::basic::CryptoHash;

/// An elementary transaction, applied to the sub-ledger registered under `dapp`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Tx {
    /// Name of the sub-ledger this transaction is routed to.
    pub dapp: Vec<u8>,
    pub value: u64,
    pub fee: u64,
    /// Sub-ledger specific payload. For the transfer ledger, `data[0]` is the recipient account.
    pub data: Vec<Vec<u8>>,
}

impl Tx {
    pub fn get_hash(&self) -> CryptoHash {
        global_hash(&self.try_to_vec().expect("infallible serialization"))
    }
}

/// A bundle of transactions plus the signature that authorizes all of them.
///
/// The `nonce` exists so that two otherwise identical bundles from the same sender hash (and
/// sign) differently.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SuperTx {
    pub nonce: u32,
    pub txs: Vec<Tx>,
    /// Ed25519 verifying key of the signer; also the sender account on every sub-ledger.
    pub sender: [u8; 32],
    pub signature: [u8; 64],
}

impl SuperTx {
    /// Build and sign a bundle with `keypair`.
    pub fn sign(nonce: u32, txs: Vec<Tx>, keypair: &SigningKey) -> SuperTx {
        let sender = keypair.verifying_key().to_bytes();
        let mut super_tx = SuperTx {
            nonce,
            txs,
            sender,
            signature: [0u8; 64],
        };
        let signature = keypair.sign(&super_tx.signing_bytes());
        super_tx.signature = signature.to_bytes();
        super_tx
    }

    /// The canonical bytes covered by the signature: everything except the signature itself.
    fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = self.nonce.try_to_vec().expect("infallible serialization");
        bytes.extend(self.txs.try_to_vec().expect("infallible serialization"));
        bytes.extend(&self.sender);
        bytes
    }

    pub fn get_hash(&self) -> CryptoHash {
        global_hash(&self.try_to_vec().expect("infallible serialization"))
    }

    /// The account the bundle spends from: the signer's verifying key bytes.
    pub fn sender_account(&self) -> &[u8] {
        &self.sender
    }

    /// Self-contained checks: the signature must verify and every transaction must carry a
    /// sub-ledger name.
    pub fn assert_internal_consistency(&self) -> Result<(), ValidationError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.sender).map_err(|_| ValidationError::BadSignature)?;
        let signature = Signature::from_bytes(&self.signature);
        verifying_key
            .verify(&self.signing_bytes(), &signature)
            .map_err(|_| ValidationError::BadSignature)?;
        if self.txs.is_empty() {
            return Err(ValidationError::MalformedTransaction("empty bundle"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use super::*;

    fn transfer(value: u64) -> Tx {
        Tx {
            dapp: Vec::new(),
            value,
            fee: 0,
            data: vec![b"recipient".to_vec()],
        }
    }

    #[test]
    fn signed_bundle_verifies() {
        let keypair = SigningKey::generate(&mut OsRng);
        let super_tx = SuperTx::sign(0, vec![transfer(5)], &keypair);
        assert!(super_tx.assert_internal_consistency().is_ok());
    }

    #[test]
    fn tampered_bundle_is_rejected() {
        let keypair = SigningKey::generate(&mut OsRng);
        let mut super_tx = SuperTx::sign(0, vec![transfer(5)], &keypair);
        super_tx.txs[0].value = 500;
        assert_eq!(
            super_tx.assert_internal_consistency(),
            Err(ValidationError::BadSignature)
        );
    }

    #[test]
    fn empty_bundle_is_rejected() {
        let keypair = SigningKey::generate(&mut OsRng);
        let super_tx = SuperTx::sign(0, Vec::new(), &keypair);
        assert_eq!(
            super_tx.assert_internal_consistency(),
            Err(ValidationError::MalformedTransaction("empty bundle"))
        );
    }

    #[test]
    fn nonce_distinguishes_identical_bundles() {
        let keypair = SigningKey::generate(&mut OsRng);
        let a = SuperTx::sign(0, vec![transfer(5)], &keypair);
        let b = SuperTx::sign(1, vec![transfer(5)], &keypair);
        assert_ne!(a.get_hash(), b.get_hash());
    }
}
