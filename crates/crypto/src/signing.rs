//! Detached RSA signatures over assertion content.
//!
//! Signatures are RSASSA-PKCS1-v1_5 with SHA-512. The scheme is deterministic:
//! the same key and message always yield the same signature bytes.

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::RsaPublicKey;
use sha2::Sha512;
use signature::{SignatureEncoding, Signer, Verifier};

use crate::keys::Keypair;
use crate::{KeyStoreError, Result};

/// Sign `message` with the keypair's private key.
pub fn sign_message(keypair: &Keypair, message: &[u8]) -> Result<Vec<u8>> {
    let signing_key = SigningKey::<Sha512>::new(keypair.private_key().clone());
    let signature = signing_key
        .try_sign(message)
        .map_err(|e| KeyStoreError::Crypto(format!("signing failed: {}", e)))?;
    Ok(signature.to_vec())
}

/// Check a signature. Malformed signature bytes verify as `false`.
pub fn verify_message(public_key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    let verifying_key = VerifyingKey::<Sha512>::new(public_key.clone());
    verifying_key.verify(message, &signature).is_ok()
}
