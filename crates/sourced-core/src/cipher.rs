//! Authenticated symmetric encryption for event payloads.
//!
//! The core only specifies *when* a payload passes through a cipher (see
//! [`crate::mapper::SequencedItemMapper`]); the cipher itself is an external
//! collaborator. [`SecretboxCipher`] is the reference implementation,
//! backed by libsodium's authenticated `secretbox` construction.

use sodiumoxide::crypto::secretbox;

/// A symmetric cipher that authenticates as well as encrypts.
///
/// Implementations must fail [`Cipher::decrypt`] on any tampering rather
/// than returning corrupted plaintext.
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext`, returning an opaque ciphertext.
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8>;

    /// Decrypt `ciphertext`, failing with [`CipherError`] if the integrity
    /// check does not pass.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Failure while decrypting a payload.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The ciphertext failed authentication — it was tampered with, was
    /// encrypted under a different key, or is simply malformed.
    #[error("cipher integrity check failed")]
    IntegrityCheckFailed,
    /// The ciphertext was shorter than a nonce and could not possibly be valid.
    #[error("ciphertext truncated")]
    Truncated,
}

/// Reference [`Cipher`] implementation using libsodium's `secretbox`
/// (XSalsa20-Poly1305): a fresh random nonce is generated per call and
/// prepended to the ciphertext.
pub struct SecretboxCipher {
    key: secretbox::Key,
}

impl SecretboxCipher {
    /// Derive a cipher from a 32-byte key.
    pub fn new(key: secretbox::Key) -> Self {
        Self { key }
    }

    /// Generate a cipher with a fresh random key.
    ///
    /// Intended for tests and for applications that manage key material
    /// outside this crate; production deployments should supply their own
    /// key via [`SecretboxCipher::new`].
    pub fn generate() -> Self {
        sodiumoxide::init().expect("libsodium must initialize");
        Self::new(secretbox::gen_key())
    }
}

impl Cipher for SecretboxCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let nonce = secretbox::gen_nonce();
        let mut out = Vec::with_capacity(secretbox::NONCEBYTES + plaintext.len() + secretbox::MACBYTES);
        out.extend_from_slice(nonce.as_ref());
        out.extend(secretbox::seal(plaintext, &nonce, &self.key));
        out
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < secretbox::NONCEBYTES {
            return Err(CipherError::Truncated);
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(secretbox::NONCEBYTES);
        let nonce = secretbox::Nonce::from_slice(nonce_bytes).ok_or(CipherError::Truncated)?;
        secretbox::open(sealed, &nonce, &self.key).map_err(|_| CipherError::IntegrityCheckFailed)
    }
}
