/// Shared-secret channel sealing for ring datagrams.
///
/// Every peer configured with the same passphrase derives the same
/// XChaCha20-Poly1305 key via HKDF-SHA256. Each datagram gets a fresh
/// random 24-byte nonce.
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::AquaProtocolError;

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"aqua-ring-channel-xchacha20poly1305-v1";

/// A sealed datagram as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedFrame {
    /// XChaCha20-Poly1305 ciphertext (includes 16-byte auth tag).
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 24],
}

impl SealedFrame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, AquaProtocolError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, AquaProtocolError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Symmetric cipher keyed from a ring-wide passphrase.
#[derive(Clone)]
pub struct ChannelCipher {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for ChannelCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCipher").finish_non_exhaustive()
    }
}

impl ChannelCipher {
    pub fn from_passphrase(passphrase: &str) -> Result<Self, AquaProtocolError> {
        if passphrase.is_empty() {
            return Err(AquaProtocolError::Config("empty channel secret".into()));
        }
        let key = derive_key(passphrase.as_bytes())?;
        Ok(Self {
            cipher: XChaCha20Poly1305::new(&key.into()),
        })
    }

    /// Encrypt `plaintext` into a serialized [`SealedFrame`].
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, AquaProtocolError> {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};

        let mut nonce_bytes = [0u8; 24];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| AquaProtocolError::Crypto(format!("encryption failed: {e}")))?;

        SealedFrame {
            ciphertext,
            nonce: nonce_bytes,
        }
        .to_bytes()
    }

    /// Decrypt a serialized [`SealedFrame`].
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, AquaProtocolError> {
        let frame = SealedFrame::from_bytes(data)?;
        let nonce = XNonce::from(frame.nonce);
        self.cipher
            .decrypt(&nonce, frame.ciphertext.as_ref())
            .map_err(|_| AquaProtocolError::Crypto("decryption failed: authentication error".into()))
    }
}

/// Derive a 32-byte key from the passphrase using HKDF-SHA256.
fn derive_key(secret: &[u8]) -> Result<[u8; 32], AquaProtocolError> {
    let hkdf = Hkdf::<Sha256>::new(None, secret);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|e| AquaProtocolError::Crypto(format!("key derivation failed: {e}")))?;
    Ok(key)
}
