//! Passphrase-sealed message envelopes
//!
//! This is the client-side crypto contract the broker relays but never
//! executes on received traffic. A sealed value is
//! `base64(salt || nonce || ciphertext+tag)` where the key is derived from
//! the group passphrase with PBKDF2-HMAC-SHA256 and the cipher is
//! AES-256-GCM. The passphrase fingerprint (base64 SHA-256) doubles as the
//! broker's partition key and is never reversible to the passphrase.
//!
//! Group membership is proven without the server's involvement: the sender
//! seals the passphrase itself into `envelope_key`, and a receiver accepts a
//! message only if opening `envelope_key` with its own passphrase yields
//! that same passphrase back.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Salt length in bytes, prepended to every sealed value
pub const SALT_LENGTH: usize = 16;

/// AES-GCM nonce length in bytes
pub const NONCE_LENGTH: usize = 12;

/// GCM authentication tag length in bytes, appended to the ciphertext
pub const TAG_LENGTH: usize = 16;

/// PBKDF2-HMAC-SHA256 iteration count
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Why opening (or sealing) an envelope failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Not valid base64, or too short to hold salt + nonce + tag
    Malformed,
    /// Authentication tag mismatch: wrong passphrase or tampered data
    Authentication,
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::Malformed => write!(f, "malformed envelope"),
            EnvelopeError::Authentication => write!(f, "envelope authentication failed"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// Compute the partition fingerprint for a passphrase
///
/// base64 of the SHA-256 digest of the raw UTF-8 passphrase. Stable across
/// clients, so every holder of the passphrase lands in the same partition.
pub fn fingerprint(passphrase: &str) -> String {
    let digest = Sha256::digest(passphrase.as_bytes());
    BASE64.encode(digest)
}

/// Derive the 256-bit message key from a passphrase and salt
fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Seal plaintext under a passphrase
///
/// Generates a fresh random salt and nonce per call, so sealing the same
/// plaintext twice yields different output.
pub fn seal(plaintext: &str, passphrase: &str) -> Result<String, EnvelopeError> {
    let mut salt = [0u8; SALT_LENGTH];
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    let mut rng = rand::rng();
    rng.fill(&mut salt[..]);
    rng.fill(&mut nonce_bytes[..]);

    let key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| EnvelopeError::Authentication)?;

    let mut out = Vec::with_capacity(SALT_LENGTH + NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

/// Open a sealed value with a passphrase
///
/// Returns [`EnvelopeError::Malformed`] for structural problems and
/// [`EnvelopeError::Authentication`] when the tag check fails - a wrong
/// passphrase never yields silently wrong plaintext.
pub fn open(sealed: &str, passphrase: &str) -> Result<String, EnvelopeError> {
    let data = BASE64.decode(sealed).map_err(|_| EnvelopeError::Malformed)?;
    if data.len() < SALT_LENGTH + NONCE_LENGTH + TAG_LENGTH {
        return Err(EnvelopeError::Malformed);
    }

    let (salt, rest) = data.split_at(SALT_LENGTH);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LENGTH);

    let key = derive_key(passphrase, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| EnvelopeError::Authentication)?;

    String::from_utf8(plaintext).map_err(|_| EnvelopeError::Malformed)
}
