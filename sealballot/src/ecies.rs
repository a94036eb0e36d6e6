//! ECIES over the Edwards form of Curve25519.
//!
//! A sealed message is `ephemeral_pk || nonce || aes-256-gcm(ciphertext + tag)`.
//! The AES key is HKDF-SHA256 over `ephemeral_pk || shared_point`.
//!
//! Secret keys are 32 random bytes, clamped the same way X25519 clamps them
//! before use as a scalar. They are not ed25519 signing keys and must not be
//! used for anything other than envelopes.

use aes_gcm::aead::{generic_array::GenericArray, Aead, NewAead};
use aes_gcm::Aes256Gcm;
use curve25519_dalek::constants;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{SecretKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

const AES_IV_LENGTH: usize = 12;
const AES_TAG_LENGTH: usize = 16;
const HKDF_INFO: &[u8] = b"sealballot envelope v1";

/// Shortest possible sealed message: an empty plaintext
pub const MIN_SEALED_LENGTH: usize = PUBLIC_KEY_LENGTH + AES_IV_LENGTH + AES_TAG_LENGTH;

type AesKey = Zeroizing<[u8; 32]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EciesError {
    /// Not enough randomness available from the operating system
    Entropy,
    /// Bytes do not decode to a usable curve point
    InvalidPublicKey,
    /// Bytes are not a secret key
    InvalidSecretKey,
    /// Too short to be a sealed message
    Truncated,
    /// AEAD failure (wrong key, or the message was altered)
    Aead,
}

/// A Curve25519 point used as an envelope recipient key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EciesPublicKey(CompressedEdwardsY, EdwardsPoint);

impl EciesPublicKey {
    /// Convert this public key to a byte array.
    #[inline]
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.0.to_bytes()
    }

    /// Parse a public key, rejecting points that do not decompress or that
    /// lie in the small-order subgroup.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EciesError> {
        if bytes.len() != PUBLIC_KEY_LENGTH {
            return Err(EciesError::InvalidPublicKey);
        }
        let compressed = CompressedEdwardsY::from_slice(bytes);
        let point = compressed
            .decompress()
            .ok_or(EciesError::InvalidPublicKey)?;
        if point.is_small_order() {
            return Err(EciesError::InvalidPublicKey);
        }
        Ok(EciesPublicKey(compressed, point))
    }

    /// Derive a public key from a private key
    pub fn from_secret(sk: &SecretKey) -> Self {
        let point = &secret_scalar(sk) * &constants::ED25519_BASEPOINT_TABLE;
        EciesPublicKey(point.compress(), point)
    }

    pub fn as_point(&self) -> &EdwardsPoint {
        &self.1
    }
}

/// Parse exported secret key bytes
pub fn secret_from_bytes(bytes: &[u8]) -> Result<SecretKey, EciesError> {
    if bytes.len() != SECRET_KEY_LENGTH {
        return Err(EciesError::InvalidSecretKey);
    }
    SecretKey::from_bytes(bytes).map_err(|_| EciesError::InvalidSecretKey)
}

/// Generate a keypair, ready for use in ECIES
pub fn generate_keypair() -> Result<(SecretKey, EciesPublicKey), EciesError> {
    let mut bytes = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
    OsRng
        .try_fill_bytes(&mut bytes[..])
        .map_err(|_| EciesError::Entropy)?;
    let secret = secret_from_bytes(&bytes[..])?;
    let public = EciesPublicKey::from_secret(&secret);
    Ok((secret, public))
}

/// Encrypt a message using ECIES, it can only be decrypted by the receiver's SecretKey.
pub fn encrypt(receiver_pub: &EciesPublicKey, msg: &[u8]) -> Result<Vec<u8>, EciesError> {
    let (ephemeral_sk, ephemeral_pk) = generate_keypair()?;

    let aes_key = encapsulate(&ephemeral_sk, &ephemeral_pk, receiver_pub)?;
    let encrypted = aes_encrypt(&aes_key, msg)?;

    let mut cipher_text = Vec::with_capacity(PUBLIC_KEY_LENGTH + encrypted.len());
    cipher_text.extend(ephemeral_pk.to_bytes().iter());
    cipher_text.extend(encrypted);

    Ok(cipher_text)
}

/// Decrypt a ECIES encrypted ciphertext using the receiver's SecretKey.
pub fn decrypt(receiver_sec: &SecretKey, msg: &[u8]) -> Result<Zeroizing<Vec<u8>>, EciesError> {
    if msg.len() < MIN_SEALED_LENGTH {
        return Err(EciesError::Truncated);
    }

    let ephemeral_pk = EciesPublicKey::from_bytes(&msg[..PUBLIC_KEY_LENGTH])?;
    let encrypted = &msg[PUBLIC_KEY_LENGTH..];
    let aes_key = decapsulate(receiver_sec, &ephemeral_pk)?;

    aes_decrypt(&aes_key, encrypted)
}

fn secret_scalar(sk: &SecretKey) -> Scalar {
    let mut bits = Zeroizing::new(sk.to_bytes());
    bits[0] &= 248;
    bits[31] &= 127;
    bits[31] |= 64;
    Scalar::from_bits(*bits)
}

fn hkdf_sha256(master: &[u8]) -> Result<AesKey, EciesError> {
    let h = Hkdf::<Sha256>::new(None, master);
    let mut out = Zeroizing::new([0u8; 32]);
    h.expand(HKDF_INFO, &mut out[..])
        .map_err(|_| EciesError::Aead)?;
    Ok(out)
}

fn generate_shared(secret: &SecretKey, public: &EciesPublicKey) -> Zeroizing<[u8; 32]> {
    let shared_point = public.as_point() * secret_scalar(secret);
    Zeroizing::new(shared_point.compress().to_bytes())
}

fn derive_key(
    ephemeral_pk: &EciesPublicKey,
    shared_point: &[u8; 32],
) -> Result<AesKey, EciesError> {
    let mut master = Zeroizing::new(Vec::with_capacity(32 * 2));
    master.extend(ephemeral_pk.to_bytes().iter());
    master.extend(shared_point.iter());
    hkdf_sha256(master.as_slice())
}

fn encapsulate(
    ephemeral_sk: &SecretKey,
    ephemeral_pk: &EciesPublicKey,
    peer_pk: &EciesPublicKey,
) -> Result<AesKey, EciesError> {
    let shared_point = generate_shared(ephemeral_sk, peer_pk);
    derive_key(ephemeral_pk, &shared_point)
}

fn decapsulate(sk: &SecretKey, ephemeral_pk: &EciesPublicKey) -> Result<AesKey, EciesError> {
    let shared_point = generate_shared(sk, ephemeral_pk);
    derive_key(ephemeral_pk, &shared_point)
}

fn aes_encrypt(key: &AesKey, msg: &[u8]) -> Result<Vec<u8>, EciesError> {
    let aead = Aes256Gcm::new(GenericArray::from_slice(&key[..]));

    let mut nonce = [0u8; AES_IV_LENGTH];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| EciesError::Entropy)?;
    let nonce = GenericArray::from_slice(&nonce);

    let ciphertext = aead.encrypt(nonce, msg).map_err(|_| EciesError::Aead)?;

    let mut output = Vec::with_capacity(AES_IV_LENGTH + ciphertext.len());
    output.extend(nonce);
    output.extend(ciphertext);

    Ok(output)
}

fn aes_decrypt(key: &AesKey, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, EciesError> {
    let aead = Aes256Gcm::new(GenericArray::from_slice(&key[..]));

    let nonce = GenericArray::from_slice(&ciphertext[..AES_IV_LENGTH]);
    let encrypted = &ciphertext[AES_IV_LENGTH..];

    aead.decrypt(nonce, encrypted)
        .map(Zeroizing::new)
        .map_err(|_| EciesError::Aead)
}
