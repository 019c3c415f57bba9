use base64::{engine::general_purpose::STANDARD, Engine};
use ring::aead::{
    Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM,
};
use ring::error::Unspecified;
use ring::rand::{SecureRandom, SystemRandom};

const NONCE_LEN: usize = 12;

#[derive(thiserror::Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid encrypted data format")]
    InvalidFormat,
}

impl From<Unspecified> for EncryptionError {
    fn from(_: Unspecified) -> Self {
        EncryptionError::EncryptionFailed("Cryptographic operation failed".to_string())
    }
}

/// Yields a single pre-chosen nonce; each key is used for exactly one seal/open.
struct SingleNonce(Option<[u8; NONCE_LEN]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, Unspecified> {
        let bytes = self.0.take().ok_or(Unspecified)?;
        Nonce::try_assume_unique_for_key(&bytes)
    }
}

/// Encrypts bytes with AES-256-GCM.
///
/// Format: [nonce (12 bytes)][ciphertext + auth tag]
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, EncryptionError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| EncryptionError::EncryptionFailed("Failed to generate nonce".to_string()))?;

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)?;
    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce(Some(nonce_bytes)));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| EncryptionError::EncryptionFailed("Sealing failed".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&in_out);

    Ok(sealed)
}

/// Decrypts data produced by [`encrypt`].
pub fn decrypt(sealed: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, EncryptionError> {
    if sealed.len() < NONCE_LEN {
        return Err(EncryptionError::InvalidFormat);
    }

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&sealed[..NONCE_LEN]);

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)?;
    let mut opening_key = OpeningKey::new(unbound_key, SingleNonce(Some(nonce_bytes)));

    let mut in_out = sealed[NONCE_LEN..].to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::empty(), &mut in_out)
        .map_err(|_| EncryptionError::DecryptionFailed("Opening failed".to_string()))?;

    Ok(plaintext.to_vec())
}

/// Seals a patient reference into the text form stored in `cards.unique_id`.
pub fn seal_patient_reference(patient_id: &str, key: &[u8; 32]) -> Result<String, EncryptionError> {
    let sealed = encrypt(patient_id.as_bytes(), key)?;
    Ok(STANDARD.encode(sealed))
}

/// Recovers the patient reference from a card's `unique_id`.
pub fn open_patient_reference(unique_id: &str, key: &[u8; 32]) -> Result<String, EncryptionError> {
    let sealed = STANDARD
        .decode(unique_id.trim())
        .map_err(|_| EncryptionError::InvalidFormat)?;
    let plaintext = decrypt(&sealed, key)?;

    String::from_utf8(plaintext)
        .map_err(|_| EncryptionError::DecryptionFailed("Invalid UTF-8".to_string()))
}

/// Derives a 32-byte key from configured key material using SHA-256.
pub fn derive_key(key_string: &str) -> [u8; 32] {
    use ring::digest;

    let hash = digest::digest(&digest::SHA256, key_string.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(hash.as_ref());
    key
}
