use ring::hmac;

/// HMAC-SHA256 over `payload`, hex encoded.
pub fn sign(payload: &str, key: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hex::encode(hmac::sign(&key, payload.as_bytes()).as_ref())
}

/// Constant-time check of a hex signature produced by [`sign`].
pub fn verify(payload: &str, signature_hex: &str, key: &[u8]) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, payload.as_bytes(), &signature).is_ok()
}
