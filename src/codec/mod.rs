//! Payload codec for shipping resolved flags to untrusted clients.
//!
//! The sealed path uses ChaCha20-Poly1305 with a key derived from the secret
//! and a fresh 96-bit nonce per call. The wire format is
//! `base64url(nonce || ciphertext || tag)` without padding.
//!
//! Builds without the `aead` feature only have the plaintext path, which is
//! reversible base64 of the JSON payload. It is NOT confidential and exists
//! for local development only.

mod key;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use key::{DerivedKey, KdfParams, KEY_SIZE};

use crate::error::{DecryptionError, EncryptionError, SecretError};

/// Minimum secret length in characters.
pub const MIN_SECRET_LEN: usize = 32;

/// Nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Checks a codec secret.
///
/// Secrets shorter than [`MIN_SECRET_LEN`] are always rejected. With `strict`
/// the secret must also be url-safe base64 (`A-Z a-z 0-9 - _`, optional
/// trailing `=` padding).
pub fn validate_secret(secret: &str, strict: bool) -> Result<(), SecretError> {
    let length = secret.chars().count();
    if length < MIN_SECRET_LEN {
        return Err(SecretError::TooShort {
            length,
            minimum: MIN_SECRET_LEN,
        });
    }

    if strict {
        let body = secret.trim_end_matches('=');
        let padding = secret.len() - body.len();
        let charset_ok = body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !charset_ok || padding > 2 {
            return Err(SecretError::BadCharset);
        }
    }

    Ok(())
}

enum Mode {
    #[cfg(feature = "aead")]
    Sealed(DerivedKey),
    Plaintext,
}

/// Encrypts and decrypts flag payloads. Derives its key once at construction.
pub struct Codec {
    mode: Mode,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("confidential", &self.is_confidential())
            .finish()
    }
}

impl Codec {
    /// Builds a codec for `secret` with default key derivation parameters.
    pub fn new(secret: &str) -> Result<Self, SecretError> {
        Self::with_params(secret, &KdfParams::default())
    }

    #[cfg(feature = "aead")]
    pub fn with_params(secret: &str, params: &KdfParams) -> Result<Self, SecretError> {
        validate_secret(secret, false)?;
        Ok(Self {
            mode: Mode::Sealed(key::derive_key(secret, params)?),
        })
    }

    #[cfg(not(feature = "aead"))]
    pub fn with_params(secret: &str, _params: &KdfParams) -> Result<Self, SecretError> {
        validate_secret(secret, false)?;
        Ok(Self::insecure_plaintext())
    }

    /// Reversible base64 encoding with no confidentiality. Development only.
    pub fn insecure_plaintext() -> Self {
        tracing::warn!(
            "flag payload codec is running in plaintext mode; payloads are NOT encrypted (development only)"
        );
        Self {
            mode: Mode::Plaintext,
        }
    }

    pub fn is_confidential(&self) -> bool {
        !matches!(self.mode, Mode::Plaintext)
    }

    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> Result<String, EncryptionError> {
        let plaintext = serde_json::to_vec(payload)?;

        match &self.mode {
            #[cfg(feature = "aead")]
            Mode::Sealed(key) => seal(key, &plaintext),
            Mode::Plaintext => Ok(URL_SAFE_NO_PAD.encode(plaintext)),
        }
    }

    pub fn decrypt<T: DeserializeOwned>(&self, encoded: &str) -> Result<T, DecryptionError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('='))?;

        let plaintext = match &self.mode {
            #[cfg(feature = "aead")]
            Mode::Sealed(key) => open(key, &bytes)?,
            Mode::Plaintext => bytes,
        };

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(feature = "aead")]
fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<String, EncryptionError> {
    use chacha20poly1305::aead::{Aead, KeyInit};
    use chacha20poly1305::{ChaCha20Poly1305, Nonce};
    use rand::RngCore;

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|err| EncryptionError::Cipher(err.to_string()))?;

    let mut wire = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    wire.extend_from_slice(&nonce_bytes);
    wire.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(wire))
}

#[cfg(feature = "aead")]
fn open(key: &DerivedKey, wire: &[u8]) -> Result<Vec<u8>, DecryptionError> {
    use chacha20poly1305::aead::{Aead, KeyInit};
    use chacha20poly1305::{ChaCha20Poly1305, Nonce};

    if wire.len() < NONCE_SIZE + TAG_SIZE {
        return Err(DecryptionError::TooShort { length: wire.len() });
    }

    let (nonce, ciphertext) = wire.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| DecryptionError::Authentication)
}

/// Encrypts `payload` under `secret`, deriving the key for this call.
pub fn encrypt<T: Serialize + ?Sized>(payload: &T, secret: &str) -> Result<String, EncryptionError> {
    Codec::new(secret)?.encrypt(payload)
}

/// Decrypts a payload produced by [`encrypt`] with the same secret.
pub fn decrypt<T: DeserializeOwned>(encoded: &str, secret: &str) -> Result<T, DecryptionError> {
    Codec::new(secret)?.decrypt(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const SECRET: &str = "Zm9vYmFyYmF6cXV4cXV1eGNvcmdlZ3JhdWx0";
    const OTHER_SECRET: &str = "b3RoZXJzZWNyZXRvdGhlcnNlY3JldG90aGVy";

    #[test]
    fn test_validate_secret_length() {
        assert_eq!(
            validate_secret("short", false),
            Err(SecretError::TooShort {
                length: 5,
                minimum: MIN_SECRET_LEN
            })
        );
        assert!(validate_secret(&"x".repeat(32), false).is_ok());
    }

    #[test]
    fn test_validate_secret_charset_only_when_strict() {
        let spaced = "this secret has spaces in it, 32+ chars";
        assert!(validate_secret(spaced, false).is_ok());
        assert_eq!(validate_secret(spaced, true), Err(SecretError::BadCharset));
        assert!(validate_secret(SECRET, true).is_ok());
        assert!(validate_secret(&format!("{}==", SECRET), true).is_ok());
        assert_eq!(
            validate_secret(&format!("{}===", SECRET), true),
            Err(SecretError::BadCharset)
        );
        // Length is checked before charset.
        assert!(matches!(validate_secret("a b", true), Err(SecretError::TooShort { .. })));
    }

    #[test]
    fn test_plaintext_codec_round_trip() {
        let codec = Codec::insecure_plaintext();
        assert!(!codec.is_confidential());

        let payload = json!({"checkout-flow": true, "algo": "b"});
        let encoded = codec.encrypt(&payload).unwrap();
        let decoded: Value = codec.decrypt(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_plaintext_codec_rejects_garbage() {
        let codec = Codec::insecure_plaintext();
        assert!(matches!(
            codec.decrypt::<Value>("***"),
            Err(DecryptionError::Encoding(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"not json");
        assert!(matches!(
            codec.decrypt::<Value>(&not_json),
            Err(DecryptionError::Payload(_))
        ));
    }

    #[test]
    fn test_short_secret_is_rejected_by_free_functions() {
        assert!(matches!(
            encrypt(&json!(true), "short"),
            Err(EncryptionError::Secret(SecretError::TooShort { .. }))
        ));
        assert!(matches!(
            decrypt::<Value>("abc", "short"),
            Err(DecryptionError::Secret(SecretError::TooShort { .. }))
        ));
    }

    #[cfg(feature = "aead")]
    mod sealed {
        use super::*;
        use proptest::prelude::*;

        #[test]
        fn test_round_trip() {
            let payload = json!({"flags": {"beta": true, "algo": "variant-b", "limit": 25}});
            let encoded = encrypt(&payload, SECRET).unwrap();
            let decoded: Value = decrypt(&encoded, SECRET).unwrap();
            assert_eq!(decoded, payload);
        }

        #[test]
        fn test_wire_format() {
            let codec = Codec::new(SECRET).unwrap();
            assert!(codec.is_confidential());

            let encoded = codec.encrypt(&json!(true)).unwrap();
            assert!(encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

            let raw = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
            // "true" is 4 bytes of JSON.
            assert_eq!(raw.len(), NONCE_SIZE + 4 + TAG_SIZE);
        }

        #[test]
        fn test_fresh_nonce_per_call() {
            let codec = Codec::new(SECRET).unwrap();
            let a = codec.encrypt(&json!("same")).unwrap();
            let b = codec.encrypt(&json!("same")).unwrap();
            assert_ne!(a, b);
        }

        #[test]
        fn test_wrong_secret_fails_authentication() {
            let encoded = encrypt(&json!({"a": 1}), SECRET).unwrap();
            assert!(matches!(
                decrypt::<Value>(&encoded, OTHER_SECRET),
                Err(DecryptionError::Authentication)
            ));
        }

        #[test]
        fn test_tampered_and_truncated_payloads() {
            let codec = Codec::new(SECRET).unwrap();
            let encoded = codec.encrypt(&json!({"a": 1})).unwrap();

            let mut raw = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
            let last = raw.len() - 1;
            raw[last] ^= 0x01;
            assert!(matches!(
                codec.decrypt::<Value>(&URL_SAFE_NO_PAD.encode(&raw)),
                Err(DecryptionError::Authentication)
            ));

            let short = URL_SAFE_NO_PAD.encode([0u8; NONCE_SIZE + TAG_SIZE - 1]);
            assert!(matches!(
                codec.decrypt::<Value>(&short),
                Err(DecryptionError::TooShort { .. })
            ));
        }

        #[test]
        fn test_plaintext_payload_is_not_accepted_by_sealed_codec() {
            let encoded = Codec::insecure_plaintext()
                .encrypt(&json!({"enabled": true, "note": "plaintext"}))
                .unwrap();
            let sealed = Codec::new(SECRET).unwrap();
            assert!(sealed.decrypt::<Value>(&encoded).is_err());
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn round_trip_any_payload(
                key in "[a-z][a-z0-9-]{0,20}",
                text in ".{0,64}",
                number in any::<i64>(),
                flag in any::<bool>(),
            ) {
                let codec = Codec::new(SECRET).unwrap();
                let payload = json!({ key: { "text": text, "n": number, "on": flag } });
                let encoded = codec.encrypt(&payload).unwrap();
                let decoded: Value = codec.decrypt(&encoded).unwrap();
                prop_assert_eq!(decoded, payload);
            }
        }
    }
}
