use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub const CREDENTIAL_KEY_ENV: &str = "NEWSROOM_CREDENTIAL_KEY";

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const ENVELOPE_VERSION: u8 = 1;

/// Seals token values at rest when `NEWSROOM_CREDENTIAL_KEY` is set.
/// Without a key, values pass through in plaintext. A sealed value read
/// back without a key is an error: a credential store must never silently
/// drop token material.
#[derive(Debug, Clone)]
pub struct TokenCipher {
    key: Option<[u8; KEY_BYTES]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenEnvelope {
    version: u8,
    nonce_hex: String,
    ciphertext_hex: String,
}

impl TokenCipher {
    pub fn from_env() -> Result<Self, StoreError> {
        let raw = std::env::var(CREDENTIAL_KEY_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let key = raw
            .map(|value| parse_key_hex(&value))
            .transpose()
            .map_err(|e| {
                StoreError::Config(format!(
                    "{CREDENTIAL_KEY_ENV} must be 64 hex characters (32 bytes): {e}"
                ))
            })?;

        Ok(Self { key })
    }

    #[cfg(test)]
    pub(crate) fn plaintext() -> Self {
        Self { key: None }
    }

    pub fn protect(&self, token: &str) -> Result<String, StoreError> {
        let Some(key) = &self.key else {
            return Ok(token.to_string());
        };
        seal(token, key)
    }

    pub fn reveal(&self, stored: &str) -> Result<String, StoreError> {
        let envelope = match serde_json::from_str::<TokenEnvelope>(stored) {
            Ok(envelope) => envelope,
            // Plaintext record, possibly written before a key existed.
            Err(_) => return Ok(stored.to_string()),
        };

        let Some(key) = &self.key else {
            return Err(StoreError::Crypto(format!(
                "stored credential is encrypted but {CREDENTIAL_KEY_ENV} is not set"
            )));
        };

        open(&envelope, key)
    }
}

fn seal(token: &str, key: &[u8; KEY_BYTES]) -> Result<String, StoreError> {
    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| StoreError::Crypto("construct AES-256-GCM key".to_string()))?;
    let sealing_key = LessSafeKey::new(unbound_key);

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| StoreError::Crypto("generate random nonce".to_string()))?;

    let mut buffer = token.as_bytes().to_vec();
    sealing_key
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut buffer,
        )
        .map_err(|_| StoreError::Crypto("encrypt credential token".to_string()))?;

    let envelope = TokenEnvelope {
        version: ENVELOPE_VERSION,
        nonce_hex: hex_encode(&nonce_bytes),
        ciphertext_hex: hex_encode(&buffer),
    };

    Ok(serde_json::to_string(&envelope)?)
}

fn open(envelope: &TokenEnvelope, key: &[u8; KEY_BYTES]) -> Result<String, StoreError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(StoreError::Crypto(format!(
            "unsupported credential envelope version {}",
            envelope.version
        )));
    }

    let nonce_vec = hex_decode(&envelope.nonce_hex)?;
    let nonce_bytes: [u8; NONCE_BYTES] = nonce_vec
        .try_into()
        .map_err(|_| StoreError::Crypto("invalid nonce length in envelope".to_string()))?;
    let mut ciphertext = hex_decode(&envelope.ciphertext_hex)?;

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| StoreError::Crypto("construct AES-256-GCM key".to_string()))?;
    let opening_key = LessSafeKey::new(unbound_key);

    let plaintext = opening_key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| StoreError::Crypto("decrypt credential token".to_string()))?;

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| StoreError::Crypto("decrypted token is not valid UTF-8".to_string()))
}

fn parse_key_hex(raw: &str) -> Result<[u8; KEY_BYTES], StoreError> {
    let decoded = hex_decode(raw)?;
    decoded
        .try_into()
        .map_err(|_| StoreError::Crypto("credential key must be 32 bytes".to_string()))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

fn hex_decode(raw: &str) -> Result<Vec<u8>, StoreError> {
    let value = raw.trim();
    if value.len() % 2 != 0 {
        return Err(StoreError::Crypto(
            "hex string length must be even".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(value.len() / 2);
    let bytes = value.as_bytes();
    let mut idx = 0usize;
    while idx < bytes.len() {
        let hi = decode_hex_nibble(bytes[idx])
            .ok_or_else(|| StoreError::Crypto("invalid hex digit".to_string()))?;
        let lo = decode_hex_nibble(bytes[idx + 1])
            .ok_or_else(|| StoreError::Crypto("invalid hex digit".to_string()))?;
        out.push((hi << 4) | lo);
        idx += 2;
    }
    Ok(out)
}

fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
