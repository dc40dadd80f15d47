//! Secret bundle envelope: AES-256-CBC over a serialized secret list.
//!
//! Key material is either 32 raw bytes supplied as 64 hex chars, or
//! derived from a passphrase via PBKDF2-HMAC-SHA256 with a pinned salt
//! and iteration count. Changing either pinned value is a format
//! version bump: existing bundles become undecryptable.
//!
//! Envelope wire format: `hex(16-byte IV) ":" hex(ciphertext)`, with
//! PKCS7 padding and the plaintext being UTF-8 JSON of the secret list.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Result, SecretsError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Pinned PBKDF2 salt. Format version `v1`.
pub const PBKDF2_SALT: &[u8] = b"lsh-secret-bundle-v1";
/// Pinned PBKDF2 iteration count. Format version `v1`.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// One secret at rest inside the encrypted bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Secret {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Secret {
            key: key.into(),
            value: value.into(),
            description: None,
            tags: None,
        }
    }
}

/// Resolve caller-supplied key material to 32 raw bytes.
///
/// A 64-char hex string is interpreted as the raw key; anything else is
/// treated as a passphrase and stretched with PBKDF2.
pub fn derive_key(key: &str) -> Result<[u8; KEY_LEN]> {
    if key.is_empty() {
        return Err(SecretsError::InvalidKey("key must not be empty".into()));
    }
    if key.len() == KEY_LEN * 2 && key.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(key)
            .map_err(|_| SecretsError::InvalidKey("invalid hex key".into()))?;
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&bytes);
        return Ok(out);
    }
    Ok(pbkdf2_hmac_array::<Sha256, KEY_LEN>(
        key.as_bytes(),
        PBKDF2_SALT,
        PBKDF2_ITERATIONS,
    ))
}

/// Encrypt a secret list into the envelope format with a fresh IV.
pub fn encrypt_bundle(secrets: &[Secret], key: &str) -> Result<String> {
    let key = derive_key(key)?;
    let plaintext = serde_json::to_vec(secrets)?;

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|_| SecretsError::InvalidKey("wrong key length".into()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

    Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
}

/// Decrypt an envelope back into its secret list.
pub fn decrypt_bundle(envelope: &str, key: &str) -> Result<Vec<Secret>> {
    let key = derive_key(key)?;

    let (iv_hex, ct_hex) = envelope
        .split_once(':')
        .ok_or_else(|| SecretsError::InvalidEnvelope("missing ':' separator".into()))?;
    let iv = hex::decode(iv_hex)
        .map_err(|_| SecretsError::InvalidEnvelope("IV is not valid hex".into()))?;
    if iv.len() != IV_LEN {
        return Err(SecretsError::InvalidEnvelope(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    let ciphertext = hex::decode(ct_hex)
        .map_err(|_| SecretsError::InvalidEnvelope("ciphertext is not valid hex".into()))?;

    let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|_| SecretsError::InvalidKey("wrong key length".into()))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| SecretsError::DecryptFailed)?;

    // A wrong key that happens to unpad cleanly yields garbage bytes;
    // classify non-UTF-8 as a decryption failure, and only well-formed
    // text that fails to parse as a payload problem.
    let text =
        std::str::from_utf8(&plaintext).map_err(|_| SecretsError::DecryptFailed)?;
    serde_json::from_str(text)
        .map_err(|e| SecretsError::MalformedPayload(format!("not a secret list: {e}")))
}
