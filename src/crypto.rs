//! Envelope encryption for per-account provider tokens (spec §4.6, §5).
//!
//! A process-wide master key wraps one randomly generated data-encryption
//! key (DEK) per account; the DEK in turn wraps the account's OAuth tokens.
//! Both layers use AES-256-GCM. Refresh tokens never leave the account
//! holder; only encrypted bytes are persisted.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sealed {
    pub nonce_b64: String,
    pub ciphertext_b64: String,
}

fn b64() -> base64::engine::general_purpose::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

fn seal(key_bytes: &[u8; 32], plaintext: &[u8]) -> Result<Sealed> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::invariant(format!("encryption failed: {e}")))?;
    Ok(Sealed {
        nonce_b64: b64().encode(nonce_bytes),
        ciphertext_b64: b64().encode(ciphertext),
    })
}

fn unseal(key_bytes: &[u8; 32], sealed: &Sealed) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
    let nonce_bytes = b64()
        .decode(&sealed.nonce_b64)
        .map_err(|e| Error::invariant(format!("bad nonce encoding: {e}")))?;
    let ciphertext = b64()
        .decode(&sealed.ciphertext_b64)
        .map_err(|e| Error::invariant(format!("bad ciphertext encoding: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|e| Error::invariant(format!("decryption failed: {e}")))
}

/// The process-wide long-lived secret; rotation is out of scope (spec §5).
#[derive(Clone)]
pub struct MasterKey(pub [u8; 32]);

impl MasterKey {
    pub fn from_env(var_name: &str) -> Result<Self> {
        let raw = std::env::var(var_name)
            .map_err(|_| Error::invariant(format!("missing master key env var {var_name}")))?;
        let decoded = b64()
            .decode(raw.trim())
            .map_err(|e| Error::invariant(format!("master key must be base64: {e}")))?;
        if decoded.len() != 32 {
            return Err(Error::invariant("master key must decode to 32 bytes"));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    #[cfg(test)]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// One account's wrapped data-encryption key plus its sealed token bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedTokenBundle {
    pub wrapped_dek: Sealed,
    pub sealed_tokens: Sealed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: String,
}

/// Generates a fresh DEK, wraps it under the master key, and seals
/// `tokens` under the DEK.
pub fn encrypt_tokens(master: &MasterKey, tokens: &TokenPair) -> Result<EncryptedTokenBundle> {
    let mut dek = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut dek);
    let wrapped_dek = seal(&master.0, &dek)?;
    let plaintext = serde_json::to_vec(tokens).map_err(|e| Error::invariant(e.to_string()))?;
    let sealed_tokens = seal(&dek, &plaintext)?;
    Ok(EncryptedTokenBundle {
        wrapped_dek,
        sealed_tokens,
    })
}

/// Unwraps the DEK under the master key, then unseals the token bundle.
pub fn decrypt_tokens(master: &MasterKey, bundle: &EncryptedTokenBundle) -> Result<TokenPair> {
    let dek_bytes = unseal(&master.0, &bundle.wrapped_dek)?;
    if dek_bytes.len() != 32 {
        return Err(Error::invariant("unwrapped dek has wrong length"));
    }
    let mut dek = [0u8; 32];
    dek.copy_from_slice(&dek_bytes);
    let plaintext = unseal(&dek, &bundle.sealed_tokens)?;
    serde_json::from_slice(&plaintext).map_err(|e| Error::invariant(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip_through_envelope() {
        let master = MasterKey::generate();
        let tokens = TokenPair {
            access_token: "at-123".into(),
            refresh_token: "rt-456".into(),
            expires_at: "2026-02-15T10:00:00Z".into(),
        };
        let bundle = encrypt_tokens(&master, &tokens).unwrap();
        let recovered = decrypt_tokens(&master, &bundle).unwrap();
        assert_eq!(recovered.access_token, tokens.access_token);
        assert_eq!(recovered.refresh_token, tokens.refresh_token);
    }

    #[test]
    fn wrong_master_key_fails_to_unwrap() {
        let master = MasterKey::generate();
        let other = MasterKey::generate();
        let tokens = TokenPair {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: "2026-02-15T10:00:00Z".into(),
        };
        let bundle = encrypt_tokens(&master, &tokens).unwrap();
        assert!(decrypt_tokens(&other, &bundle).is_err());
    }
}
