use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Result, anyhow};
use base64::Engine;
use hmac::Mac;
use sha2::Sha256;

type HmacSha256 = hmac::Hmac<Sha256>;

const KEY_CONTEXT: &[u8] = b"agent-portal-credentials-v1";

/// Encrypts OAuth tokens before they reach the database.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

/// Derive a 256-bit key with HMAC-SHA256 over `input`.
fn derive_key(input: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(KEY_CONTEXT)
        .map_err(|e| anyhow!("Key derivation failed: {}", e))?;
    mac.update(input);
    let bytes = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Fallback key material tied to the local machine and user, so a copied
/// database is unreadable elsewhere.
fn machine_identity() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();
    format!("{}{}", hostname, username)
}

impl TokenCipher {
    pub fn new(secret: Option<&str>) -> Result<Self> {
        let key = match secret {
            Some(s) if !s.is_empty() => derive_key(s.as_bytes())?,
            _ => derive_key(machine_identity().as_bytes())?,
        };
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| anyhow!("Invalid cipher key: {}", e))?;
        Ok(Self { cipher })
    }

    /// Encrypt a plaintext value. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) value. Returns plaintext.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow!("Base64 decode failed: {}", e))?;

        if combined.len() < 13 {
            return Err(anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("UTF-8 decode failed: {}", e))
    }
}
