use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Device credential cipher, AES-256-GCM with an on-disk key.
///
/// Secrets are stored as base64(nonce + ciphertext + tag) and decrypted
/// only for the duration of a single connection attempt.
pub struct SecretCipher {
    key_bytes: Vec<u8>,
}

impl SecretCipher {
    /// Loads the key file or generates one on first start.
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        let key_path = data_dir.join("secret.key");
        let key_bytes = if key_path.exists() {
            std::fs::read(&key_path)?
        } else {
            let rng = SystemRandom::new();
            let mut key = vec![0u8; 32];
            rng.fill(&mut key)
                .map_err(|_| anyhow::anyhow!("Failed to generate encryption key"))?;
            std::fs::write(&key_path, &key)?;
            // Restrict file permissions to owner-only (0600) on Unix
            #[cfg(unix)]
            {
                let perms = std::fs::Permissions::from_mode(0o600);
                std::fs::set_permissions(&key_path, perms)?;
            }
            tracing::info!(path = %key_path.display(), "Generated new secret encryption key");
            key
        };

        if key_bytes.len() != 32 {
            anyhow::bail!(
                "Invalid secret encryption key length: expected 32 bytes, got {}",
                key_bytes.len()
            );
        }

        Ok(Self { key_bytes })
    }

    /// Encrypts a secret, returning base64-encoded nonce + ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key_bytes)
            .map_err(|_| anyhow::anyhow!("Invalid encryption key"))?;
        let key = LessSafeKey::new(unbound_key);

        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow::anyhow!("Encryption failed"))?;

        // nonce (12 bytes) + ciphertext + tag
        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&in_out);
        Ok(general_purpose::STANDARD.encode(&result))
    }

    /// Decrypts base64-encoded nonce + ciphertext back to the secret.
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let data = general_purpose::STANDARD.decode(encrypted)?;
        if data.len() < NONCE_LEN + aead::AES_256_GCM.tag_len() {
            anyhow::bail!("Encrypted data too short");
        }

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key_bytes)
            .map_err(|_| anyhow::anyhow!("Invalid encryption key"))?;
        let key = LessSafeKey::new(unbound_key);

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Invalid nonce"))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow::anyhow!("Decryption failed"))?;

        Ok(String::from_utf8(plaintext.to_vec())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let dir = TempDir::new().unwrap();
        let cipher = SecretCipher::load_or_create(dir.path()).unwrap();

        let secret = "router-api-password";
        let encrypted = cipher.encrypt(secret).unwrap();
        assert_ne!(encrypted, secret);

        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, secret);
    }

    #[test]
    fn test_key_persists_across_reload() {
        let dir = TempDir::new().unwrap();

        let cipher1 = SecretCipher::load_or_create(dir.path()).unwrap();
        let encrypted = cipher1.encrypt("secret-123").unwrap();

        let cipher2 = SecretCipher::load_or_create(dir.path()).unwrap();
        assert_eq!(cipher2.decrypt(&encrypted).unwrap(), "secret-123");
    }

    #[test]
    fn test_wrong_key_fails() {
        let dir1 = TempDir::new().unwrap();
        let dir2 = TempDir::new().unwrap();

        let cipher1 = SecretCipher::load_or_create(dir1.path()).unwrap();
        let cipher2 = SecretCipher::load_or_create(dir2.path()).unwrap();

        let encrypted = cipher1.encrypt("secret").unwrap();
        assert!(cipher2.decrypt(&encrypted).is_err());
    }
}
