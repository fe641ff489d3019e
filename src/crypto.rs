//! Cryptographic operations for sealed modules
//!
//! Ciphertext format is plain AES-CBC over the PKCS#7-padded source:
//! - **Seal time**: source → pad → AES-CBC encrypt (key, IV) → `<stem>_encrypted.enc`
//! - **Import time**: `.enc` → AES-CBC decrypt → unpad → source → execute
//!
//! The AES variant follows the key length: 16, 24 or 32 bytes select
//! AES-128, AES-192 or AES-256. The IV is always one block (16 bytes).
//!
//! One key/IV pair is shared by every module in a process. A fixed IV makes
//! identical leading plaintext blocks produce identical ciphertext blocks
//! across modules; the format keeps this for compatibility with existing
//! sealed packages.

use crate::config::LoaderConfig;
use crate::{LoaderError, LoaderResult};
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ============================================================================
// Constants
// ============================================================================

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// IV size in bytes (one AES block)
pub const IV_SIZE: usize = BLOCK_SIZE;

/// Accepted key sizes in bytes
pub const KEY_SIZES: [usize; 3] = [16, 24, 32];

// ============================================================================
// Key Material
// ============================================================================

/// Symmetric key and IV shared by all decryptions in a process
///
/// Immutable after construction; bytes are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: Vec<u8>,
    iv: [u8; IV_SIZE],
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_bits", &(self.key.len() * 8))
            .field("iv", &"<redacted>")
            .finish()
    }
}

impl KeyMaterial {
    /// Build key material from raw bytes, validating both lengths
    pub fn new(key: &[u8], iv: &[u8]) -> LoaderResult<Self> {
        if !KEY_SIZES.contains(&key.len()) {
            return Err(LoaderError::Config(format!(
                "Key must be 16, 24 or 32 bytes, got {}",
                key.len()
            )));
        }
        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|_| {
            LoaderError::Config(format!("IV must be {} bytes, got {}", IV_SIZE, iv.len()))
        })?;

        Ok(Self {
            key: key.to_vec(),
            iv,
        })
    }

    /// Build key material from text, encoded as UTF-8
    pub fn from_text(key: &str, iv: &str) -> LoaderResult<Self> {
        Self::new(key.as_bytes(), iv.as_bytes())
    }

    /// Read key and IV from the process environment
    pub fn from_env(config: &LoaderConfig) -> LoaderResult<Self> {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }

    /// Read key and IV through an arbitrary variable lookup
    pub fn from_lookup<F>(config: &LoaderConfig, lookup: F) -> LoaderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = lookup(&config.key_var);
        let iv = lookup(&config.iv_var);

        match (key, iv) {
            (Some(mut key), Some(mut iv)) => {
                let keys = Self::from_text(&key, &iv);
                key.zeroize();
                iv.zeroize();
                keys
            }
            _ => Err(LoaderError::Config(format!(
                "Encryption key/IV must be set in environment variables {} and {}",
                config.key_var, config.iv_var
            ))),
        }
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        self.key.len()
    }

    /// Encrypt plaintext: PKCS#7 pad, then AES-CBC
    pub fn encrypt(&self, plaintext: &[u8]) -> LoaderResult<Vec<u8>> {
        let result = match self.key.len() {
            16 => cbc::Encryptor::<Aes128>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            24 => cbc::Encryptor::<Aes192>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            32 => cbc::Encryptor::<Aes256>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            n => {
                return Err(LoaderError::Encryption(format!(
                    "Unsupported key length {}",
                    n
                )))
            }
        };
        result.map_err(|e| LoaderError::Encryption(e.to_string()))
    }

    /// Decrypt ciphertext: AES-CBC over the whole buffer, then strip PKCS#7
    ///
    /// A wrong key, wrong IV or corrupted ciphertext usually surfaces as a
    /// padding error here. `module` is only used to label the error.
    pub fn decrypt(&self, module: &str, ciphertext: &[u8]) -> LoaderResult<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(LoaderError::integrity(
                module,
                format!(
                    "ciphertext length {} is not a positive multiple of {}",
                    ciphertext.len(),
                    BLOCK_SIZE
                ),
            ));
        }

        let result = match self.key.len() {
            16 => cbc::Decryptor::<Aes128>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            24 => cbc::Decryptor::<Aes192>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            32 => cbc::Decryptor::<Aes256>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            n => return Err(LoaderError::Config(format!("Unsupported key length {}", n))),
        };

        result
            .map_err(|e| LoaderError::Config(e.to_string()))?
            .map_err(|_| LoaderError::integrity(module, "invalid padding (wrong key/IV or corrupted data)"))
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// BLAKE3 digest of a plaintext, hex encoded
pub fn plaintext_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> KeyMaterial {
        KeyMaterial::from_text("0123456789abcdef0123456789abcdef", "fedcba9876543210").unwrap()
    }

    #[test]
    fn test_round_trip_across_block_boundaries() {
        let keys = keys();
        for len in 0..=(BLOCK_SIZE * 4 + 1) {
            let plaintext: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
            let ciphertext = keys.encrypt(&plaintext).unwrap();

            // PKCS#7 always adds at least one byte of padding
            assert_eq!(ciphertext.len(), (len / BLOCK_SIZE + 1) * BLOCK_SIZE);
            assert_eq!(keys.decrypt("m", &ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_all_key_sizes() {
        for size in KEY_SIZES {
            let key = vec![0x42u8; size];
            let keys = KeyMaterial::new(&key, &[7u8; IV_SIZE]).unwrap();
            let ciphertext = keys.encrypt(b"let VALUE = 42;").unwrap();
            assert_eq!(keys.decrypt("m", &ciphertext).unwrap(), b"let VALUE = 42;");
        }
    }

    #[test]
    fn test_known_answer_aes128_cbc() {
        // NIST SP 800-38A F.2.1, first block, followed by one full padding block
        let key = [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf,
            0x4f, 0x3c,
        ];
        let iv: Vec<u8> = (0u8..16).collect();
        let plaintext = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93,
            0x17, 0x2a,
        ];
        let expected = [
            0x76, 0x49, 0xab, 0xac, 0x81, 0x19, 0xb2, 0x46, 0xce, 0xe9, 0x8e, 0x9b, 0x12, 0xe9,
            0x19, 0x7d,
        ];

        let keys = KeyMaterial::new(&key, &iv).unwrap();
        let ciphertext = keys.encrypt(&plaintext).unwrap();
        assert_eq!(&ciphertext[..16], &expected);
    }

    #[test]
    fn test_invalid_lengths_rejected() {
        assert!(matches!(
            KeyMaterial::new(&[0u8; 15], &[0u8; 16]),
            Err(LoaderError::Config(_))
        ));
        assert!(matches!(
            KeyMaterial::new(&[0u8; 16], &[0u8; 8]),
            Err(LoaderError::Config(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails_padding() {
        let keys = keys();
        let plaintext = b"let VALUE = 42;";
        let ciphertext = keys.encrypt(plaintext).unwrap();

        // A garbage final block carries valid padding with probability ~1/256
        let mut padding_failures = 0;
        for i in 0..32u8 {
            let mut key = *b"0123456789abcdef0123456789abcdef";
            key[0] ^= i + 1;
            let wrong = KeyMaterial::new(&key, b"fedcba9876543210").unwrap();
            match wrong.decrypt("pkg.mod_a", &ciphertext) {
                Err(LoaderError::Integrity { .. }) => padding_failures += 1,
                Err(e) => panic!("unexpected error: {e}"),
                Ok(garbage) => assert_ne!(garbage, plaintext),
            }
        }
        assert!(padding_failures >= 28);
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let keys = keys();
        let ciphertext = keys.encrypt(b"some module source text").unwrap();
        let err = keys.decrypt("m", &ciphertext[..ciphertext.len() - 1]).unwrap_err();
        assert!(err.to_string().contains("not a positive multiple"));
        assert!(keys.decrypt("m", &[]).is_err());
    }

    #[test]
    fn test_from_lookup_missing_var() {
        let config = LoaderConfig::default();
        let err = KeyMaterial::from_lookup(&config, |name| {
            (name == config.key_var).then(|| "0123456789abcdef".to_string())
        })
        .unwrap_err();
        assert!(err.is_fatal_config());
        assert!(err.to_string().contains(&config.iv_var));
    }

    #[test]
    fn test_debug_redacts_bytes() {
        let debug = format!("{:?}", keys());
        assert!(debug.contains("key_bits: 256"));
        assert!(!debug.contains("0123456789abcdef"));
    }
}
