//! Random tokens, salted hashes and a passphrase-based AES cipher

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use md5::Md5;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const BLOCK_SIZE: usize = 16;

/// `n` random ASCII letters and digits
pub fn rand_string(n: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

/// `n` random decimal digits
pub fn rand_digit(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn digest(salt: &str, data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of `salt + data` in hex. Without a salt a random one is
/// generated and appended as `hash:salt`.
pub fn hashed(data: &str, salt: Option<&str>) -> String {
    match salt {
        Some(salt) => digest(salt, data),
        None => {
            let salt = uuid::Uuid::new_v4().simple().to_string();
            format!("{}:{}", digest(&salt, data), salt)
        }
    }
}

/// Check `data` against the output of [`hashed`]
pub fn check_hash(hashed_data: &str, data: &str, salt: Option<&str>) -> bool {
    let (hash, salt) = match salt {
        Some(salt) => (hashed_data, salt),
        None => match hashed_data.split_once(':') {
            Some(parts) => parts,
            None => return false,
        },
    };
    hash == digest(salt, data)
}

/// AES-128-CBC keyed by the MD5 of a passphrase.
///
/// Tokens are urlsafe base64 of `iv || ciphertext`, with a random IV per
/// message and PKCS7 padding.
#[derive(Clone)]
pub struct AesCipher {
    key: [u8; BLOCK_SIZE],
}

impl AesCipher {
    pub fn new(passphrase: &str) -> Self {
        let mut key = [0u8; BLOCK_SIZE];
        key.copy_from_slice(&Md5::digest(passphrase.as_bytes()));
        Self { key }
    }

    pub fn encrypt(&self, data: &str) -> Result<String> {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill(&mut iv);
        self.seal(&iv, data.as_bytes())
    }

    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>> {
        let raw = URL_SAFE
            .decode(token.trim())
            .map_err(|e| Error::Crypto(format!("bad token encoding: {}", e)))?;
        if raw.len() < 2 * BLOCK_SIZE || raw.len() % BLOCK_SIZE != 0 {
            return Err(Error::Crypto(format!("bad token length {}", raw.len())));
        }

        let (iv, body) = raw.split_at(BLOCK_SIZE);
        Aes128CbcDec::new_from_slices(&self.key, iv)
            .map_err(|e| Error::Crypto(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| Error::Crypto("wrong key or corrupted token".into()))
    }

    fn seal(&self, iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<String> {
        let body = Aes128CbcEnc::new_from_slices(&self.key, iv)
            .map_err(|e| Error::Crypto(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(data);

        let mut raw = Vec::with_capacity(BLOCK_SIZE + body.len());
        raw.extend_from_slice(iv);
        raw.extend_from_slice(&body);
        Ok(URL_SAFE.encode(raw))
    }
}

impl std::fmt::Debug for AesCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesCipher { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_tokens() {
        let s = rand_string(32);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));

        let d = rand_digit(12);
        assert_eq!(d.len(), 12);
        assert!(d.chars().all(|c| c.is_ascii_digit()));
        assert!(rand_digit(0).is_empty());
    }

    #[test]
    fn test_known_digest() {
        // sha256("abc")
        assert_eq!(
            hashed("c", Some("ab")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_generated_salt() {
        let h = hashed("secret", None);
        let (hash, salt) = h.split_once(':').unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(salt.len(), 32);
        assert!(check_hash(&h, "secret", None));
        assert!(!check_hash(&h, "Secret", None));
        assert!(!check_hash("no-separator", "secret", None));
    }

    #[test]
    fn test_explicit_salt() {
        let h = hashed("secret", Some("pepper"));
        assert!(check_hash(&h, "secret", Some("pepper")));
        assert!(!check_hash(&h, "secret", Some("salt")));
    }

    #[test]
    fn test_cipher_known_token() {
        // openssl enc -aes-128-cbc, key = md5("sll-passphrase"), iv = 00..0f
        let cipher = AesCipher::new("sll-passphrase");
        let iv: [u8; BLOCK_SIZE] = std::array::from_fn(|i| i as u8);
        let token = cipher.seal(&iv, b"report 2026-10-18").unwrap();
        assert_eq!(
            token,
            "AAECAwQFBgcICQoLDA0OD9wnRvtloV1dWkv0NL940apTROUUa6X_DbXAi56rTvXY"
        );
        assert_eq!(cipher.decrypt(&token).unwrap(), b"report 2026-10-18");
    }

    #[test]
    fn test_cipher_round_trip_uses_fresh_iv() {
        let cipher = AesCipher::new("pass");
        let a = cipher.encrypt("user=42&plan=pro").unwrap();
        let b = cipher.encrypt("user=42&plan=pro").unwrap();
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/'));
        assert_eq!(cipher.decrypt(&a).unwrap(), b"user=42&plan=pro");
        assert_eq!(cipher.decrypt(&b).unwrap(), b"user=42&plan=pro");

        let empty = cipher.encrypt("").unwrap();
        assert!(cipher.decrypt(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_cipher_rejects_bad_tokens() {
        let cipher = AesCipher::new("pass");
        let token = cipher.encrypt("secret data").unwrap();

        let other = AesCipher::new("other pass");
        assert_ne!(other.decrypt(&token).ok(), Some(b"secret data".to_vec()));

        assert!(matches!(cipher.decrypt("not base64!"), Err(Error::Crypto(_))));
        assert!(matches!(cipher.decrypt("AAECAwQF"), Err(Error::Crypto(_))));
    }
}
