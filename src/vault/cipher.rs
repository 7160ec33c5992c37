//! Password hashing and at-rest encryption for vault entries

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::VaultError;
use crate::error::AuthError;

const PBKDF2_ROUNDS: u32 = 100_000;
const NONCE_LEN: usize = 12;

/// Hash a password using Argon2id, returning the PHC string
pub fn hash_password(password: &str) -> Result<String, VaultError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| VaultError::Crypto(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a hash
pub fn verify_password(password: &str, password_hash: &str) -> Result<(), VaultError> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|e| VaultError::Crypto(format!("Stored hash unreadable: {}", e)))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| VaultError::Auth(AuthError::WrongPassword))
}

pub fn random_salt() -> Vec<u8> {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    salt.to_vec()
}

/// Derive an encryption key from a password and salt
fn derive_encryption_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key[..]);
    key
}

/// AES-256-GCM, nonce prepended to the ciphertext
pub fn encrypt_data(data: &[u8], password: &str, salt: &[u8]) -> Result<Vec<u8>, VaultError> {
    let key = derive_encryption_key(password, salt);
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| VaultError::Crypto("Invalid key length".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|_| VaultError::Crypto("Encryption failed".to_string()))?;

    let mut blob = nonce_bytes.to_vec();
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// A failed decrypt is reported as a wrong password.
pub fn decrypt_data(encrypted: &[u8], password: &str, salt: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if encrypted.len() < NONCE_LEN {
        return Err(VaultError::Crypto("Ciphertext too short".to_string()));
    }
    let key = derive_encryption_key(password, salt);
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| VaultError::Crypto("Invalid key length".to_string()))?;

    let nonce = Nonce::from_slice(&encrypted[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &encrypted[NONCE_LEN..])
        .map(Zeroizing::new)
        .map_err(|_| VaultError::Auth(AuthError::WrongPassword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("my_secure_password_123").unwrap();
        assert!(verify_password("my_secure_password_123", &hash).is_ok());
        assert!(matches!(
            verify_password("wrong_password", &hash),
            Err(VaultError::Auth(AuthError::WrongPassword))
        ));
    }

    #[test]
    fn test_encryption() {
        let salt = random_salt();
        let encrypted = encrypt_data(b"sensitive data", "pw", &salt).unwrap();
        let decrypted = decrypt_data(&encrypted, "pw", &salt).unwrap();
        assert_eq!(b"sensitive data", decrypted.as_slice());

        assert!(matches!(
            decrypt_data(&encrypted, "other", &salt),
            Err(VaultError::Auth(AuthError::WrongPassword))
        ));
    }
}
