use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::address::Address;

pub const SECRET_LEN: usize = 32;

pub struct KeyPair {
    pub signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new Ed25519 keypair
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        KeyPair { signing_key: SigningKey::generate(&mut csprng) }
    }

    /// Rebuild a keypair from raw secret bytes (32-byte seed)
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, String> {
        let seed: [u8; SECRET_LEN] = bytes
            .try_into()
            .map_err(|_| format!("Secret must be {} bytes, got {}", SECRET_LEN, bytes.len()))?;
        Ok(KeyPair { signing_key: SigningKey::from_bytes(&seed) })
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_LEN] {
        self.signing_key.to_bytes()
    }

    /// Sign a message with the private key
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().to_bytes())
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(self.public_key().as_bytes())
    }
}

/// Verify a signature against a message with a provided public key (hex)
pub fn verify_with_pubkey_hex(message: &[u8], signature_hex: &str, pubkey_hex: &str) -> bool {
    let (Ok(sig_bytes), Ok(pk_bytes)) = (hex::decode(signature_hex), hex::decode(pubkey_hex)) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let Ok(pk_bytes) = <[u8; 32]>::try_from(pk_bytes.as_slice()) else {
        return false;
    };
    match VerifyingKey::from_bytes(&pk_bytes) {
        Ok(pubkey) => pubkey.verify(message, &Signature::from_bytes(&sig_bytes)).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_hex() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"hello");
        let sig_hex = hex::encode(sig.to_bytes());

        assert!(verify_with_pubkey_hex(b"hello", &sig_hex, &kp.public_key_hex()));
        assert!(!verify_with_pubkey_hex(b"tampered", &sig_hex, &kp.public_key_hex()));
    }

    #[test]
    fn test_secret_bytes_restore_same_address() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(&kp.secret_bytes()).unwrap();
        assert_eq!(kp.address(), restored.address());
        assert!(KeyPair::from_secret_bytes(&[1, 2, 3]).is_err());
    }
}
