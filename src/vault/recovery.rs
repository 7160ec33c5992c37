//! Recovery phrases for freshly created keys

use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use super::VaultError;
use crate::crypto::SECRET_LEN;

/// Generate a 24-word phrase and the key seed it derives.
pub fn generate() -> Result<(String, Zeroizing<Vec<u8>>), VaultError> {
    let mut entropy = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut entropy[..]);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy[..])
        .map_err(|e| VaultError::Crypto(format!("Mnemonic generation failed: {}", e)))?;
    let phrase = mnemonic.to_string();
    let secret = seed_from_mnemonic(&mnemonic);
    Ok((phrase, secret))
}

/// Rebuild the key seed from an existing phrase
pub fn secret_from_phrase(phrase: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| VaultError::Crypto(format!("Invalid mnemonic: {}", e)))?;
    Ok(seed_from_mnemonic(&mnemonic))
}

// First 32 bytes of the BIP39 seed become the ed25519 secret.
fn seed_from_mnemonic(mnemonic: &Mnemonic) -> Zeroizing<Vec<u8>> {
    let seed = Zeroizing::new(mnemonic.to_seed(""));
    Zeroizing::new(seed[..SECRET_LEN].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_recovers_same_secret() {
        let (phrase, secret) = generate().unwrap();
        assert_eq!(phrase.split_whitespace().count(), 24);
        let again = secret_from_phrase(&phrase).unwrap();
        assert_eq!(secret.as_slice(), again.as_slice());
    }

    #[test]
    fn test_bad_phrase() {
        assert!(secret_from_phrase("not a real phrase").is_err());
    }
}
