use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::crypto::{verify_with_pubkey_hex, KeyPair};

/// Unsigned transfer as assembled by the console
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub value: u64,
    pub nonce: u64,
}

impl TransactionRequest {
    fn signing_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn sign(self, keypair: &KeyPair) -> SignedTransaction {
        let signature = keypair.sign(&self.signing_bytes());
        SignedTransaction {
            public_key: keypair.public_key_hex(),
            signature: hex::encode(signature.to_bytes()),
            request: self,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub request: TransactionRequest,
    pub public_key: String,
    pub signature: String,
}

impl SignedTransaction {
    /// Hex SHA-256 of the unsigned request
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.request.signing_bytes()))
    }

    /// Signature is valid and the key owns `from`
    pub fn verify(&self) -> bool {
        let Ok(pk) = hex::decode(&self.public_key) else {
            return false;
        };
        Address::from_public_key(&pk) == self.request.from
            && verify_with_pubkey_hex(&self.request.signing_bytes(), &self.signature, &self.public_key)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub parent_hash: String,
    pub timestamp: u64,
    pub beneficiary: Option<Address>,
    pub transactions: Vec<SignedTransaction>,
    pub hash: String,
}

impl Block {
    pub fn new(number: u64, parent_hash: String, beneficiary: Option<Address>, transactions: Vec<SignedTransaction>) -> Self {
        let mut block = Block {
            number,
            parent_hash,
            timestamp: current_unix_timestamp_ms(),
            beneficiary,
            transactions,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    pub fn genesis() -> Self {
        let mut block = Block {
            number: 0,
            parent_hash: "0".repeat(64),
            timestamp: 0,
            beneficiary: None,
            transactions: vec![],
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// SHA-256 over everything but the hash itself
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.parent_hash.as_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        if let Some(b) = &self.beneficiary {
            hasher.update(b.as_bytes());
        }
        for tx in &self.transactions {
            hasher.update(tx.hash().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        bincode::deserialize(bytes).map_err(|e| e.to_string())
    }
}

pub fn current_unix_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
