// Key management and base58check addresses

use crate::core::{PubKeyHash, hash160, hash256};
use crate::error::{ChainError, Result};
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Version byte prefixed to the public key hash
pub const ADDRESS_VERSION: u8 = 0x00;

const CHECKSUM_LENGTH: usize = 4;

/// Base58check address: version || pub_key_hash || checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create address from public key hash
    pub fn from_pub_key_hash(pub_key_hash: &PubKeyHash) -> Self {
        let mut payload = Vec::with_capacity(1 + 20 + CHECKSUM_LENGTH);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(pub_key_hash);
        let checksum = hash256(&payload);
        payload.extend_from_slice(&checksum.as_bytes()[..CHECKSUM_LENGTH]);

        Self(bs58::encode(payload).into_string())
    }

    /// Parse and validate an address string
    pub fn parse(s: &str) -> Result<Self> {
        let address = Self(s.to_string());
        address.pub_key_hash()?;
        Ok(address)
    }

    /// Get address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the public key hash, checking version and checksum
    pub fn pub_key_hash(&self) -> Result<PubKeyHash> {
        let invalid = |reason: String| ChainError::InvalidAddress(format!("{}: {}", self.0, reason));

        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| invalid(e.to_string()))?;
        if bytes.len() != 1 + 20 + CHECKSUM_LENGTH {
            return Err(invalid(format!("length {}", bytes.len())));
        }
        if bytes[0] != ADDRESS_VERSION {
            return Err(invalid(format!("version {}", bytes[0])));
        }

        let (payload, checksum) = bytes.split_at(1 + 20);
        if hash256(payload).as_bytes()[..CHECKSUM_LENGTH] != *checksum {
            return Err(invalid("checksum mismatch".to_string()));
        }

        let mut pub_key_hash = [0u8; 20];
        pub_key_hash.copy_from_slice(&payload[1..]);
        Ok(pub_key_hash)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Serializable key pair (for storage)
#[derive(Serialize, Deserialize)]
struct StoredKey {
    secret_key: String,
}

/// Key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secret_key.public_key(&secp);

        Self {
            secret_key,
            public_key,
        }
    }

    /// Create from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        let public_key = secret_key.public_key(&secp);

        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Compressed public key (33 bytes)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    pub fn pub_key_hash(&self) -> PubKeyHash {
        hash160(&self.public_key_bytes())
    }

    pub fn address(&self) -> Address {
        Address::from_pub_key_hash(&self.pub_key_hash())
    }
}

#[derive(Serialize, Deserialize, Default)]
struct KeystoreFile {
    keys: BTreeMap<Address, StoredKey>,
}

/// Keystore - manages multiple key pairs
#[derive(Default)]
pub struct Keystore {
    keys: BTreeMap<Address, KeyPair>,
}

impl Keystore {
    /// Create a new keystore
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new address
    pub fn new_address(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address();
        self.keys.insert(address.clone(), keypair);
        address
    }

    /// Get key pair for address
    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// All addresses in sorted order
    pub fn list_addresses(&self) -> Vec<Address> {
        self.keys.keys().cloned().collect()
    }

    /// Count addresses
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Save keystore to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = KeystoreFile {
            keys: self
                .keys
                .iter()
                .map(|(address, keypair)| {
                    let stored = StoredKey {
                        secret_key: hex::encode(keypair.secret_key.secret_bytes()),
                    };
                    (address.clone(), stored)
                })
                .collect(),
        };

        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Load keystore from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file: KeystoreFile = serde_json::from_str(&fs::read_to_string(path)?)?;

        let mut keys = BTreeMap::new();
        for (address, stored) in file.keys {
            let bytes = hex::decode(&stored.secret_key)
                .map_err(|e| ChainError::Keystore(format!("bad key for {}: {}", address, e)))?;
            let keypair = KeyPair::from_secret_bytes(&bytes)?;
            if keypair.address() != address {
                return Err(ChainError::Keystore(format!(
                    "key does not match address {}",
                    address
                )));
            }
            keys.insert(address, keypair);
        }

        Ok(Self { keys })
    }

    /// Load the keystore at `path`, or start an empty one if the file does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}
