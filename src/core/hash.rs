// Hashing utilities

use crate::core::{Hash256, PubKeyHash};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Single SHA256, used for block hashes, transaction IDs and signing digests
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256::new(Sha256::digest(data).into())
}

/// SHA256 double hash, used for address checksums
pub fn hash256(data: &[u8]) -> Hash256 {
    let first_hash = Sha256::digest(data);
    Hash256::new(Sha256::digest(first_hash).into())
}

/// RIPEMD160(SHA256(data)) - the locking hash of a public key
pub fn hash160(data: &[u8]) -> PubKeyHash {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}
