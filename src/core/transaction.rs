// Transaction data structures, signing and verification

use super::serialize::{read_array, read_len, read_var_bytes, write_var_bytes, write_varint};
use crate::core::{Hash256, PubKeyHash, Serializable, hash160, sha256};
use crate::error::{ChainError, Result};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};
use std::collections::HashMap;
use std::io::Read;

/// Fixed block reward paid by every coinbase transaction
pub const REWARD: u64 = 10;

/// Output index carried by a coinbase input (it references nothing)
pub const COINBASE_INDEX: u32 = u32::MAX;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// ID of the transaction holding the spent output
    pub prev_tx_id: Hash256,
    /// Index of the output in the previous transaction
    pub prev_index: u32,
    /// DER encoded ECDSA signature
    pub signature: Vec<u8>,
    /// Compressed public key of the signer. Coinbase inputs carry free-form data here.
    pub public_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `prev_tx_id:prev_index`
    pub fn new(prev_tx_id: Hash256, prev_index: u32) -> Self {
        Self {
            prev_tx_id,
            prev_index,
            signature: Vec::new(),
            public_key: Vec::new(),
        }
    }

    /// Create a coinbase input
    pub fn coinbase(data: Vec<u8>) -> Self {
        Self {
            prev_tx_id: Hash256::zero(),
            prev_index: COINBASE_INDEX,
            signature: Vec::new(),
            public_key: data,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_id.is_zero() && self.prev_index == COINBASE_INDEX
    }

    /// Whether this input was signed by the owner of `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        hash160(&self.public_key) == *pub_key_hash
    }

    fn encode(&self, buf: &mut Vec<u8>, with_signature: bool) {
        buf.extend_from_slice(self.prev_tx_id.as_bytes());
        buf.extend_from_slice(&self.prev_index.to_le_bytes());
        if with_signature {
            write_var_bytes(buf, &self.signature);
        } else {
            write_var_bytes(buf, &[]);
        }
        write_var_bytes(buf, &self.public_key);
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let prev_tx_id = Hash256::new(read_array(reader)?);
        let prev_index = u32::from_le_bytes(read_array(reader)?);
        let signature = read_var_bytes(reader)?;
        let public_key = read_var_bytes(reader)?;

        Ok(Self {
            prev_tx_id,
            prev_index,
            signature,
            public_key,
        })
    }
}

/// Transaction output - an amount locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    /// Locking condition: only a key hashing to this value may spend the output
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    pub fn new(value: u64, pub_key_hash: PubKeyHash) -> Self {
        Self {
            value,
            pub_key_hash,
        }
    }

    pub fn is_locked_with(&self, pub_key_hash: &PubKeyHash) -> bool {
        self.pub_key_hash == *pub_key_hash
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&self.pub_key_hash);
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let value = u64::from_le_bytes(read_array(reader)?);
        let pub_key_hash = read_array(reader)?;
        Ok(Self {
            value,
            pub_key_hash,
        })
    }
}

/// Transaction
///
/// `id` is always derived from the content with signatures blanked. It is
/// never part of the encoding and is recomputed on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a new transaction and derive its ID
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Create a coinbase transaction paying the block reward to `to`.
    /// Empty `data` is replaced with random bytes so each coinbase gets a distinct ID.
    pub fn coinbase(to: PubKeyHash, data: Vec<u8>) -> Self {
        let data = if data.is_empty() {
            rand::random::<[u8; 24]>().to_vec()
        } else {
            data
        };
        Self::new(vec![TxInput::coinbase(data)], vec![TxOutput::new(REWARD, to)])
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Hash of the encoding with every signature blanked
    pub fn compute_id(&self) -> Hash256 {
        let mut buf = Vec::new();
        self.encode(&mut buf, false);
        sha256(&buf)
    }

    /// Copy with all signatures and public keys blanked, the base of every signing digest
    fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput::new(input.prev_tx_id, input.prev_index))
            .collect();
        Self {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Locate the output spent by `input` among `prev_txs`
    fn prior_output<'a>(
        &self,
        input: &TxInput,
        prev_txs: &'a HashMap<Hash256, Transaction>,
    ) -> Result<&'a TxOutput> {
        let prev_tx = prev_txs
            .get(&input.prev_tx_id)
            .ok_or(ChainError::TransactionNotFound(input.prev_tx_id))?;
        prev_tx
            .outputs
            .get(input.prev_index as usize)
            .ok_or_else(|| {
                ChainError::InvalidTransaction(
                    self.id,
                    format!(
                        "input references missing output {}:{}",
                        input.prev_tx_id, input.prev_index
                    ),
                )
            })
    }

    /// Digest signed for input `index`: the trimmed copy with that input's
    /// public key slot holding the locking hash of the output it spends
    fn signing_digest(trimmed: &mut Transaction, index: usize, locking: &PubKeyHash) -> Message {
        trimmed.inputs[index].public_key = locking.to_vec();
        let digest = sha256(&trimmed.serialize());
        trimmed.inputs[index].public_key = Vec::new();
        Message::from_digest(digest.0)
    }

    /// Sign every input with `secret_key`
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let secp = Secp256k1::signing_only();
        let public_key = secret_key.public_key(&secp).serialize().to_vec();
        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let locking = self.prior_output(&self.inputs[index], prev_txs)?.pub_key_hash;
            let message = Self::signing_digest(&mut trimmed, index, &locking);

            let signature = secp.sign_ecdsa(&message, secret_key);
            self.inputs[index].signature = signature.serialize_der().to_vec();
            self.inputs[index].public_key = public_key.clone();
        }

        // public keys are part of the ID
        self.id = self.compute_id();
        Ok(())
    }

    /// Check every input signature against the outputs it spends.
    /// A prior transaction missing from `prev_txs` is an error, any other failure is `false`.
    pub fn verify(&self, prev_txs: &HashMap<Hash256, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let secp = Secp256k1::verification_only();
        let mut trimmed = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let locking = match self.prior_output(input, prev_txs) {
                Ok(output) => output.pub_key_hash,
                Err(ChainError::InvalidTransaction(..)) => return Ok(false),
                Err(e) => return Err(e),
            };

            if !input.uses_key(&locking) {
                return Ok(false);
            }

            let message = Self::signing_digest(&mut trimmed, index, &locking);

            let Ok(public_key) = PublicKey::from_slice(&input.public_key) else {
                return Ok(false);
            };
            let Ok(signature) = Signature::from_der(&input.signature) else {
                return Ok(false);
            };

            if secp.verify_ecdsa(&message, &signature, &public_key).is_err() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn encode(&self, buf: &mut Vec<u8>, with_signatures: bool) {
        write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode(buf, with_signatures);
        }

        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(buf);
        }
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf, true);
        buf
    }

    fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let input_count = read_len(reader)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::decode(reader)?);
        }

        let output_count = read_len(reader)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::decode(reader)?);
        }

        Ok(Self::new(inputs, outputs))
    }
}
