// Consensus rules: proof of work

pub mod pow;

pub use pow::{DIFFICULTY, MiningResult, ProofOfWork, Target};
