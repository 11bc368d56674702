//! Script verification, sighash, and signing.

pub mod flags;
pub mod interpreter;
pub mod opcodes;
pub mod schnorr;
mod secp;
pub mod sighash;
pub mod sign;
pub mod standard;
