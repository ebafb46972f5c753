//! Handles the creation and verification of signatures.
//!
//! [Account] is the only type holding private key material. Everything else
//! in the crate signs by borrowing an account for the duration of one call.

use crate::types::Hash;
use sha3::{Digest, Keccak256};

mod hash;
mod k256;
mod molecule;
mod transaction;

pub use self::hash::{blake160, ckb_hash, CkbHasher};
pub use self::k256::{recover_signer, Account, Error};
pub use self::molecule::WitnessArgs;
pub use self::transaction::{
    Bytes, CellDep, CellInput, CellOutput, DepType, LockSigner, OutPoint, Script, ScriptGroup,
    ScriptHashType, ScriptType, Transaction, TransactionWithScriptGroups,
};

/// Digest signed by [Account::sign_data].
pub fn hash_data(data: &[u8]) -> Hash {
    Hash(Keccak256::digest(data).into())
}
