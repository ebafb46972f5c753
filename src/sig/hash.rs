//! Blake2b-256 as used on CKB: personalized with `ckb-default-hash`.

use blake2::{
    digest::{
        core_api::{Buffer, UpdateCore, VariableOutputCore},
        Output,
    },
    Blake2bVarCore,
};

use crate::types::{Address, Hash};

const PERSONALIZATION: &[u8] = b"ckb-default-hash";

/// Incremental CKB hasher.
pub struct CkbHasher {
    core: Blake2bVarCore,
    buffer: Buffer<Blake2bVarCore>,
}

impl Default for CkbHasher {
    fn default() -> Self {
        Self {
            core: Blake2bVarCore::new_with_params(&[], PERSONALIZATION, 0, Hash::LEN),
            buffer: Default::default(),
        }
    }
}

impl CkbHasher {
    pub fn update(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        let core = &mut self.core;
        self.buffer
            .digest_blocks(data.as_ref(), |blocks| core.update_blocks(blocks));
        self
    }

    pub fn finalize(mut self) -> Hash {
        let mut out = Output::<Blake2bVarCore>::default();
        self.core.finalize_variable_core(&mut self.buffer, &mut out);
        let mut hash = Hash::default();
        hash.0.copy_from_slice(&out[..Hash::LEN]);
        hash
    }
}

pub fn ckb_hash(data: &[u8]) -> Hash {
    let mut hasher = CkbHasher::default();
    hasher.update(data);
    hasher.finalize()
}

/// First 20 bytes of the CKB hash, the lock args of the default lock.
pub fn blake160(data: &[u8]) -> Address {
    let mut addr = Address::default();
    addr.0.copy_from_slice(&ckb_hash(data).0[..20]);
    addr
}
