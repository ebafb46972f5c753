//! Transactions handed to the wallet for signing, grouped by script.
//!
//! The blockchain backend builds the transaction and tells the wallet which
//! inputs belong to which lock script. The wallet only signs the groups locked
//! by its own address.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::{
    hash::{ckb_hash, CkbHasher},
    molecule::{self, WitnessArgs},
    Account,
};
use crate::{
    address::OnChainAddress,
    error::SigningError,
    types::{decode_hex, Hash, Signature},
};

/// Byte string, `0x` prefixed hex in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bytes(pub Vec<u8>);

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_hex(&s).map(Bytes).map_err(de::Error::custom)
    }
}

/// JSON quantities as the node RPC writes them: `0x` prefixed hex without
/// leading zeroes. Plain numbers are accepted too.
mod quantity {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Hex(String),
        Number(u64),
    }

    pub fn serialize<T, S>(v: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Copy + Into<u64>,
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#x}", (*v).into()))
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: TryFrom<u64>,
        D: Deserializer<'de>,
    {
        let v = match Repr::deserialize(deserializer)? {
            Repr::Number(n) => n,
            Repr::Hex(s) => {
                let digits = s
                    .strip_prefix("0x")
                    .ok_or_else(|| de::Error::custom(format!("quantity {s:?} lacks 0x prefix")))?;
                u64::from_str_radix(digits, 16).map_err(de::Error::custom)?
            }
        };
        T::try_from(v).map_err(|_| de::Error::custom(format!("quantity {v:#x} out of range")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptHashType {
    Data,
    Type,
    Data1,
    Data2,
}

impl ScriptHashType {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            ScriptHashType::Data => 0,
            ScriptHashType::Type => 1,
            ScriptHashType::Data1 => 2,
            ScriptHashType::Data2 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub code_hash: Hash,
    pub hash_type: ScriptHashType,
    pub args: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash,
    #[serde(with = "quantity")]
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    Code,
    DepGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: DepType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInput {
    pub previous_output: OutPoint,
    #[serde(with = "quantity")]
    pub since: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellOutput {
    #[serde(with = "quantity")]
    pub capacity: u64,
    pub lock: Script,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<Script>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "quantity")]
    pub version: u32,
    #[serde(default)]
    pub cell_deps: Vec<CellDep>,
    #[serde(default)]
    pub header_deps: Vec<Hash>,
    pub inputs: Vec<CellInput>,
    pub outputs: Vec<CellOutput>,
    #[serde(default)]
    pub outputs_data: Vec<Bytes>,
    #[serde(default)]
    pub witnesses: Vec<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Lock,
    Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptGroup {
    pub script: Script,
    pub group_type: ScriptType,
    #[serde(default)]
    pub input_indices: Vec<u32>,
    #[serde(default)]
    pub output_indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionWithScriptGroups {
    pub tx_view: Transaction,
    pub script_groups: Vec<ScriptGroup>,
}

impl Transaction {
    /// CKB transaction hash: the hash of the molecule encoded raw
    /// transaction, which leaves out the witnesses.
    pub fn hash(&self) -> Hash {
        ckb_hash(&molecule::raw_transaction(self))
    }
}

fn malformed(msg: impl Into<String>) -> SigningError {
    SigningError::MalformedTransaction(msg.into())
}

/// Witness of the first input of a group with the signature replaced by a
/// zeroed placeholder.
fn placeholder_witness(witness: &Bytes) -> Result<WitnessArgs, SigningError> {
    let mut args = if witness.0.is_empty() {
        WitnessArgs::default()
    } else {
        WitnessArgs::from_bytes(&witness.0)?
    };
    args.lock = Some(vec![0; Signature::LEN]);
    Ok(args)
}

/// Digest signed for one script group (sighash-all).
///
/// Covers the transaction hash, every witness of the group with the first one
/// carrying a zeroed signature placeholder, and all witnesses without a
/// matching input. Each witness is prefixed with its length as a little
/// endian u64.
pub(crate) fn group_signing_message(
    tx: &Transaction,
    tx_hash: &Hash,
    input_indices: &[u32],
) -> Result<(Hash, WitnessArgs), SigningError> {
    let (first, rest) = input_indices
        .split_first()
        .ok_or_else(|| malformed("script group without inputs"))?;

    let witness = |i: u32| -> Result<&Bytes, SigningError> {
        let i = i as usize;
        if i >= tx.inputs.len() {
            return Err(malformed(format!("input index {i} out of range")));
        }
        tx.witnesses
            .get(i)
            .ok_or_else(|| malformed(format!("missing witness for input {i}")))
    };

    let args = placeholder_witness(witness(*first)?)?;
    let mut h = CkbHasher::default();
    h.update(tx_hash.0);
    let mut witness_field = |w: &[u8]| {
        h.update((w.len() as u64).to_le_bytes()).update(w);
    };
    witness_field(&args.to_bytes());
    for i in rest {
        witness_field(&witness(*i)?.0);
    }
    for extra in tx.witnesses.iter().skip(tx.inputs.len()) {
        witness_field(&extra.0);
    }
    Ok((h.finalize(), args))
}

/// Signs the lock script groups of one on-chain address.
#[derive(Debug, Clone)]
pub struct LockSigner {
    address: OnChainAddress,
    lock_script: Script,
}

impl LockSigner {
    /// Signs for the lock script of `address`.
    pub fn new(address: OnChainAddress) -> Self {
        Self {
            lock_script: address.lock_script(),
            address,
        }
    }

    pub fn address(&self) -> &OnChainAddress {
        &self.address
    }

    pub fn lock_script(&self) -> &Script {
        &self.lock_script
    }

    /// Signs every lock group of our address and returns the signed
    /// transaction. The signature goes into the `lock` field of the
    /// `WitnessArgs` in the first witness of each group.
    pub fn sign_transaction(
        &self,
        account: &Account,
        tx: TransactionWithScriptGroups,
    ) -> Result<Transaction, SigningError> {
        let TransactionWithScriptGroups {
            tx_view: mut tx,
            script_groups,
        } = tx;
        let tx_hash = tx.hash();

        let mut signed = 0;
        for group in script_groups
            .iter()
            .filter(|g| g.group_type == ScriptType::Lock && g.script == self.lock_script)
        {
            let (message, mut args) = group_signing_message(&tx, &tx_hash, &group.input_indices)?;
            args.lock = Some(account.sign_hash(message)?.0.to_vec());
            // Checked by group_signing_message.
            let first = group.input_indices[0] as usize;
            tx.witnesses[first] = Bytes(args.to_bytes());
            signed += 1;
        }

        if signed == 0 {
            return Err(SigningError::NothingToSign(self.address.to_string()));
        }
        Ok(tx)
    }
}
