//! Molecule serialization of the transaction parts that get hashed, and of
//! the `WitnessArgs` that carry lock signatures.

use super::transaction::{CellDep, CellInput, CellOutput, DepType, OutPoint, Script, Transaction};
use crate::error::SigningError;

fn u32_le(v: usize) -> [u8; 4] {
    (v as u32).to_le_bytes()
}

/// `fixvec<byte>`.
pub(crate) fn bytes(v: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + v.len());
    out.extend_from_slice(&u32_le(v.len()));
    out.extend_from_slice(v);
    out
}

fn fixvec(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = u32_le(items.len()).to_vec();
    for item in items {
        out.extend(item);
    }
    out
}

/// `dynvec` and `table` share one layout: total size, one offset per item,
/// then the items.
fn dynvec(items: Vec<Vec<u8>>) -> Vec<u8> {
    let header = 4 * (items.len() + 1);
    let total = header + items.iter().map(Vec::len).sum::<usize>();

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&u32_le(total));
    let mut offset = header;
    for item in &items {
        out.extend_from_slice(&u32_le(offset));
        offset += item.len();
    }
    for item in items {
        out.extend(item);
    }
    out
}

fn out_point(v: &OutPoint) -> Vec<u8> {
    let mut out = v.tx_hash.0.to_vec();
    out.extend_from_slice(&v.index.to_le_bytes());
    out
}

fn cell_input(v: &CellInput) -> Vec<u8> {
    let mut out = v.since.to_le_bytes().to_vec();
    out.extend(out_point(&v.previous_output));
    out
}

fn cell_dep(v: &CellDep) -> Vec<u8> {
    let mut out = out_point(&v.out_point);
    out.push(match v.dep_type {
        DepType::Code => 0,
        DepType::DepGroup => 1,
    });
    out
}

pub(crate) fn script(v: &Script) -> Vec<u8> {
    dynvec(vec![
        v.code_hash.0.to_vec(),
        vec![v.hash_type.tag()],
        bytes(&v.args.0),
    ])
}

fn cell_output(v: &CellOutput) -> Vec<u8> {
    dynvec(vec![
        v.capacity.to_le_bytes().to_vec(),
        script(&v.lock),
        v.type_.as_ref().map(script).unwrap_or_default(),
    ])
}

/// `RawTransaction`: the transaction without its witnesses.
pub(crate) fn raw_transaction(tx: &Transaction) -> Vec<u8> {
    dynvec(vec![
        tx.version.to_le_bytes().to_vec(),
        fixvec(tx.cell_deps.iter().map(cell_dep).collect()),
        fixvec(tx.header_deps.iter().map(|h| h.0.to_vec()).collect()),
        fixvec(tx.inputs.iter().map(cell_input).collect()),
        dynvec(tx.outputs.iter().map(cell_output).collect()),
        dynvec(tx.outputs_data.iter().map(|d| bytes(&d.0)).collect()),
    ])
}

/// Witness layout understood by the default lock. The signature lives in
/// `lock`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WitnessArgs {
    pub lock: Option<Vec<u8>>,
    pub input_type: Option<Vec<u8>>,
    pub output_type: Option<Vec<u8>>,
}

fn malformed(msg: &str) -> SigningError {
    SigningError::MalformedTransaction(format!("witness args: {msg}"))
}

fn read_u32(data: &[u8], at: usize) -> Result<usize, SigningError> {
    data.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(|b| u32::from_le_bytes(b) as usize)
        .ok_or_else(|| malformed("truncated"))
}

fn bytes_opt(field: &[u8]) -> Result<Option<Vec<u8>>, SigningError> {
    if field.is_empty() {
        return Ok(None);
    }
    let len = read_u32(field, 0)?;
    if field.len() != 4 + len {
        return Err(malformed("bad bytes length"));
    }
    Ok(Some(field[4..].to_vec()))
}

impl WitnessArgs {
    pub fn to_bytes(&self) -> Vec<u8> {
        let opt = |v: &Option<Vec<u8>>| v.as_deref().map(bytes).unwrap_or_default();
        dynvec(vec![
            opt(&self.lock),
            opt(&self.input_type),
            opt(&self.output_type),
        ])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SigningError> {
        const FIELDS: usize = 3;

        if read_u32(data, 0)? != data.len() {
            return Err(malformed("size mismatch"));
        }
        if read_u32(data, 4)? != 4 * (FIELDS + 1) {
            return Err(malformed("expected 3 fields"));
        }
        let mut offsets = (1..=FIELDS)
            .map(|i| read_u32(data, 4 * i))
            .collect::<Result<Vec<_>, _>>()?;
        offsets.push(data.len());
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(malformed("offsets out of order"));
        }

        let field = |i: usize| bytes_opt(&data[offsets[i]..offsets[i + 1]]);
        Ok(Self {
            lock: field(0)?,
            input_type: field(1)?,
            output_type: field(2)?,
        })
    }
}
