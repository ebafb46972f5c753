//! Account using the k256 Rust crate (implementation of ecdsa in Rust).

use crate::types::{Address, Hash, Signature};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

use super::{blake160, hash_data};

pub use k256::ecdsa::Error;

fn address_of(key: &VerifyingKey) -> Address {
    // The uncompressed encoding is 65 bytes, the first of which is the sec1
    // tag and not part of the public key.
    let point = key.to_encoded_point(false);
    let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();

    let mut addr = Address([0; 20]);
    addr.0.copy_from_slice(&hash[32 - 20..]);
    addr
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        address_of(&key)
    }
}

/// Private key backed identity.
///
/// Never serialized; `Debug` only shows the address.
pub struct Account {
    key: SigningKey,
    addr: Address,
}

impl core::fmt::Debug for Account {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Account").field("addr", &self.addr).finish()
    }
}

impl Account {
    pub fn from_bytes(private_key: &[u8]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(private_key)?;
        let addr = key.verifying_key().into();
        Ok(Self { key, addr })
    }

    pub fn random<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let key = SigningKey::random(rng);
        let addr = key.verifying_key().into();
        Self { key, addr }
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    /// Compressed sec1 encoding of the public key.
    pub fn public_key(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// Args of the default lock: blake160 of the compressed public key.
    pub fn lock_args(&self) -> Address {
        blake160(&self.public_key())
    }

    /// Recoverable signature over a 32 byte digest: `r || s || v` with the
    /// recovery id `v` in `{0, 1}`.
    pub fn sign_hash(&self, hash: Hash) -> Result<Signature, Error> {
        let sig: recoverable::Signature = self.key.sign_prehash(&hash.0)?;
        let sig_bytes: [u8; 65] = sig.as_bytes().try_into().map_err(|_| Error::new())?;
        Ok(Signature(sig_bytes))
    }

    /// Signs arbitrary application data. The payload is not interpreted.
    pub fn sign_data(&self, data: &[u8]) -> Result<Signature, Error> {
        self.sign_hash(hash_data(data))
    }
}

/// Recovers the address that produced `sig` over `hash`.
pub fn recover_signer(hash: Hash, sig: Signature) -> Result<Address, Error> {
    let sig = recoverable::Signature::from_bytes(&sig.0)?;
    let verifying_key = sig.recover_verifying_key_from_digest_bytes(&hash.0.into())?;
    Ok(verifying_key.into())
}
