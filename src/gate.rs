//! The only place that touches the private key.

use tracing::{debug, error};

use crate::{
    address::{Network, OnChainAddress},
    config::Deployment,
    error::SigningError,
    sig::{Account, LockSigner, TransactionWithScriptGroups},
    types::{Address, Signature},
};

/// Signs messages and transactions on behalf of one account.
///
/// Immutable after construction; shared between request handlers by
/// reference.
#[derive(Debug)]
pub struct SigningGate {
    account: Account,
    signer: LockSigner,
}

impl SigningGate {
    pub fn new(account: Account, network: Network, deployment: &Deployment) -> Self {
        let address = OnChainAddress::new(account.lock_args(), network);
        let signer = deployment.lock_signer(address);
        Self { account, signer }
    }

    pub fn address(&self) -> Address {
        self.account.address()
    }

    pub fn on_chain_address(&self) -> &OnChainAddress {
        self.signer.address()
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.account.public_key()
    }

    /// Signs the Keccak-256 hash of `data`. The payload is opaque.
    pub fn sign_message(&self, data: &[u8]) -> Result<Signature, SigningError> {
        let sig = self.account.sign_data(data).map_err(|e| {
            error!(error = %e, "signing message");
            SigningError::from(e)
        })?;
        debug!(len = data.len(), "signed message");
        Ok(sig)
    }

    /// Takes a JSON encoded transaction with script groups and returns the
    /// signed transaction as JSON.
    pub fn sign_transaction(&self, tx: &[u8]) -> Result<Vec<u8>, SigningError> {
        let result = serde_json::from_slice::<TransactionWithScriptGroups>(tx)
            .map_err(|e| SigningError::MalformedTransaction(e.to_string()))
            .and_then(|tx| self.signer.sign_transaction(&self.account, tx))
            .and_then(|signed| Ok(serde_json::to_vec(&signed)?));

        if let Err(e) = &result {
            error!(error = %e, "signing transaction");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sig::{
            hash_data, recover_signer, Bytes, CellInput, CellOutput, OutPoint, ScriptGroup,
            ScriptType, Transaction, WitnessArgs,
        },
        types::Hash,
    };

    fn deployment() -> Deployment {
        Deployment::from_json(&format!(
            r#"{{"default_lock_script": {{"code_hash": "0x{}", "hash_type": "type"}}}}"#,
            "11".repeat(32)
        ))
        .unwrap()
    }

    fn gate() -> SigningGate {
        SigningGate::new(
            Account::from_bytes(&[7; 32]).unwrap(),
            Network::Testnet,
            &deployment(),
        )
    }

    fn tx_for(gate: &SigningGate) -> TransactionWithScriptGroups {
        let lock = gate.signer.lock_script().clone();
        TransactionWithScriptGroups {
            tx_view: Transaction {
                version: 0,
                cell_deps: vec![],
                header_deps: vec![],
                inputs: vec![CellInput {
                    previous_output: OutPoint {
                        tx_hash: Hash([5; 32]),
                        index: 1,
                    },
                    since: 0,
                }],
                outputs: vec![CellOutput {
                    capacity: 61_00000000,
                    lock: lock.clone(),
                    type_: None,
                }],
                outputs_data: vec![Bytes::default()],
                witnesses: vec![Bytes::default()],
            },
            script_groups: vec![ScriptGroup {
                script: lock,
                group_type: ScriptType::Lock,
                input_indices: vec![0],
                output_indices: vec![],
            }],
        }
    }

    #[test]
    fn message_signature_recovers_to_gate_address() {
        let gate = gate();
        for data in [&b""[..], b"hello", &[0u8; 1000]] {
            let sig = gate.sign_message(data).unwrap();
            assert_eq!(recover_signer(hash_data(data), sig).unwrap(), gate.address());
        }
    }

    #[test]
    fn signs_json_transaction() {
        let gate = gate();
        let json = serde_json::to_vec(&tx_for(&gate)).unwrap();

        let signed: Transaction = serde_json::from_slice(&gate.sign_transaction(&json).unwrap())
            .unwrap();
        let args = WitnessArgs::from_bytes(&signed.witnesses[0].0).unwrap();
        assert_eq!(args.lock.map(|l| l.len()), Some(Signature::LEN));
    }

    #[test]
    fn signs_node_rpc_json() {
        let gate = gate();
        let lock = serde_json::to_string(gate.signer.lock_script()).unwrap();
        let json = format!(
            r#"{{
                "tx_view": {{
                    "version": "0x0",
                    "cell_deps": [],
                    "header_deps": [],
                    "inputs": [{{
                        "since": "0x0",
                        "previous_output": {{"tx_hash": "0x{}", "index": "0x1"}}
                    }}],
                    "outputs": [{{"capacity": "0x16b969d00", "lock": {lock}, "type": null}}],
                    "outputs_data": ["0x"],
                    "witnesses": ["0x"]
                }},
                "script_groups": [{{
                    "script": {lock},
                    "group_type": "lock",
                    "input_indices": [0],
                    "output_indices": []
                }}]
            }}"#,
            "55".repeat(32)
        );

        let signed = gate.sign_transaction(json.as_bytes()).unwrap();
        let signed: serde_json::Value = serde_json::from_slice(&signed).unwrap();
        assert_eq!(signed["outputs"][0]["capacity"], "0x16b969d00");
        assert_eq!(signed["inputs"][0]["previous_output"]["index"], "0x1");
        let witness = signed["witnesses"][0].as_str().unwrap();
        assert_eq!(witness.len(), 2 + 2 * 85);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            gate().sign_transaction(b"{not json"),
            Err(SigningError::MalformedTransaction(_))
        ));
    }

    #[test]
    fn address_is_rendered_for_network() {
        let gate = gate();
        assert!(gate.on_chain_address().to_string().starts_with("ckt1q"));
        assert_eq!(gate.on_chain_address().lock_args, gate.account.lock_args());
    }
}
