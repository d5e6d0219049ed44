//! Live escrow backend: signs and sends real transactions through the
//! configured node and decodes contract events from `eth_getLogs`.
//!
//! The signing section (nonce fetch → sign → send) is guarded by a mutex so
//! overlapping handlers can never reuse a nonce.

use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use tokio::sync::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use verdict_core::constants::{ESCROW_TX_GAS, TX_RECEIPT_TIMEOUT_SEC};
use verdict_core::{Address, Digest32, VerdictError};

use crate::abi::{
    decode_words, dynamic_string_at, encode_call, event_topic, word_to_address, word_to_bool,
    word_to_hex, word_to_u128, word_to_u64, Token,
};
use crate::backend::{
    winner_from_verdict, Capabilities, ChainEvent, ContractSanity, Dispute, EscrowBackend,
    EscrowTx, FileDisputeParams, EVENT_DISPUTE_FILED, EVENT_EVIDENCE_COMMITTED,
    EVENT_PAYOUT_EXECUTED, EVENT_RULING_SUBMITTED,
};
use crate::rlp;

const SIG_DEPOSIT_POOL: &str = "depositPool(uint256)";
const SIG_POST_BOND: &str = "postBond(string,uint256)";
const SIG_COMMIT_EVIDENCE: &str = "commitEvidenceHash(string,bytes32)";
const SIG_FILE_DISPUTE: &str = "fileDispute(uint256,uint256,bytes32)";
const SIG_SUBMIT_RULING: &str = "submitRuling(uint256,address)";
const SIG_GET_DISPUTE: &str = "getDispute(uint256)";
const SIG_JUDGE: &str = "judge()";

pub struct LiveBackend {
    client: HttpClient,
    chain_id: u64,
    contract: Address,
    signer: Option<(SigningKey, Address)>,
    nonce_lock: Mutex<()>,
}

fn rpc_err(e: impl std::fmt::Display) -> VerdictError {
    VerdictError::Rpc(e.to_string())
}

fn parse_quantity(hex_str: &str) -> Result<u64, VerdictError> {
    let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    u64::from_str_radix(stripped, 16)
        .map_err(|e| VerdictError::Rpc(format!("bad hex quantity {hex_str}: {e}")))
}

fn decode_hex_data(data: &str) -> Result<Vec<u8>, VerdictError> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(stripped).map_err(|e| VerdictError::Rpc(format!("bad hex data: {e}")))
}

impl LiveBackend {
    pub fn new(
        rpc_url: &str,
        chain_id: u64,
        contract: Address,
        private_key: Option<&str>,
    ) -> Result<Self, VerdictError> {
        let client = HttpClientBuilder::default()
            .build(rpc_url)
            .map_err(rpc_err)?;

        let signer = match private_key {
            Some(key_hex) => {
                let stripped = key_hex.strip_prefix("0x").unwrap_or(key_hex);
                let bytes = Zeroizing::new(hex::decode(stripped).map_err(|e| {
                    VerdictError::Validation(format!("invalid private key hex: {e}"))
                })?);
                let key = SigningKey::from_slice(&bytes)
                    .map_err(|e| VerdictError::Validation(format!("invalid private key: {e}")))?;
                let address = verdict_protocol::address_from_private_key(key_hex)?;
                Some((key, address))
            }
            None => None,
        };

        Ok(Self {
            client,
            chain_id,
            contract,
            signer,
            nonce_lock: Mutex::new(()),
        })
    }

    async fn rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> Result<T, VerdictError> {
        self.client.request(method, params).await.map_err(rpc_err)
    }

    async fn eth_call(&self, data: Vec<u8>) -> Result<Vec<u8>, VerdictError> {
        let call = json!({
            "to": self.contract.to_checksum(),
            "data": format!("0x{}", hex::encode(data)),
        });
        let result: String = self.rpc("eth_call", rpc_params![call, "latest"]).await?;
        decode_hex_data(&result)
    }

    async fn code_size(&self) -> Result<u64, VerdictError> {
        let code: String = self
            .rpc(
                "eth_getCode",
                rpc_params![self.contract.to_checksum(), "latest"],
            )
            .await?;
        Ok(decode_hex_data(&code)?.len() as u64)
    }

    /// Sign and send a legacy transaction, then wait for its receipt.
    async fn send_tx(&self, data: Vec<u8>) -> Result<EscrowTx, VerdictError> {
        let (key, from) = self.signer.as_ref().ok_or(VerdictError::SignerMissing)?;

        let tx_hash: String = {
            let _guard = self.nonce_lock.lock().await;

            let nonce: String = self
                .rpc(
                    "eth_getTransactionCount",
                    rpc_params![from.to_checksum(), "pending"],
                )
                .await?;
            let nonce = parse_quantity(&nonce)?;

            let gas_price: String = self.rpc("eth_gasPrice", rpc_params![]).await?;
            let gas_price = parse_quantity(&gas_price)?;

            let base_fields = vec![
                rlp::encode_uint(nonce as u128),
                rlp::encode_uint(gas_price as u128),
                rlp::encode_uint(ESCROW_TX_GAS as u128),
                rlp::encode_bytes(self.contract.as_bytes()),
                rlp::encode_uint(0),
                rlp::encode_bytes(&data),
            ];

            // EIP-155: hash over (…, chainId, 0, 0), then fold the recovery
            // id into v.
            let mut unsigned = base_fields.clone();
            unsigned.push(rlp::encode_uint(self.chain_id as u128));
            unsigned.push(rlp::encode_uint(0));
            unsigned.push(rlp::encode_uint(0));
            let digest = Keccak256::digest(rlp::encode_list(&unsigned));

            let (signature, recovery_id) = key
                .sign_prehash_recoverable(&digest)
                .map_err(|e| VerdictError::Rpc(format!("transaction signing failed: {e}")))?;
            let v = self.chain_id * 2 + 35 + recovery_id.to_byte() as u64;
            let sig_bytes = signature.to_bytes();
            let (r, s) = sig_bytes.split_at(32);

            let mut signed = base_fields;
            signed.push(rlp::encode_uint(v as u128));
            signed.push(rlp::encode_bytes(strip_leading_zeros(r)));
            signed.push(rlp::encode_bytes(strip_leading_zeros(s)));
            let raw = format!("0x{}", hex::encode(rlp::encode_list(&signed)));

            self.rpc("eth_sendRawTransaction", rpc_params![raw]).await?
        };

        debug!(%tx_hash, "transaction sent, awaiting receipt");
        self.wait_for_receipt(&tx_hash).await
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<EscrowTx, VerdictError> {
        let deadline =
            tokio::time::Instant::now() + std::time::Duration::from_secs(TX_RECEIPT_TIMEOUT_SEC);
        loop {
            let receipt: Value = self
                .rpc("eth_getTransactionReceipt", rpc_params![tx_hash])
                .await?;
            if !receipt.is_null() {
                let block_number = receipt
                    .get("blockNumber")
                    .and_then(Value::as_str)
                    .map(parse_quantity)
                    .transpose()?;
                let status = receipt
                    .get("status")
                    .and_then(Value::as_str)
                    .map(parse_quantity)
                    .transpose()?;
                return Ok(EscrowTx {
                    tx_hash: tx_hash.to_string(),
                    block_number,
                    status,
                    extra: None,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(VerdictError::Timeout(format!(
                    "transaction {tx_hash} unconfirmed after {TX_RECEIPT_TIMEOUT_SEC}s"
                )));
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    fn event_signature(name: &str) -> Option<&'static str> {
        match name {
            EVENT_EVIDENCE_COMMITTED => Some("EvidenceCommitted(string,bytes32,address)"),
            EVENT_DISPUTE_FILED => Some("DisputeFiled(uint256,address,address)"),
            EVENT_RULING_SUBMITTED => Some("RulingSubmitted(uint256,address,address)"),
            EVENT_PAYOUT_EXECUTED => Some("PayoutExecuted(uint256,address,uint256)"),
            _ => None,
        }
    }

    fn decode_event_args(name: &str, data: &[u8]) -> Result<Value, VerdictError> {
        let words = decode_words(data);
        let need = |n: usize| {
            if words.len() < n {
                Err(VerdictError::Rpc(format!(
                    "event {name}: expected {n} words, got {}",
                    words.len()
                )))
            } else {
                Ok(())
            }
        };
        match name {
            EVENT_EVIDENCE_COMMITTED => {
                need(3)?;
                Ok(json!({
                    "agreementId": dynamic_string_at(data, &words, 0)?,
                    "rootHash": word_to_hex(&words[1]),
                    "agent": word_to_address(&words[2]).to_checksum(),
                }))
            }
            EVENT_DISPUTE_FILED => {
                need(3)?;
                Ok(json!({
                    "disputeId": word_to_u64(&words[0]),
                    "plaintiff": word_to_address(&words[1]).to_checksum(),
                    "defendant": word_to_address(&words[2]).to_checksum(),
                }))
            }
            EVENT_RULING_SUBMITTED => {
                need(3)?;
                Ok(json!({
                    "disputeId": word_to_u64(&words[0]),
                    "winner": word_to_address(&words[1]).to_checksum(),
                    "loser": word_to_address(&words[2]).to_checksum(),
                }))
            }
            EVENT_PAYOUT_EXECUTED => {
                need(3)?;
                Ok(json!({
                    "disputeId": word_to_u64(&words[0]),
                    "to": word_to_address(&words[1]).to_checksum(),
                    "amount": word_to_u128(&words[2]).to_string(),
                }))
            }
            other => Err(VerdictError::Rpc(format!("unknown event {other}"))),
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

#[async_trait]
impl EscrowBackend for LiveBackend {
    async fn deposit_pool(&self, amount: u128) -> Result<EscrowTx, VerdictError> {
        self.send_tx(encode_call(SIG_DEPOSIT_POOL, &[Token::Uint(amount)]))
            .await
    }

    async fn post_bond(&self, agreement_id: &str, amount: u128) -> Result<EscrowTx, VerdictError> {
        self.send_tx(encode_call(
            SIG_POST_BOND,
            &[Token::Str(agreement_id.to_string()), Token::Uint(amount)],
        ))
        .await
    }

    async fn commit_evidence_hash(
        &self,
        agreement_id: &str,
        root_hash: &str,
    ) -> Result<EscrowTx, VerdictError> {
        let root = Digest32::from_hex(root_hash)?;
        self.send_tx(encode_call(
            SIG_COMMIT_EVIDENCE,
            &[
                Token::Str(agreement_id.to_string()),
                Token::Bytes32(*root.as_bytes()),
            ],
        ))
        .await
    }

    async fn file_dispute(
        &self,
        _agreement_id: &str,
        params: FileDisputeParams,
    ) -> Result<EscrowTx, VerdictError> {
        let tx_id = params.tx_id.ok_or_else(|| {
            VerdictError::Validation("tx_id is required to file a dispute in live mode".into())
        })?;
        match params.defendant {
            Some(d) if !d.is_zero() => {}
            _ => {
                return Err(VerdictError::Validation(
                    "a non-zero defendant is required in live mode".into(),
                ))
            }
        }
        let evidence = match params.plaintiff_evidence {
            Some(hex_root) => *Digest32::from_hex(&hex_root)?.as_bytes(),
            None => [0u8; 32],
        };
        self.send_tx(encode_call(
            SIG_FILE_DISPUTE,
            &[
                Token::Uint(tx_id as u128),
                Token::Uint(params.stake),
                Token::Bytes32(evidence),
            ],
        ))
        .await
    }

    async fn submit_ruling(
        &self,
        dispute_id: u64,
        verdict: &Value,
    ) -> Result<EscrowTx, VerdictError> {
        let winner = winner_from_verdict(verdict)?;
        self.send_tx(encode_call(
            SIG_SUBMIT_RULING,
            &[Token::Uint(dispute_id as u128), Token::Address(winner)],
        ))
        .await
    }

    async fn get_dispute(&self, dispute_id: u64) -> Result<Option<Dispute>, VerdictError> {
        let data = self
            .eth_call(encode_call(SIG_GET_DISPUTE, &[Token::Uint(dispute_id as u128)]))
            .await?;
        let words = decode_words(&data);
        if words.len() < 8 {
            return Ok(None);
        }

        let dispute = if words.len() >= 10 {
            Dispute {
                transaction_id: word_to_u64(&words[0]),
                plaintiff: word_to_address(&words[1]),
                defendant: word_to_address(&words[2]),
                stake: word_to_u128(&words[3]),
                judge_fee: word_to_u128(&words[4]),
                tier: word_to_u64(&words[5]).min(u8::MAX as u64) as u8,
                plaintiff_evidence: word_to_hex(&words[6]),
                defendant_evidence: word_to_hex(&words[7]),
                resolved: word_to_bool(&words[8]),
                winner: word_to_address(&words[9]),
            }
        } else {
            // Legacy struct: (plaintiff, defendant, plaintiffStake,
            // defendantStake, pEvidence, dEvidence, resolved, winner).
            Dispute {
                transaction_id: 0,
                plaintiff: word_to_address(&words[0]),
                defendant: word_to_address(&words[1]),
                stake: word_to_u128(&words[2]),
                judge_fee: 0,
                tier: 0,
                plaintiff_evidence: word_to_hex(&words[4]),
                defendant_evidence: word_to_hex(&words[5]),
                resolved: word_to_bool(&words[6]),
                winner: word_to_address(&words[7]),
            }
        };

        if dispute.plaintiff.is_zero() && dispute.defendant.is_zero() {
            return Ok(None);
        }
        Ok(Some(dispute))
    }

    async fn judge_address(&self) -> Result<Option<Address>, VerdictError> {
        let data = self.eth_call(encode_call(SIG_JUDGE, &[])).await?;
        let words = decode_words(&data);
        match words.first() {
            Some(word) => {
                let address = word_to_address(word);
                Ok((!address.is_zero()).then_some(address))
            }
            None => Ok(None),
        }
    }

    async fn poll_events(
        &self,
        name: &str,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<ChainEvent>, VerdictError> {
        let Some(signature) = Self::event_signature(name) else {
            return Ok(Vec::new());
        };
        let filter = json!({
            "address": self.contract.to_checksum(),
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": to_block.map(|b| format!("0x{b:x}")).unwrap_or_else(|| "latest".into()),
            "topics": [event_topic(signature)],
        });
        let logs: Vec<Value> = self.rpc("eth_getLogs", rpc_params![filter]).await?;

        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            let data = decode_hex_data(log.get("data").and_then(Value::as_str).unwrap_or("0x"))?;
            let block_number = log
                .get("blockNumber")
                .and_then(Value::as_str)
                .map(parse_quantity)
                .transpose()?
                .unwrap_or(from_block);
            let insertion_index = log
                .get("logIndex")
                .and_then(Value::as_str)
                .map(parse_quantity)
                .transpose()?
                .unwrap_or(0);
            out.push(ChainEvent {
                name: name.to_string(),
                block_number,
                insertion_index,
                tx_hash: log
                    .get("transactionHash")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                args: Self::decode_event_args(name, &data)?,
            });
        }
        out.sort_by_key(|e| (e.block_number, e.insertion_index));
        Ok(out)
    }

    async fn capabilities(&self) -> Capabilities {
        let connected = self
            .rpc::<String>("eth_blockNumber", rpc_params![])
            .await
            .is_ok();
        let code = if connected {
            self.code_size().await.unwrap_or(0)
        } else {
            0
        };
        Capabilities {
            rpc_connected: connected,
            contract_has_code: code > 0,
            deposit_pool: true,
            post_bond: true,
            commit_evidence_hash: true,
            file_dispute: true,
            submit_ruling: true,
            payout_executed: true,
        }
    }

    async fn contract_sanity(&self) -> ContractSanity {
        let connected = self
            .rpc::<String>("eth_blockNumber", rpc_params![])
            .await
            .is_ok();
        let code = if connected {
            self.code_size().await.unwrap_or(0)
        } else {
            0
        };
        ContractSanity {
            rpc_connected: connected,
            contract_address: self.contract.to_checksum(),
            contract_has_code: code > 0,
            contract_code_size: code,
            dry_run: false,
        }
    }

    fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|(_, address)| *address)
    }

    fn is_dry_run(&self) -> bool {
        false
    }
}
