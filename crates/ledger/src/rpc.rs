use super::{
    ActivityEntry, Commitment, ConfirmResult, LedgerClient, SignatureStatus, TokenDelta,
    TransactionDetail, TransferInstruction, Wallet,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use veilpay_core::tokens::LAMPORTS_PER_SOL;

/// JSON-RPC 2.0 client for a Solana-style node.
#[derive(Clone)]
pub struct JsonRpcLedger {
    pub base_url: String,
    http_client: reqwest::Client,
    request_id: Arc<AtomicU64>,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcContextValue<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureInfo {
    signature: String,
    block_time: Option<i64>,
    err: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionEnvelope {
    block_time: Option<i64>,
    transaction: TransactionBody,
    meta: Option<TransactionMeta>,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    message: TransactionMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMessage {
    account_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    pre_balances: Vec<u64>,
    post_balances: Vec<u64>,
    #[serde(default)]
    pre_token_balances: Vec<TokenBalanceEntry>,
    #[serde(default)]
    post_token_balances: Vec<TokenBalanceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalanceEntry {
    owner: Option<String>,
    mint: String,
    ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiTokenAmount {
    ui_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusEntry {
    confirmation_status: Option<String>,
    err: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BlockhashValue {
    blockhash: String,
}

impl JsonRpcLedger {
    pub fn new(base_url: String) -> Arc<Self> {
        Arc::new(Self {
            base_url,
            http_client: reqwest::Client::new(),
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn call<P: Serialize + Send, T: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let resp = self
            .http_client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("ledger rpc {method} failed to send"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("ledger rpc {method} failed: {status} - {body}");
        }

        let body: RpcResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {method} response"))?;

        if let Some(err) = body.error {
            bail!("ledger rpc {method} error {}: {}", err.code, err.message);
        }
        body.result
            .ok_or_else(|| anyhow!("ledger rpc {method} returned no result"))
    }

    /// Sign the canonical bytes of a payload with the wallet and wrap both
    /// into the base64 envelope the node accepts on `sendTransaction`.
    async fn signed_envelope(&self, payload_json: String, wallet: &dyn Wallet) -> Result<String> {
        let signature = wallet.sign_message(payload_json.as_bytes()).await?;
        let envelope = json!({
            "payload": payload_json,
            "signature": base64::engine::general_purpose::STANDARD.encode(signature),
        });
        Ok(base64::engine::general_purpose::STANDARD.encode(envelope.to_string()))
    }
}

fn block_time_to_utc(seconds: Option<i64>) -> Option<DateTime<Utc>> {
    seconds.and_then(|s| DateTime::from_timestamp(s, 0))
}

fn err_to_string(err: Option<serde_json::Value>) -> Option<String> {
    err.filter(|v| !v.is_null()).map(|v| v.to_string())
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn recent_activity(&self, address: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
        let infos: Vec<SignatureInfo> = self
            .call(
                "getSignaturesForAddress",
                json!([address, { "limit": limit }]),
            )
            .await?;

        Ok(infos
            .into_iter()
            .map(|info| ActivityEntry {
                signature: info.signature,
                block_time: block_time_to_utc(info.block_time),
                err: err_to_string(info.err),
            })
            .collect())
    }

    async fn transaction_detail(&self, signature: &str) -> Result<TransactionDetail> {
        let envelope: TransactionEnvelope = self
            .call(
                "getTransaction",
                json!([signature, { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0 }]),
            )
            .await?;

        let account_keys = envelope.transaction.message.account_keys;
        let meta = envelope
            .meta
            .ok_or_else(|| anyhow!("transaction {signature} has no meta"))?;

        let native_deltas = meta
            .pre_balances
            .iter()
            .zip(meta.post_balances.iter())
            .map(|(pre, post)| *post as i64 - *pre as i64)
            .collect();

        // Token movement is reported as absolute pre/post per (owner, mint);
        // fold into deltas.
        let mut token_deltas: Vec<TokenDelta> = Vec::new();
        for post in &meta.post_token_balances {
            let Some(owner) = &post.owner else { continue };
            let pre_amount = meta
                .pre_token_balances
                .iter()
                .find(|p| p.owner.as_deref() == Some(owner) && p.mint == post.mint)
                .and_then(|p| p.ui_token_amount.ui_amount)
                .unwrap_or(0.0);
            let post_amount = post.ui_token_amount.ui_amount.unwrap_or(0.0);
            token_deltas.push(TokenDelta {
                owner: owner.clone(),
                mint: post.mint.clone(),
                delta: post_amount - pre_amount,
            });
        }

        Ok(TransactionDetail {
            block_time: block_time_to_utc(envelope.block_time),
            account_keys,
            native_deltas,
            token_deltas,
        })
    }

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus> {
        let statuses: RpcContextValue<Vec<Option<StatusEntry>>> = self
            .call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": true }]),
            )
            .await?;

        let entry = statuses.value.into_iter().next().flatten();
        Ok(match entry {
            Some(entry) => SignatureStatus {
                confirmation: match entry.confirmation_status.as_deref() {
                    Some("processed") => Some(Commitment::Processed),
                    Some("confirmed") => Some(Commitment::Confirmed),
                    Some("finalized") => Some(Commitment::Finalized),
                    _ => None,
                },
                err: err_to_string(entry.err),
            },
            None => SignatureStatus {
                confirmation: None,
                err: None,
            },
        })
    }

    async fn spendable_balance(&self, address: &str) -> Result<f64> {
        let balance: RpcContextValue<u64> =
            self.call("getBalance", json!([address])).await?;
        Ok(balance.value as f64 / LAMPORTS_PER_SOL as f64)
    }

    async fn latest_checkpoint(&self) -> Result<String> {
        let value: RpcContextValue<BlockhashValue> =
            self.call("getLatestBlockhash", json!([])).await?;
        Ok(value.value.blockhash)
    }

    async fn submit_transfer(
        &self,
        instruction: &TransferInstruction,
        wallet: &dyn Wallet,
    ) -> Result<String> {
        let payload =
            serde_json::to_string(instruction).context("failed to serialize transfer")?;
        let blob = self.signed_envelope(payload, wallet).await?;

        let signature: String = self
            .call("sendTransaction", json!([blob, { "encoding": "base64" }]))
            .await?;

        tracing::info!(signature = %signature, to = %instruction.to, "transfer submitted");
        Ok(signature)
    }

    async fn submit_raw(&self, blob_base64: &str, wallet: &dyn Wallet) -> Result<String> {
        let blob = self
            .signed_envelope(blob_base64.to_string(), wallet)
            .await?;

        let signature: String = self
            .call("sendTransaction", json!([blob, { "encoding": "base64" }]))
            .await?;

        tracing::info!(signature = %signature, "prepared transaction submitted");
        Ok(signature)
    }

    /// Client-side confirmation helper: waits on signature status until the
    /// requested commitment is reached. Bails on timeout so callers can run
    /// their own longer fallback polling.
    async fn confirm_signature(
        &self,
        signature: &str,
        _checkpoint: &str,
        commitment: Commitment,
    ) -> Result<ConfirmResult> {
        const ATTEMPTS: u32 = 30;

        for attempt in 0..ATTEMPTS {
            let status = self.signature_status(signature).await?;
            if status.err.is_some() {
                return Ok(ConfirmResult { err: status.err });
            }
            if matches!(status.confirmation, Some(reached) if commitment_rank(reached) >= commitment_rank(commitment))
            {
                return Ok(ConfirmResult { err: None });
            }
            if attempt + 1 < ATTEMPTS {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
        bail!("confirmation of {signature} timed out");
    }
}

fn commitment_rank(commitment: Commitment) -> u8 {
    match commitment {
        Commitment::Processed => 0,
        Commitment::Confirmed => 1,
        Commitment::Finalized => 2,
    }
}
