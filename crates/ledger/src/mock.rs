use super::{
    ActivityEntry, Commitment, ConfirmResult, LedgerClient, SignatureStatus, TransactionDetail,
    TransferInstruction, Wallet,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Random well-formed ledger signature, for mocks and tests.
pub fn random_signature() -> String {
    let mut rng = rand::thread_rng();
    (0..87)
        .map(|_| BASE58_ALPHABET[rng.gen_range(0..BASE58_ALPHABET.len())] as char)
        .collect()
}

/// What the mock's primary confirmation call should do.
#[derive(Debug, Clone, Default)]
pub enum ConfirmBehavior {
    #[default]
    Confirm,
    Error(String),
    /// The call itself fails, forcing callers onto status polling.
    Unreachable,
}

#[derive(Default)]
struct Inner {
    activity: HashMap<String, Vec<ActivityEntry>>,
    details: HashMap<String, TransactionDetail>,
    statuses: HashMap<String, VecDeque<SignatureStatus>>,
    default_status: Option<SignatureStatus>,
    balances: HashMap<String, f64>,
    confirm: ConfirmBehavior,
    next_signature: Option<String>,
    submitted: Vec<TransferInstruction>,
    raw_submitted: Vec<String>,
    network_calls: usize,
}

/// Scriptable in-memory ledger. Tests seed activity, details, balances and
/// status sequences, then assert on recorded submissions and call counts.
#[derive(Clone, Default)]
pub struct MockLedger {
    inner: Arc<Mutex<Inner>>,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_balance(&self, address: &str, amount: f64) {
        self.inner.lock().unwrap().balances.insert(address.into(), amount);
    }

    pub fn seed_activity(&self, address: &str, entries: Vec<ActivityEntry>) {
        self.inner.lock().unwrap().activity.insert(address.into(), entries);
    }

    pub fn seed_detail(&self, signature: &str, detail: TransactionDetail) {
        self.inner.lock().unwrap().details.insert(signature.into(), detail);
    }

    /// Queue per-poll statuses for a signature; the last entry repeats.
    pub fn script_status(&self, signature: &str, statuses: Vec<SignatureStatus>) {
        self.inner
            .lock()
            .unwrap()
            .statuses
            .insert(signature.into(), statuses.into());
    }

    /// Status returned for signatures with no script (default: confirmed).
    pub fn set_default_status(&self, status: SignatureStatus) {
        self.inner.lock().unwrap().default_status = Some(status);
    }

    pub fn set_confirm_behavior(&self, behavior: ConfirmBehavior) {
        self.inner.lock().unwrap().confirm = behavior;
    }

    pub fn set_next_signature(&self, signature: &str) {
        self.inner.lock().unwrap().next_signature = Some(signature.into());
    }

    pub fn network_calls(&self) -> usize {
        self.inner.lock().unwrap().network_calls
    }

    pub fn submitted(&self) -> Vec<TransferInstruction> {
        self.inner.lock().unwrap().submitted.clone()
    }

    pub fn raw_submitted(&self) -> Vec<String> {
        self.inner.lock().unwrap().raw_submitted.clone()
    }

    fn count_call(&self) {
        self.inner.lock().unwrap().network_calls += 1;
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn recent_activity(&self, address: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
        self.count_call();
        let inner = self.inner.lock().unwrap();
        let mut entries = inner.activity.get(address).cloned().unwrap_or_default();
        entries.truncate(limit);
        Ok(entries)
    }

    async fn transaction_detail(&self, signature: &str) -> Result<TransactionDetail> {
        self.count_call();
        let inner = self.inner.lock().unwrap();
        match inner.details.get(signature) {
            Some(detail) => Ok(detail.clone()),
            None => bail!("unknown transaction: {signature}"),
        }
    }

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus> {
        self.count_call();
        let mut inner = self.inner.lock().unwrap();
        if let Some(queue) = inner.statuses.get_mut(signature) {
            if queue.len() > 1 {
                return Ok(queue.pop_front().unwrap());
            }
            if let Some(last) = queue.front() {
                return Ok(last.clone());
            }
        }
        Ok(inner.default_status.clone().unwrap_or(SignatureStatus {
            confirmation: Some(Commitment::Confirmed),
            err: None,
        }))
    }

    async fn spendable_balance(&self, address: &str) -> Result<f64> {
        self.count_call();
        Ok(*self.inner.lock().unwrap().balances.get(address).unwrap_or(&0.0))
    }

    async fn latest_checkpoint(&self) -> Result<String> {
        self.count_call();
        Ok(random_signature()[..32].to_string())
    }

    async fn submit_transfer(
        &self,
        instruction: &TransferInstruction,
        wallet: &dyn Wallet,
    ) -> Result<String> {
        self.count_call();
        wallet
            .sign_message(serde_json::to_string(instruction)?.as_bytes())
            .await?;
        let mut inner = self.inner.lock().unwrap();
        inner.submitted.push(instruction.clone());
        Ok(inner.next_signature.take().unwrap_or_else(random_signature))
    }

    async fn submit_raw(&self, blob_base64: &str, wallet: &dyn Wallet) -> Result<String> {
        self.count_call();
        wallet.sign_message(blob_base64.as_bytes()).await?;
        let mut inner = self.inner.lock().unwrap();
        inner.raw_submitted.push(blob_base64.to_string());
        Ok(inner.next_signature.take().unwrap_or_else(random_signature))
    }

    async fn confirm_signature(
        &self,
        _signature: &str,
        _checkpoint: &str,
        _commitment: Commitment,
    ) -> Result<ConfirmResult> {
        self.count_call();
        let behavior = self.inner.lock().unwrap().confirm.clone();
        match behavior {
            ConfirmBehavior::Confirm => Ok(ConfirmResult { err: None }),
            ConfirmBehavior::Error(err) => Ok(ConfirmResult { err: Some(err) }),
            ConfirmBehavior::Unreachable => bail!("confirm rpc unavailable"),
        }
    }
}

/// In-memory wallet over an ephemeral ed25519 key.
pub struct MockWallet {
    key: SigningKey,
    address: Option<String>,
    can_sign: bool,
    can_send: bool,
}

impl MockWallet {
    pub fn connected(address: &str) -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
            address: Some(address.to_string()),
            can_sign: true,
            can_send: true,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
            address: None,
            can_sign: false,
            can_send: false,
        }
    }

    /// A wallet that can sign messages but not send transactions, like a
    /// watch-only adapter.
    pub fn message_only(address: &str) -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
            address: Some(address.to_string()),
            can_sign: true,
            can_send: false,
        }
    }
}

#[async_trait]
impl Wallet for MockWallet {
    fn address(&self) -> Option<String> {
        self.address.clone()
    }

    fn can_sign_messages(&self) -> bool {
        self.can_sign
    }

    fn can_send_transactions(&self) -> bool {
        self.can_send
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        if !self.can_sign {
            bail!("wallet cannot sign messages");
        }
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilpay_core::signature::is_well_formed_signature;

    #[test]
    fn random_signatures_are_well_formed() {
        for _ in 0..20 {
            assert!(is_well_formed_signature(&random_signature()));
        }
    }

    #[tokio::test]
    async fn status_script_advances_then_repeats() {
        let ledger = MockLedger::new();
        ledger.script_status(
            "sig",
            vec![
                SignatureStatus { confirmation: None, err: None },
                SignatureStatus { confirmation: Some(Commitment::Finalized), err: None },
            ],
        );

        assert!(ledger.signature_status("sig").await.unwrap().confirmation.is_none());
        for _ in 0..3 {
            let status = ledger.signature_status("sig").await.unwrap();
            assert_eq!(status.confirmation, Some(Commitment::Finalized));
        }
    }
}
