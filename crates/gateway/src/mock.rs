use super::{
    DepositRequest, GatewayError, PrivacyGateway, TransferOutcome, TransferRequest,
    WithdrawRequest,
};
use async_trait::async_trait;
use base64::Engine;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use veilpay_core::{tokens::TokenPolicy, Token};
use ledger::{mock::random_signature, Wallet};

#[derive(Default)]
struct Inner {
    balances: HashMap<(String, Token), f64>,
    pending_deposits: Vec<(String, Token, f64)>,
    /// Balance polls remaining before pending deposits are credited.
    polls_until_credit: usize,
    credit_deposits: bool,
    unresolvable: HashSet<String>,
    fail_next_transfer: Option<GatewayError>,
    /// When set, transfers succeed but return a pool-internal reference
    /// instead of a ledger signature.
    internal_references: bool,
    init_error: Option<String>,
    transfers: Vec<TransferRequest>,
    calls: usize,
}

/// Scriptable in-memory privacy gateway.
#[derive(Clone)]
pub struct MockGateway {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                credit_deposits: true,
                ..Inner::default()
            })),
        }
    }
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_pool_balance(&self, address: &str, token: Token, amount: f64) {
        self.inner
            .lock()
            .unwrap()
            .balances
            .insert((address.into(), token), amount);
    }

    /// Deposits stay invisible for this many balance polls before landing.
    pub fn set_polls_until_credit(&self, polls: usize) {
        self.inner.lock().unwrap().polls_until_credit = polls;
    }

    /// When disabled, deposits never reach the pool balance.
    pub fn set_credit_deposits(&self, credit: bool) {
        self.inner.lock().unwrap().credit_deposits = credit;
    }

    pub fn mark_unresolvable(&self, recipient: &str) {
        self.inner.lock().unwrap().unresolvable.insert(recipient.into());
    }

    pub fn fail_next_transfer(&self, error: GatewayError) {
        self.inner.lock().unwrap().fail_next_transfer = Some(error);
    }

    pub fn use_internal_references(&self, enabled: bool) {
        self.inner.lock().unwrap().internal_references = enabled;
    }

    pub fn set_init_error(&self, message: &str) {
        self.inner.lock().unwrap().init_error = Some(message.into());
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.inner.lock().unwrap().transfers.clone()
    }

    pub fn calls(&self) -> usize {
        self.inner.lock().unwrap().calls
    }

    fn token_for_mint(mint: &Option<String>) -> Token {
        match mint {
            Some(_) => Token::Usdc,
            None => Token::Sol,
        }
    }
}

#[async_trait]
impl PrivacyGateway for MockGateway {
    async fn ensure_ready(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls += 1;
        match &inner.init_error {
            Some(message) => Err(GatewayError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }

    async fn pool_balance(&self, address: &str, token: Token) -> Result<f64, GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls += 1;

        let has_pending = inner
            .pending_deposits
            .iter()
            .any(|(a, t, _)| a == address && *t == token);
        if has_pending && inner.credit_deposits {
            if inner.polls_until_credit > 0 {
                inner.polls_until_credit -= 1;
            } else {
                let credited: Vec<(String, Token, f64)> = inner
                    .pending_deposits
                    .drain(..)
                    .collect();
                for (a, t, amount) in credited {
                    *inner.balances.entry((a, t)).or_insert(0.0) += amount;
                }
            }
        }

        Ok(*inner
            .balances
            .get(&(address.to_string(), token))
            .unwrap_or(&0.0))
    }

    async fn prepare_deposit(&self, request: DepositRequest) -> Result<String, GatewayError> {
        let token = Self::token_for_mint(&request.token_mint);
        let mut inner = self.inner.lock().unwrap();
        inner.calls += 1;
        inner
            .pending_deposits
            .push((request.address.clone(), token, request.amount));

        let blob = serde_json::to_string(&request)
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    async fn prepare_withdraw(&self, request: WithdrawRequest) -> Result<String, GatewayError> {
        let token = Self::token_for_mint(&request.token_mint);
        let mut inner = self.inner.lock().unwrap();
        inner.calls += 1;

        let key = (request.address.clone(), token);
        let available = *inner.balances.get(&key).unwrap_or(&0.0);
        if available < request.amount {
            return Err(GatewayError::InsufficientBalance {
                available,
                required: request.amount,
            });
        }
        *inner.balances.entry(key).or_insert(0.0) -= request.amount;

        let blob = serde_json::to_string(&request)
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    async fn transfer(
        &self,
        request: TransferRequest,
        signer: &dyn Wallet,
    ) -> Result<TransferOutcome, GatewayError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.calls += 1;
            if let Some(error) = inner.fail_next_transfer.take() {
                return Err(error);
            }
            if request.transfer_type == super::TransferType::Internal
                && inner.unresolvable.contains(&request.recipient)
            {
                return Err(GatewayError::RecipientUnresolvable);
            }
        }

        signer
            .sign_message(format!("mock-transfer:{}", request.recipient).as_bytes())
            .await
            .map_err(|e| GatewayError::TransferFailed(format!("signing failed: {e}")))?;

        let mut inner = self.inner.lock().unwrap();
        let key = (request.sender.clone(), request.token);
        let available = *inner.balances.get(&key).unwrap_or(&0.0);
        if available < request.amount {
            return Err(GatewayError::InsufficientBalance {
                available,
                required: request.amount,
            });
        }
        *inner.balances.entry(key).or_insert(0.0) -= request.amount;

        let fee = request.amount * TokenPolicy::of(request.token).gateway_fee_pct;
        tracing::debug!(amount = request.amount, fee, "mock pool transfer");

        let signature = if inner.internal_references {
            format!("pool:{}", &random_signature()[..16])
        } else {
            random_signature()
        };
        inner.transfers.push(request);

        Ok(TransferOutcome {
            success: true,
            signature: Some(signature),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::mock::MockWallet;

    #[tokio::test]
    async fn deposit_lands_after_configured_polls() {
        let gateway = MockGateway::new();
        gateway.set_polls_until_credit(2);
        gateway
            .prepare_deposit(DepositRequest {
                address: "payer".into(),
                amount: 1.5,
                token_mint: None,
            })
            .await
            .unwrap();

        assert_eq!(gateway.pool_balance("payer", Token::Sol).await.unwrap(), 0.0);
        assert_eq!(gateway.pool_balance("payer", Token::Sol).await.unwrap(), 0.0);
        assert_eq!(gateway.pool_balance("payer", Token::Sol).await.unwrap(), 1.5);
    }

    #[tokio::test]
    async fn internal_transfer_rejects_unresolvable_recipient() {
        let gateway = MockGateway::new();
        gateway.set_pool_balance("payer", Token::Sol, 5.0);
        gateway.mark_unresolvable("ghost");

        let wallet = MockWallet::connected("payer");
        let result = gateway
            .transfer(
                TransferRequest {
                    sender: "payer".into(),
                    recipient: "ghost".into(),
                    amount: 1.0,
                    token: Token::Sol,
                    transfer_type: super::super::TransferType::Internal,
                },
                &wallet,
            )
            .await;
        assert!(matches!(result, Err(GatewayError::RecipientUnresolvable)));

        // External delivery does not need pool resolution.
        let result = gateway
            .transfer(
                TransferRequest {
                    sender: "payer".into(),
                    recipient: "ghost".into(),
                    amount: 1.0,
                    token: Token::Sol,
                    transfer_type: super::super::TransferType::External,
                },
                &wallet,
            )
            .await
            .unwrap();
        assert!(result.success);
    }
}
