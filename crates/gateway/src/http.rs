use super::{
    DepositRequest, GatewayError, PrivacyGateway, TransferOutcome, TransferRequest,
    TransferType, WithdrawRequest,
};
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use veilpay_core::Token;
use ledger::Wallet;

/// REST client for the privacy gateway service.
#[derive(Clone)]
pub struct HttpGateway {
    pub base_url: String,
    http_client: reqwest::Client,
    ready: Arc<OnceCell<Result<(), String>>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct BalanceRequest<'a> {
    address: &'a str,
    token: Token,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    available: f64,
}

#[derive(Debug, Deserialize)]
struct PreparedTransaction {
    transaction: String,
}

#[derive(Debug, Serialize)]
struct SignedTransferRequest<'a> {
    #[serde(flatten)]
    request: &'a TransferRequest,
    /// Base64 signature over the canonical transfer message, proving the
    /// sender controls the claimed wallet.
    sender_signature: String,
}

impl HttpGateway {
    pub fn new(base_url: String) -> Arc<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Arc::new(Self {
            base_url,
            http_client,
            ready: Arc::new(OnceCell::new()),
        })
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(format!("{path}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body: ErrorBody = resp.json().await.unwrap_or(ErrorBody {
                code: None,
                message: None,
            });
            return Err(map_error(status.as_u16(), body));
        }

        resp.json()
            .await
            .map_err(|e| GatewayError::Network(format!("failed to parse {path} response: {e}")))
    }
}

fn map_error(status: u16, body: ErrorBody) -> GatewayError {
    let message = body.message.unwrap_or_else(|| format!("http status {status}"));
    match body.code.as_deref() {
        Some("recipient_unresolvable") => GatewayError::RecipientUnresolvable,
        Some("insufficient_balance") => GatewayError::InsufficientBalance {
            available: 0.0,
            required: 0.0,
        },
        Some("transfer_failed") => GatewayError::TransferFailed(message),
        _ if status >= 500 => GatewayError::Network(message),
        _ => GatewayError::TransferFailed(message),
    }
}

/// Canonical message a payer signs to authorize a pooled transfer.
fn transfer_message(request: &TransferRequest) -> String {
    let kind = match request.transfer_type {
        TransferType::Internal => "internal",
        TransferType::External => "external",
    };
    format!(
        "veilpay-transfer:{}:{}:{}:{}:{}",
        request.sender, request.recipient, request.amount, request.token, kind
    )
}

#[async_trait]
impl PrivacyGateway for HttpGateway {
    async fn ensure_ready(&self) -> Result<(), GatewayError> {
        let result = self
            .ready
            .get_or_init(|| async {
                let url = format!("{}/api/v1/health", self.base_url);
                match self.http_client.get(&url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        tracing::debug!("privacy gateway ready");
                        Ok(())
                    }
                    Ok(resp) => Err(format!("gateway health check failed: {}", resp.status())),
                    Err(e) => Err(format!("gateway unreachable: {e}")),
                }
            })
            .await;

        result.clone().map_err(GatewayError::Unavailable)
    }

    async fn pool_balance(&self, address: &str, token: Token) -> Result<f64, GatewayError> {
        let resp: BalanceResponse = self
            .post("/api/v1/pool/balance", &BalanceRequest { address, token })
            .await?;
        Ok(resp.available)
    }

    async fn prepare_deposit(&self, request: DepositRequest) -> Result<String, GatewayError> {
        let resp: PreparedTransaction = self.post("/api/v1/pool/deposit", &request).await?;
        Ok(resp.transaction)
    }

    async fn prepare_withdraw(&self, request: WithdrawRequest) -> Result<String, GatewayError> {
        let resp: PreparedTransaction = self.post("/api/v1/pool/withdraw", &request).await?;
        Ok(resp.transaction)
    }

    async fn transfer(
        &self,
        request: TransferRequest,
        signer: &dyn Wallet,
    ) -> Result<TransferOutcome, GatewayError> {
        let message = transfer_message(&request);
        let signature = signer
            .sign_message(message.as_bytes())
            .await
            .map_err(|e| GatewayError::TransferFailed(format!("message signing failed: {e}")))?;

        let body = SignedTransferRequest {
            request: &request,
            sender_signature: base64::engine::general_purpose::STANDARD.encode(signature),
        };

        let outcome: TransferOutcome = self.post("/api/v1/pool/transfer", &body).await?;
        tracing::info!(
            success = outcome.success,
            transfer_type = ?request.transfer_type,
            "gateway transfer completed"
        );
        Ok(outcome)
    }
}
