use anyhow::{anyhow, Result};
use chrono::Utc;
use gateway::{PrivacyGateway, WithdrawRequest};
use ledger::{LedgerClient, Wallet};
use serde::Serialize;
use settlement::{PaymentExecutor, PaymentObserver, SettlementOutcome};
use std::sync::Arc;
use store::InvoiceStore;
use veilpay_core::link::{build_share_link, parse_share_link};
use veilpay_core::tokens::TokenPolicy;
use veilpay_core::{Invoice, PrivacyLevel, Token};

/// Everything a command needs, wired up once at startup.
pub struct AppContext {
    pub store: Arc<InvoiceStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub gateway: Arc<dyn PrivacyGateway>,
    pub wallet: Arc<dyn Wallet>,
    pub share_base: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    pub id: String,
    pub amount: f64,
    pub token: String,
    pub description: Option<String>,
    pub recipient: String,
    pub status: String,
    pub payer: Option<String>,
    pub signature: Option<String>,
    pub created_at: String,
    pub paid_at: Option<String>,
    pub expires_at: Option<String>,
    pub is_anonymous: bool,
}

impl From<Invoice> for InvoiceView {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            amount: invoice.amount,
            token: invoice.token.to_string(),
            description: invoice.description,
            recipient: invoice.recipient,
            status: format!("{:?}", invoice.status).to_lowercase(),
            payer: invoice.payer,
            signature: invoice.signature,
            created_at: invoice.created_at.to_rfc3339(),
            paid_at: invoice.paid_at.map(|t| t.to_rfc3339()),
            expires_at: invoice.expires_at.map(|t| t.to_rfc3339()),
            is_anonymous: invoice.is_anonymous,
        }
    }
}

pub fn create_invoice(
    ctx: &AppContext,
    amount: f64,
    token: Token,
    description: Option<String>,
    recipient: Option<String>,
    expires_in_hours: Option<i64>,
) -> Result<InvoiceView> {
    let recipient = match recipient.or_else(|| ctx.wallet.address()) {
        Some(r) => r,
        None => return Err(anyhow!("no recipient given and no wallet connected")),
    };
    let invoice = ctx.store.create(amount, token, description, &recipient);
    let invoice = match expires_in_hours {
        Some(hours) => {
            let mut updated = invoice;
            updated.expires_at = Some(Utc::now() + chrono::Duration::hours(hours));
            ctx.store.merge(updated)
        }
        None => invoice,
    };
    Ok(invoice.into())
}

pub fn list_invoices(ctx: &AppContext) -> Vec<InvoiceView> {
    ctx.store.list().into_iter().map(Into::into).collect()
}

pub fn show_invoice(ctx: &AppContext, id: &str) -> Result<InvoiceView> {
    ctx.store
        .get(id)
        .map(Into::into)
        .ok_or_else(|| anyhow!("unknown invoice: {id}"))
}

#[derive(Debug, Serialize)]
pub struct PayResult {
    pub outcome: String,
    pub signature: String,
    pub privacy_downgraded: bool,
    pub invoice: InvoiceView,
}

pub async fn pay_invoice(ctx: &AppContext, id: &str, level: PrivacyLevel) -> Result<PayResult> {
    let executor = PaymentExecutor::new(
        ctx.ledger.clone(),
        ctx.gateway.clone(),
        ctx.wallet.clone(),
        ctx.store.clone(),
    );

    let outcome = executor
        .pay(id, level)
        .await
        .map_err(|e| anyhow!("[{}] {e}", e.error_code()))?;

    let (label, downgraded) = match &outcome {
        SettlementOutcome::Confirmed {
            privacy_downgraded, ..
        } => ("confirmed", *privacy_downgraded),
        SettlementOutcome::SubmittedUnconfirmed { .. } => ("submitted_unconfirmed", false),
        SettlementOutcome::GatewayReference { .. } => ("paid_on_gateway_reference", false),
    };
    if downgraded {
        tracing::warn!("recipient was not reachable privately; delivered externally instead");
    }

    let invoice = ctx
        .store
        .get(id)
        .ok_or_else(|| anyhow!("invoice vanished after settlement"))?;
    Ok(PayResult {
        outcome: label.to_string(),
        signature: outcome.signature().to_string(),
        privacy_downgraded: downgraded,
        invoice: invoice.into(),
    })
}

/// Block until the observer detects settlement, the invoice leaves
/// pending, or the polling budget runs out.
pub async fn watch_invoice(ctx: &AppContext, id: &str) -> Result<Option<InvoiceView>> {
    // ensure it exists before settling in to poll
    show_invoice(ctx, id)?;
    let observer = PaymentObserver::new(ctx.ledger.clone(), ctx.store.clone());
    Ok(observer.run(id).await.map(Into::into))
}

pub fn share_link(ctx: &AppContext, id: &str) -> Result<String> {
    let invoice = ctx
        .store
        .get(id)
        .ok_or_else(|| anyhow!("unknown invoice: {id}"))?;
    build_share_link(&ctx.share_base, &invoice)
}

/// Reconstruct an invoice from a shared link and reconcile it into the
/// store. A stale link never downgrades a locally-held paid record.
pub fn import_link(ctx: &AppContext, url: &str) -> Result<InvoiceView> {
    let candidate = parse_share_link(url)?;
    Ok(ctx.store.merge(candidate).into())
}

/// Expiry policy lives here, outside the store: an invoice with a recorded
/// expiry can only be expired after it passes; one without can be expired
/// manually at any time.
pub fn expire_invoice(ctx: &AppContext, id: &str) -> Result<InvoiceView> {
    let invoice = ctx
        .store
        .get(id)
        .ok_or_else(|| anyhow!("unknown invoice: {id}"))?;
    if let Some(at) = invoice.expires_at {
        if !invoice.is_past_expiry(Utc::now()) {
            return Err(anyhow!("invoice does not expire until {at}"));
        }
    }
    ctx.store
        .mark_expired(id)
        .map(Into::into)
        .ok_or_else(|| anyhow!("unknown invoice: {id}"))
}

#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub ledger_kind: String,
    pub rpc_url: Option<String>,
    pub gateway_kind: String,
    pub gateway_url: Option<String>,
    pub share_base: String,
}

impl From<config::AppConfig> for SettingsView {
    fn from(cfg: config::AppConfig) -> Self {
        Self {
            ledger_kind: cfg.ledger.kind,
            rpc_url: cfg.ledger.rpc_url,
            gateway_kind: cfg.gateway.kind,
            gateway_url: cfg.gateway.base_url,
            share_base: cfg.share.base_url,
        }
    }
}

pub fn get_settings() -> Result<SettingsView> {
    Ok(config::load()?.into())
}

pub fn update_settings(
    ledger_kind: Option<String>,
    rpc_url: Option<String>,
    gateway_kind: Option<String>,
    gateway_url: Option<String>,
    share_base: Option<String>,
) -> Result<SettingsView> {
    let mut cfg = config::load().unwrap_or_default();

    if let Some(kind) = ledger_kind {
        cfg.ledger.kind = kind;
    }
    if let Some(url) = rpc_url {
        cfg.ledger.rpc_url = Some(url);
    }
    if let Some(kind) = gateway_kind {
        cfg.gateway.kind = kind;
    }
    if let Some(url) = gateway_url {
        cfg.gateway.base_url = Some(url);
    }
    if let Some(base) = share_base {
        cfg.share.base_url = base;
    }

    config::store(&cfg)?;
    tracing::info!("settings updated");
    Ok(cfg.into())
}

#[derive(Debug, Serialize)]
pub struct BalanceReport {
    pub address: String,
    pub spendable_sol: f64,
    pub pool_sol: f64,
    pub pool_usdc: f64,
}

pub async fn balances(ctx: &AppContext) -> Result<BalanceReport> {
    let address = ctx
        .wallet
        .address()
        .ok_or_else(|| anyhow!("no wallet connected"))?;
    let spendable_sol = ctx.ledger.spendable_balance(&address).await?;

    ctx.gateway.ensure_ready().await?;
    let pool_sol = ctx.gateway.pool_balance(&address, Token::Sol).await?;
    let pool_usdc = ctx.gateway.pool_balance(&address, Token::Usdc).await?;

    Ok(BalanceReport {
        address,
        spendable_sol,
        pool_sol,
        pool_usdc,
    })
}

#[derive(Debug, Serialize)]
pub struct WithdrawResult {
    pub signature: String,
    pub amount: f64,
    pub token: String,
}

/// Pull funds back out of the privacy pool to the wallet's own account.
pub async fn withdraw_from_pool(
    ctx: &AppContext,
    amount: f64,
    token: Token,
) -> Result<WithdrawResult> {
    let address = ctx
        .wallet
        .address()
        .ok_or_else(|| anyhow!("no wallet connected"))?;
    ctx.gateway.ensure_ready().await?;

    let policy = TokenPolicy::of(token);
    let blob = ctx
        .gateway
        .prepare_withdraw(WithdrawRequest {
            address: address.clone(),
            amount,
            token_mint: policy.mint.map(String::from),
        })
        .await?;
    let signature = ctx.ledger.submit_raw(&blob, ctx.wallet.as_ref()).await?;
    tracing::info!(%signature, amount, token = %token, "pool withdrawal submitted");

    Ok(WithdrawResult {
        signature,
        amount,
        token: token.to_string(),
    })
}
