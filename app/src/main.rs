mod commands;
mod wallet;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::AppContext;
use gateway::{http::HttpGateway, mock::MockGateway, PrivacyGateway};
use ledger::{mock::MockLedger, rpc::JsonRpcLedger, LedgerClient};
use std::sync::Arc;
use store::{InvoiceStore, SledBlob};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use veilpay_core::{PrivacyLevel, Token};
use wallet::LocalWallet;

const INVOICE_DB: &str = ".veilpay_invoices";

#[derive(Parser)]
#[command(name = "veilpay", about = "Request and settle crypto payments, privately if you like")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a payment request
    Create {
        amount: f64,
        #[arg(long, default_value = "sol")]
        token: Token,
        #[arg(long)]
        description: Option<String>,
        /// Defaults to your own wallet address
        #[arg(long)]
        recipient: Option<String>,
        /// Hours until the request expires
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// List all invoices, newest first
    List,
    /// Show one invoice
    Show { id: String },
    /// Settle an invoice from the connected wallet
    Pay {
        id: String,
        #[arg(long, default_value = "direct")]
        mode: PrivacyLevel,
    },
    /// Poll the ledger until a pending invoice settles
    Watch { id: String },
    /// Print the shareable payment link
    Link { id: String },
    /// Reconstruct an invoice from a shared link
    Import { url: String },
    /// Mark an overdue invoice expired
    Expire { id: String },
    /// Show wallet and privacy-pool balances
    Balance,
    /// Show the current configuration, or change the given fields
    Settings {
        #[arg(long)]
        ledger_kind: Option<String>,
        #[arg(long)]
        rpc_url: Option<String>,
        #[arg(long)]
        gateway_kind: Option<String>,
        #[arg(long)]
        gateway_url: Option<String>,
        #[arg(long)]
        share_base: Option<String>,
    },
    /// Withdraw funds from the privacy pool back to the wallet
    Withdraw {
        amount: f64,
        #[arg(long, default_value = "sol")]
        token: Token,
    },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn create_ledger_client(cfg: &config::AppConfig) -> Result<Arc<dyn LedgerClient>> {
    match cfg.ledger.kind.as_str() {
        "rpc" => {
            let rpc_url = cfg
                .ledger
                .rpc_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("ledger rpc_url not configured"))?;
            tracing::info!(%rpc_url, "using json-rpc ledger");
            Ok(JsonRpcLedger::new(rpc_url))
        }
        _ => {
            tracing::info!("using mock ledger");
            Ok(MockLedger::new())
        }
    }
}

fn create_gateway_client(cfg: &config::AppConfig) -> Result<Arc<dyn PrivacyGateway>> {
    match cfg.gateway.kind.as_str() {
        "http" => {
            let base_url = cfg
                .gateway
                .base_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("gateway base_url not configured"))?;
            tracing::info!(%base_url, "using http privacy gateway");
            Ok(HttpGateway::new(base_url))
        }
        _ => {
            tracing::info!("using mock privacy gateway");
            Ok(MockGateway::new())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load().unwrap_or_default();
    let ctx = AppContext {
        store: Arc::new(InvoiceStore::open(Box::new(SledBlob::open(INVOICE_DB)?))),
        ledger: create_ledger_client(&cfg)?,
        gateway: create_gateway_client(&cfg)?,
        wallet: Arc::new(LocalWallet::load_or_create()?),
        share_base: cfg.share.base_url.clone(),
    };

    match cli.command {
        Command::Create {
            amount,
            token,
            description,
            recipient,
            expires_in,
        } => print_json(&commands::create_invoice(
            &ctx,
            amount,
            token,
            description,
            recipient,
            expires_in,
        )?),
        Command::List => print_json(&commands::list_invoices(&ctx)),
        Command::Show { id } => print_json(&commands::show_invoice(&ctx, &id)?),
        Command::Pay { id, mode } => print_json(&commands::pay_invoice(&ctx, &id, mode).await?),
        Command::Watch { id } => match commands::watch_invoice(&ctx, &id).await? {
            Some(view) => print_json(&view),
            None => {
                println!("no settlement detected; invoice is still pending");
                Ok(())
            }
        },
        Command::Link { id } => {
            println!("{}", commands::share_link(&ctx, &id)?);
            Ok(())
        }
        Command::Import { url } => print_json(&commands::import_link(&ctx, &url)?),
        Command::Expire { id } => print_json(&commands::expire_invoice(&ctx, &id)?),
        Command::Balance => print_json(&commands::balances(&ctx).await?),
        Command::Settings {
            ledger_kind,
            rpc_url,
            gateway_kind,
            gateway_url,
            share_base,
        } => {
            let nothing_to_change = ledger_kind.is_none()
                && rpc_url.is_none()
                && gateway_kind.is_none()
                && gateway_url.is_none()
                && share_base.is_none();
            if nothing_to_change {
                print_json(&commands::get_settings()?)
            } else {
                print_json(&commands::update_settings(
                    ledger_kind,
                    rpc_url,
                    gateway_kind,
                    gateway_url,
                    share_base,
                )?)
            }
        }
        Command::Withdraw { amount, token } => {
            print_json(&commands::withdraw_from_pool(&ctx, amount, token).await?)
        }
    }
}
