use crate::error::{SettlementError, SettlementOutcome};
use crate::plan::{select_plan, SettlementPlan};
use crate::retry::{poll_until, PollBudget};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use veilpay_core::signature::is_well_formed_signature;
use veilpay_core::tokens::TokenPolicy;
use veilpay_core::{invoice_fingerprint, Invoice, InvoiceStatus, PaymentMethod, PrivacyLevel, Token};
use gateway::{DepositRequest, GatewayError, PrivacyGateway, TransferRequest, TransferType};
use ledger::{Commitment, LedgerClient, TransferInstruction, Wallet};
use store::audit::{write_audit_event, AuditEvent};
use store::InvoiceStore;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Fallback confirmation polling for a direct transfer (~60 s).
    pub confirm_poll: PollBudget,
    /// Deposit confirmation (~90 s).
    pub deposit_confirm_poll: PollBudget,
    /// Gateway transfer confirmation (~120 s).
    pub gateway_confirm_poll: PollBudget,
    /// Pool balance re-check after a deposit landed.
    pub balance_recheck: PollBudget,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            confirm_poll: PollBudget::new(120, Duration::from_millis(500)),
            deposit_confirm_poll: PollBudget::new(180, Duration::from_millis(500)),
            gateway_confirm_poll: PollBudget::new(240, Duration::from_millis(500)),
            balance_recheck: PollBudget::new(5, Duration::from_secs(2)),
        }
    }
}

/// Drives exactly one settlement attempt end-to-end: preconditions,
/// transfer submission through the selected path, confirmation, and the
/// final store transition. Never retries a whole attempt on its own; the
/// only built-in fallback is private → anonymous delivery.
pub struct PaymentExecutor {
    ledger: Arc<dyn LedgerClient>,
    gateway: Arc<dyn PrivacyGateway>,
    wallet: Arc<dyn Wallet>,
    store: Arc<InvoiceStore>,
    config: ExecutorConfig,
}

impl PaymentExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        gateway: Arc<dyn PrivacyGateway>,
        wallet: Arc<dyn Wallet>,
        store: Arc<InvoiceStore>,
    ) -> Self {
        Self::with_config(ledger, gateway, wallet, store, ExecutorConfig::default())
    }

    pub fn with_config(
        ledger: Arc<dyn LedgerClient>,
        gateway: Arc<dyn PrivacyGateway>,
        wallet: Arc<dyn Wallet>,
        store: Arc<InvoiceStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            wallet,
            store,
            config,
        }
    }

    pub async fn pay(
        &self,
        invoice_id: &str,
        level: PrivacyLevel,
    ) -> Result<SettlementOutcome, SettlementError> {
        let invoice = self
            .store
            .get(invoice_id)
            .ok_or_else(|| SettlementError::UnknownInvoice(invoice_id.to_string()))?;

        let payer = self
            .wallet
            .address()
            .ok_or(SettlementError::WalletNotConnected)?;
        match level {
            PrivacyLevel::Direct if !self.wallet.can_send_transactions() => {
                return Err(SettlementError::WalletIncapable("send transactions"));
            }
            PrivacyLevel::Private | PrivacyLevel::Anonymous
                if !self.wallet.can_sign_messages() =>
            {
                return Err(SettlementError::WalletIncapable("sign messages"));
            }
            _ => {}
        }

        if invoice.is_paid() {
            return Err(SettlementError::AlreadyPaid);
        }
        if invoice.payer.as_deref() == Some(payer.as_str()) {
            return Err(SettlementError::SelfRepay);
        }
        if let Some(signature) = invoice.signature.as_deref().filter(|s| !s.is_empty()) {
            if is_well_formed_signature(signature) {
                return Err(SettlementError::AlreadySubmitted {
                    signature: signature.to_string(),
                });
            }
            // A malformed recorded signature is a prior bad-state write;
            // clear it so the retry can attach the real one.
            tracing::warn!(invoice_id = %invoice.id, recorded = %signature,
                "retrying over malformed recorded signature");
            self.store.clear_malformed_signature(&invoice.id);
        }

        let plan = select_plan(level, &invoice)?;
        let result = match plan {
            SettlementPlan::Direct => self.pay_direct(&invoice, &payer).await,
            SettlementPlan::Gateway {
                transfer_type,
                fallback_external,
            } => {
                self.pay_via_gateway(&invoice, &payer, level, transfer_type, fallback_external)
                    .await
            }
        };

        if let Err(e) = &result {
            let _ = write_audit_event(
                &AuditEvent::new("settlement_failed", &invoice.id, "pending")
                    .with_error(e.to_string())
                    .with_parties(Some(payer), invoice.recipient.clone()),
            );
        }
        result
    }

    async fn pay_direct(
        &self,
        invoice: &Invoice,
        payer: &str,
    ) -> Result<SettlementOutcome, SettlementError> {
        let policy = TokenPolicy::of(invoice.token);

        // The checkpoint must be fetched immediately before building the
        // instruction; a stale one gets the transaction rejected.
        let checkpoint = self.ledger.latest_checkpoint().await.map_err(ledger_err)?;

        let available = self.ledger.spendable_balance(payer).await.map_err(ledger_err)?;
        let required = match invoice.token {
            Token::Sol => invoice.amount + policy.network_fee,
            _ => policy.network_fee,
        };
        if available < required {
            return Err(SettlementError::InsufficientFunds {
                available,
                required,
            });
        }

        let instruction = TransferInstruction {
            from: payer.to_string(),
            to: invoice.recipient.clone(),
            amount: invoice.amount,
            token: invoice.token,
            checkpoint: checkpoint.clone(),
        };
        let signature = self
            .ledger
            .submit_transfer(&instruction, self.wallet.as_ref())
            .await
            .map_err(ledger_err)?;

        // Persist the submission before confirmation so a reload or a
        // second tab sees "submitted" right away.
        self.record_submission(invoice, Some(payer), &signature, PaymentMethod::Direct, false);

        let confirmed = match self
            .ledger
            .confirm_signature(&signature, &checkpoint, Commitment::Confirmed)
            .await
        {
            Ok(result) => match result.err {
                Some(err) => return Err(self.record_failure(invoice, &signature, err)),
                None => true,
            },
            Err(e) => {
                tracing::warn!(error = %e, "primary confirmation failed, polling status");
                self.poll_confirmation(&signature, self.config.confirm_poll)
                    .await
                    .map_err(|err| self.record_failure(invoice, &signature, err))?
            }
        };

        if confirmed {
            self.record_paid(invoice, Some(payer), &signature, PaymentMethod::Direct, false);
            Ok(SettlementOutcome::Confirmed {
                signature,
                privacy_downgraded: false,
            })
        } else {
            tracing::info!(invoice_id = %invoice.id, signature = %signature,
                "transfer submitted, confirmation still pending");
            Ok(SettlementOutcome::SubmittedUnconfirmed { signature })
        }
    }

    async fn pay_via_gateway(
        &self,
        invoice: &Invoice,
        payer: &str,
        level: PrivacyLevel,
        transfer_type: TransferType,
        fallback_external: bool,
    ) -> Result<SettlementOutcome, SettlementError> {
        self.gateway.ensure_ready().await?;

        let balance = self.gateway.pool_balance(payer, invoice.token).await?;
        if balance < invoice.amount {
            self.top_up_pool(payer, invoice.amount - balance, invoice.amount, invoice.token)
                .await?;
        }

        let request = TransferRequest {
            sender: payer.to_string(),
            recipient: invoice.recipient.clone(),
            amount: invoice.amount,
            token: invoice.token,
            transfer_type,
        };

        let (outcome, effective_type, downgraded) =
            match self.gateway.transfer(request.clone(), self.wallet.as_ref()).await {
                Ok(outcome) => (outcome, transfer_type, false),
                Err(GatewayError::RecipientUnresolvable) if fallback_external => {
                    tracing::warn!(invoice_id = %invoice.id,
                        "recipient not resolvable in pool, falling back to external delivery");
                    let fallback = TransferRequest {
                        transfer_type: TransferType::External,
                        ..request
                    };
                    let outcome = self.gateway.transfer(fallback, self.wallet.as_ref()).await?;
                    (outcome, TransferType::External, true)
                }
                Err(e) => return Err(e.into()),
            };

        if !outcome.success {
            return Err(GatewayError::TransferFailed(
                outcome.error.unwrap_or_else(|| "gateway reported failure".into()),
            )
            .into());
        }
        let reference = outcome.signature.filter(|s| !s.is_empty()).ok_or_else(|| {
            SettlementError::Gateway(GatewayError::TransferFailed(
                "gateway returned no transfer reference".into(),
            ))
        })?;

        let is_anonymous = effective_type == TransferType::External;
        // Anonymous settlements deliberately leave the payer unrecorded.
        let recorded_payer = match level {
            PrivacyLevel::Anonymous => None,
            _ => Some(payer),
        };

        if !is_well_formed_signature(&reference) {
            // Trust boundary: the reference cannot be verified on the
            // public ledger, so the gateway's success response is the only
            // evidence of settlement.
            tracing::warn!(invoice_id = %invoice.id, reference = %reference,
                "gateway returned an internal-only reference; marking paid on gateway trust");
            self.record_paid(
                invoice,
                recorded_payer,
                &reference,
                PaymentMethod::Gateway,
                is_anonymous,
            );
            return Ok(SettlementOutcome::GatewayReference { reference });
        }

        self.record_submission(
            invoice,
            recorded_payer,
            &reference,
            PaymentMethod::Gateway,
            is_anonymous,
        );

        let confirmed = self
            .poll_confirmation(&reference, self.config.gateway_confirm_poll)
            .await
            .map_err(|err| self.record_failure(invoice, &reference, err))?;

        if confirmed {
            self.record_paid(
                invoice,
                recorded_payer,
                &reference,
                PaymentMethod::Gateway,
                is_anonymous,
            );
            Ok(SettlementOutcome::Confirmed {
                signature: reference,
                privacy_downgraded: downgraded,
            })
        } else {
            tracing::info!(invoice_id = %invoice.id, signature = %reference,
                "gateway transfer submitted, confirmation still pending");
            Ok(SettlementOutcome::SubmittedUnconfirmed {
                signature: reference,
            })
        }
    }

    /// Deposit the shortfall into the pool and wait until the balance
    /// reflects it.
    async fn top_up_pool(
        &self,
        payer: &str,
        shortfall: f64,
        required: f64,
        token: Token,
    ) -> Result<(), SettlementError> {
        let policy = TokenPolicy::of(token);
        tracing::info!(shortfall, token = %token, "pool balance short, depositing");

        let blob = self
            .gateway
            .prepare_deposit(DepositRequest {
                address: payer.to_string(),
                amount: shortfall,
                token_mint: policy.mint.map(String::from),
            })
            .await?;

        let deposit_signature = self
            .ledger
            .submit_raw(&blob, self.wallet.as_ref())
            .await
            .map_err(|e| SettlementError::DepositFailed(e.to_string()))?;

        let confirmed = self
            .poll_confirmation(&deposit_signature, self.config.deposit_confirm_poll)
            .await
            .map_err(SettlementError::DepositFailed)?;
        if !confirmed {
            return Err(SettlementError::DepositFailed(
                "deposit transaction not confirmed in time".into(),
            ));
        }

        let reflected = poll_until(self.config.balance_recheck, || async move {
            match self.gateway.pool_balance(payer, token).await {
                Ok(balance) if balance >= required => Some(()),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(error = %e, "balance re-check failed, retrying");
                    None
                }
            }
        })
        .await;

        match reflected {
            Some(()) => Ok(()),
            None => Err(SettlementError::DepositNotReflected),
        }
    }

    /// Poll signature status within the budget. `Ok(true)` on confirmation,
    /// `Ok(false)` when the budget ran out, `Err` on an explicit ledger
    /// error attached to the signature.
    async fn poll_confirmation(
        &self,
        signature: &str,
        budget: PollBudget,
    ) -> Result<bool, String> {
        let result = poll_until(budget, || async move {
            match self.ledger.signature_status(signature).await {
                Ok(status) => {
                    if let Some(err) = status.err {
                        return Some(Err(err));
                    }
                    match status.confirmation {
                        Some(Commitment::Confirmed) | Some(Commitment::Finalized) => {
                            Some(Ok(()))
                        }
                        _ => None,
                    }
                }
                Err(e) => {
                    // Transient RPC failure; keep polling within the budget.
                    tracing::debug!(error = %e, "status poll failed");
                    None
                }
            }
        })
        .await;

        match result {
            Some(Ok(())) => Ok(true),
            Some(Err(err)) => Err(err),
            None => Ok(false),
        }
    }

    fn record_submission(
        &self,
        invoice: &Invoice,
        payer: Option<&str>,
        signature: &str,
        method: PaymentMethod,
        is_anonymous: bool,
    ) {
        let mut candidate = invoice.clone();
        candidate.status = InvoiceStatus::Pending;
        candidate.payer = payer.map(String::from);
        candidate.signature = Some(signature.to_string());
        candidate.payment_method = Some(method);
        candidate.is_anonymous = is_anonymous;
        let merged = self.store.merge(candidate);

        let _ = write_audit_event(
            &AuditEvent::new("payment_submitted", &invoice.id, "pending")
                .with_signature(signature.to_string())
                .with_fingerprint(invoice_fingerprint(&merged))
                .with_parties(payer.map(String::from), invoice.recipient.clone()),
        );
    }

    fn record_paid(
        &self,
        invoice: &Invoice,
        payer: Option<&str>,
        signature: &str,
        method: PaymentMethod,
        is_anonymous: bool,
    ) {
        let mut candidate = invoice.clone();
        candidate.status = InvoiceStatus::Paid;
        candidate.payer = payer.map(String::from);
        candidate.signature = Some(signature.to_string());
        candidate.payment_method = Some(method);
        candidate.is_anonymous = is_anonymous;
        candidate.paid_at = Some(Utc::now());
        let merged = self.store.merge(candidate);

        tracing::info!(invoice_id = %invoice.id, signature = %signature, "invoice paid");
        let _ = write_audit_event(
            &AuditEvent::new("payment_confirmed", &invoice.id, "paid")
                .with_signature(signature.to_string())
                .with_fingerprint(invoice_fingerprint(&merged))
                .with_parties(payer.map(String::from), invoice.recipient.clone()),
        );
    }

    fn record_failure(
        &self,
        invoice: &Invoice,
        signature: &str,
        err: String,
    ) -> SettlementError {
        tracing::error!(invoice_id = %invoice.id, signature = %signature, error = %err,
            "transaction failed on the ledger");
        let _ = write_audit_event(
            &AuditEvent::new("payment_failed", &invoice.id, "pending")
                .with_signature(signature.to_string())
                .with_error(err.clone()),
        );
        SettlementError::TransactionFailed(err)
    }
}

fn ledger_err(e: anyhow::Error) -> SettlementError {
    SettlementError::Ledger(e.to_string())
}
