//! Passive settlement detection against a scripted ledger: tolerance
//! matching, payer derivation, dedup across polls, and bounded termination.

use chrono::Duration as ChronoDuration;
use settlement::{ObserverConfig, PaymentObserver};
use std::sync::Arc;
use std::time::Duration;
use veilpay_core::tokens::{TokenPolicy, LAMPORTS_PER_SOL};
use veilpay_core::{Invoice, InvoiceStatus, Token};
use ledger::mock::{random_signature, MockLedger};
use ledger::{ActivityEntry, TokenDelta, TransactionDetail};
use store::{InvoiceStore, MemoryBlob};

const PAYER: &str = "PayerWa11etAddre55";
const RECIPIENT: &str = "Recipient1nvoiceAddre55";

struct TestEnv {
    ledger: Arc<MockLedger>,
    store: Arc<InvoiceStore>,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            ledger: MockLedger::new(),
            store: Arc::new(InvoiceStore::open(Box::new(MemoryBlob::new()))),
        }
    }

    fn observer(&self, max_attempts: u32) -> PaymentObserver {
        PaymentObserver::with_config(
            self.ledger.clone(),
            self.store.clone(),
            ObserverConfig {
                interval: Duration::from_millis(1),
                max_attempts,
                ..ObserverConfig::default()
            },
        )
    }

    fn invoice(&self, amount: f64, token: Token) -> Invoice {
        self.store.create(amount, token, None, RECIPIENT)
    }

    /// Seed one settled native transfer of `amount` SOL to the recipient.
    fn seed_native_transfer(&self, invoice: &Invoice, amount: f64) -> String {
        let signature = random_signature();
        let lamports = (amount * LAMPORTS_PER_SOL as f64) as i64;
        self.ledger.seed_activity(
            RECIPIENT,
            vec![ActivityEntry {
                signature: signature.clone(),
                block_time: Some(invoice.created_at + ChronoDuration::seconds(2)),
                err: None,
            }],
        );
        self.ledger.seed_detail(
            &signature,
            TransactionDetail {
                block_time: Some(invoice.created_at + ChronoDuration::seconds(2)),
                account_keys: vec![PAYER.to_string(), RECIPIENT.to_string()],
                native_deltas: vec![-(lamports + 5_000), lamports],
                token_deltas: vec![],
            },
        );
        signature
    }
}

#[tokio::test]
async fn detects_a_direct_native_settlement() {
    let env = TestEnv::new();
    let invoice = env.invoice(2.5, Token::Sol);
    let signature = env.seed_native_transfer(&invoice, 2.5);

    let paid = env.observer(10).run(&invoice.id).await.unwrap();

    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.signature.as_deref(), Some(signature.as_str()));
    assert_eq!(paid.payer.as_deref(), Some(PAYER));
    assert!(paid.paid_at.is_some());

    let stored = env.store.get(&invoice.id).unwrap();
    assert_eq!(stored.status, InvoiceStatus::Paid);
}

#[tokio::test]
async fn accepts_deltas_inside_the_tolerance_band() {
    let env = TestEnv::new();
    let invoice = env.invoice(2.0, Token::Sol);
    env.seed_native_transfer(&invoice, 2.0 * 1.005);

    let paid = env.observer(5).run(&invoice.id).await;
    assert!(paid.is_some());
}

#[tokio::test]
async fn rejects_deltas_outside_the_tolerance_band() {
    let env = TestEnv::new();
    let invoice = env.invoice(2.0, Token::Sol);
    env.seed_native_transfer(&invoice, 2.0 * 1.5);

    let paid = env.observer(3).run(&invoice.id).await;
    assert!(paid.is_none());
    assert_eq!(
        env.store.get(&invoice.id).unwrap().status,
        InvoiceStatus::Pending
    );
}

#[tokio::test]
async fn gives_up_after_the_attempt_budget_with_no_activity() {
    let env = TestEnv::new();
    let invoice = env.invoice(1.0, Token::Sol);

    let paid = env.observer(4).run(&invoice.id).await;
    assert!(paid.is_none());
    assert_eq!(
        env.store.get(&invoice.id).unwrap().status,
        InvoiceStatus::Pending
    );
    // One activity query per attempt, nothing else.
    assert_eq!(env.ledger.network_calls(), 4);
}

#[tokio::test]
async fn ignores_history_predating_the_invoice() {
    let env = TestEnv::new();
    let invoice = env.invoice(2.0, Token::Sol);

    let signature = random_signature();
    let lamports = (2.0 * LAMPORTS_PER_SOL as f64) as i64;
    env.ledger.seed_activity(
        RECIPIENT,
        vec![ActivityEntry {
            signature: signature.clone(),
            block_time: Some(invoice.created_at - ChronoDuration::hours(1)),
            err: None,
        }],
    );
    env.ledger.seed_detail(
        &signature,
        TransactionDetail {
            block_time: Some(invoice.created_at - ChronoDuration::hours(1)),
            account_keys: vec![PAYER.to_string(), RECIPIENT.to_string()],
            native_deltas: vec![-lamports, lamports],
            token_deltas: vec![],
        },
    );

    let paid = env.observer(3).run(&invoice.id).await;
    assert!(paid.is_none());
}

#[tokio::test]
async fn ruled_out_entries_are_not_reinspected() {
    let env = TestEnv::new();
    let invoice = env.invoice(2.0, Token::Sol);
    // Wildly wrong amount: inspected once, then remembered as ruled out.
    env.seed_native_transfer(&invoice, 9.0);

    let paid = env.observer(3).run(&invoice.id).await;
    assert!(paid.is_none());
    // Three activity queries, one detail fetch.
    assert_eq!(env.ledger.network_calls(), 4);
}

#[tokio::test]
async fn matches_token_account_deltas_for_stable_tokens() {
    let env = TestEnv::new();
    let invoice = env.invoice(10.0, Token::Usdc);
    let mint = TokenPolicy::of(Token::Usdc).mint.unwrap();

    let signature = random_signature();
    env.ledger.seed_activity(
        RECIPIENT,
        vec![ActivityEntry {
            signature: signature.clone(),
            block_time: Some(invoice.created_at + ChronoDuration::seconds(1)),
            err: None,
        }],
    );
    env.ledger.seed_detail(
        &signature,
        TransactionDetail {
            block_time: Some(invoice.created_at + ChronoDuration::seconds(1)),
            account_keys: vec![PAYER.to_string(), RECIPIENT.to_string()],
            native_deltas: vec![-5_000, 0],
            token_deltas: vec![TokenDelta {
                owner: RECIPIENT.to_string(),
                mint: mint.to_string(),
                // 1% under, inside the band: the gateway took its fee.
                delta: 9.9,
            }],
        },
    );

    let paid = env.observer(5).run(&invoice.id).await.unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.payer.as_deref(), Some(PAYER));
}

#[tokio::test]
async fn skips_errored_ledger_entries() {
    let env = TestEnv::new();
    let invoice = env.invoice(2.0, Token::Sol);
    let signature = env.seed_native_transfer(&invoice, 2.0);
    env.ledger.seed_activity(
        RECIPIENT,
        vec![ActivityEntry {
            signature,
            block_time: Some(invoice.created_at + ChronoDuration::seconds(2)),
            err: Some("InstructionError".into()),
        }],
    );

    let paid = env.observer(3).run(&invoice.id).await;
    assert!(paid.is_none());
}

#[tokio::test]
async fn stops_immediately_when_settled_through_another_path() {
    let env = TestEnv::new();
    let invoice = env.invoice(2.0, Token::Sol);

    let mut paid = invoice.clone();
    paid.status = InvoiceStatus::Paid;
    paid.signature = Some(random_signature());
    env.store.merge(paid);

    let result = env.observer(10).run(&invoice.id).await.unwrap();
    assert_eq!(result.status, InvoiceStatus::Paid);
    assert_eq!(env.ledger.network_calls(), 0);
}

#[tokio::test]
async fn spawned_observer_can_be_stopped() {
    let env = TestEnv::new();
    let invoice = env.invoice(2.0, Token::Sol);

    let observer = PaymentObserver::with_config(
        env.ledger.clone(),
        env.store.clone(),
        ObserverConfig {
            interval: Duration::from_secs(60),
            max_attempts: 100,
            ..ObserverConfig::default()
        },
    );
    let handle = observer.spawn(&invoice.id);
    handle.stop();
    assert!(handle.join().await.is_none());
}
