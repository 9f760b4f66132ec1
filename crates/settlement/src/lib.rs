pub mod error;
pub mod executor;
pub mod observer;
pub mod plan;
pub mod retry;

pub use error::{SettlementError, SettlementOutcome};
pub use executor::{ExecutorConfig, PaymentExecutor};
pub use observer::{ObserverConfig, ObserverHandle, PaymentObserver};
pub use plan::{select_plan, SettlementPlan};
