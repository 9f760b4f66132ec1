use std::future::Future;
use std::time::Duration;

/// Explicit attempt budget for a polling loop. Every bounded wait in the
/// settlement flow goes through one of these; nothing polls forever.
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Run `f` until it yields a value or the budget is exhausted. Sleeps the
/// budget interval between attempts, not after the last one.
pub async fn poll_until<T, F, Fut>(budget: PollBudget, mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..budget.attempts {
        if let Some(value) = f().await {
            return Some(value);
        }
        if attempt + 1 < budget.attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_at_first_value() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = poll_until(PollBudget::new(10, Duration::from_millis(1)), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            (n == 3).then_some(n)
        })
        .await;
        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_the_budget_and_gives_up() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Option<()> =
            poll_until(PollBudget::new(4, Duration::from_millis(1)), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                None
            })
            .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
