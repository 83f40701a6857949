use crate::error::ControlError;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const LOCAL_CALL_TIMEOUT: Duration = Duration::from_secs(1);
pub const NETWORK_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_SETTLE_MARGIN: Duration = Duration::from_millis(250);

/// Time left for one bounded call.
///
/// The waiter cancels the budget when it stops waiting. From then on `check` and `cap`
/// fail, so a late worker cannot start another step that changes the peer.
#[derive(Debug, Clone)]
pub struct CallBudget {
    deadline: Instant,
    total: Duration,
    cancelled: Arc<AtomicBool>,
}

impl CallBudget {
    pub fn new(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
            total,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), ControlError> {
        self.cap(self.total).map(|_| ())
    }

    /// `limit` shortened to what is left; fails once the budget is spent or cancelled.
    pub fn cap(&self, limit: Duration) -> Result<Duration, ControlError> {
        let left = self.remaining();
        if self.is_cancelled() || left.is_zero() {
            return Err(ControlError::Timeout(self.total));
        }
        Ok(limit.min(left))
    }
}

/// Runs `f` on its own thread and waits at most `timeout` for the single result.
///
/// `f` gets a budget that ends a little before `timeout`, so a worker that respects it
/// answers before the waiter gives up. On overrun the budget is cancelled, the call is
/// reported as `Timeout`, and the late result is discarded.
pub fn call_budgeted<T, F>(label: &str, timeout: Duration, f: F) -> Result<T, ControlError>
where
    T: Send + 'static,
    F: FnOnce(&CallBudget) -> Result<T, ControlError> + Send + 'static,
{
    let margin = MAX_SETTLE_MARGIN.min(timeout / 4);
    let budget = CallBudget::new(timeout - margin);
    let inner = budget.clone();

    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name(format!("hushmic-{label}"))
        .spawn(move || {
            let _ = tx.send(f(&inner));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            budget.cancel();
            Err(ControlError::Timeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(ControlError::ActionFailed(format!(
            "{label} worker exited without a result"
        ))),
    }
}

pub fn call_bounded<T, F>(label: &str, timeout: Duration, f: F) -> Result<T, ControlError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ControlError> + Send + 'static,
{
    call_budgeted(label, timeout, move |_| f())
}
