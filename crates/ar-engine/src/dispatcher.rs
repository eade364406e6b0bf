use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::runner::ActionError;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no worker slot available")]
    NoSlotAvailable,
    #[error("an action is already running for this issue")]
    AlreadyRunning,
}

/// Bounded pool of async transition actions.
///
/// At most `max_workers` actions run concurrently and at most one per issue.
/// Each task's cancellation handle lives in the running-set for the whole
/// wrapped body: the slot is released only after the `finish` bookkeeping
/// completes, and that bookkeeping runs even when the action panics.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    max_workers: usize,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
    released: Notify,
}

impl Dispatcher {
    pub fn new(max_workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_workers,
                running: Mutex::new(HashMap::new()),
                released: Notify::new(),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Run `run` in a worker slot registered against `issue_id`, then hand
    /// its result to `finish`. Returns immediately once the task is spawned.
    pub fn dispatch<T, F, C>(&self, issue_id: Uuid, run: F, finish: C) -> Result<(), DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<T, ActionError>>
            + Send
            + 'static,
        C: FnOnce(Result<T, ActionError>) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        {
            let mut running = self.inner.running.lock().expect("dispatcher lock poisoned");
            if running.contains_key(&issue_id) {
                return Err(DispatchError::AlreadyRunning);
            }
            if running.len() >= self.inner.max_workers {
                return Err(DispatchError::NoSlotAvailable);
            }
            running.insert(issue_id, token.clone());
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(async move { run(token).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ActionError::Failed(panic_message(panic))));

            // Terminal bookkeeping must run even after a panic (D4); if the
            // bookkeeping itself panics, the slot is still released.
            if AssertUnwindSafe(async move { finish(result).await })
                .catch_unwind()
                .await
                .is_err()
            {
                error!(issue_id = %issue_id, "dispatch bookkeeping panicked");
            }

            inner
                .running
                .lock()
                .expect("dispatcher lock poisoned")
                .remove(&issue_id);
            inner.released.notify_waiters();
            debug!(issue_id = %issue_id, "worker slot released");
        });

        Ok(())
    }

    pub fn is_running(&self, issue_id: Uuid) -> bool {
        self.inner
            .running
            .lock()
            .expect("dispatcher lock poisoned")
            .contains_key(&issue_id)
    }

    /// Signal the running task's cancellation token. Returns whether a task
    /// was there to cancel. The slot stays held until the task observes the
    /// signal and its bookkeeping completes.
    pub fn cancel(&self, issue_id: Uuid) -> bool {
        let running = self.inner.running.lock().expect("dispatcher lock poisoned");
        match running.get(&issue_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .running
            .lock()
            .expect("dispatcher lock poisoned")
            .len()
    }

    /// Block until every in-flight task has released its slot.
    pub async fn wait_idle(&self) {
        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.active_count() == 0 {
                return;
            }
            released.await;
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("action panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("action panicked: {msg}")
    } else {
        "action panicked".to_string()
    }
}
