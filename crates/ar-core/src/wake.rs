/// Capacity-1 wake channel for the orchestrator loop.
///
/// Senders (API handlers, pollers, dispatcher bookkeeping) perform a
/// non-blocking send; a full buffer means a tick is already pending and the
/// signal is a no-op. The loop drains the buffer on each wake.
#[derive(Clone)]
pub struct WakeSignal {
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
}

impl WakeSignal {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self { tx, rx }
    }

    /// Request an immediate tick. Never blocks.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// Wait for the next wake.
    pub async fn wait(&self) {
        let _ = self.rx.recv_async().await;
    }

    /// True when a wake is already buffered (used in tests for P8).
    pub fn is_signalled(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_is_non_blocking_when_full() {
        let wake = WakeSignal::new();
        wake.notify();
        wake.notify();
        wake.notify();
        assert!(wake.is_signalled());
    }

    #[tokio::test]
    async fn wait_drains_the_buffer() {
        let wake = WakeSignal::new();
        wake.notify();
        wake.wait().await;
        assert!(!wake.is_signalled());
    }
}
