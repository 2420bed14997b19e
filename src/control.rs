use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Shared pause/cancel flags observed cooperatively by every segment worker.
///
/// The control path (signal handlers, tests) writes; workers only read, at
/// chunk granularity. Cancellation is one-way: once requested it never
/// clears, and `request_cancel` also wakes any worker parked in a pause wait
/// so it can observe the token.
#[derive(Debug, Default)]
pub struct ControlSignal {
    paused: AtomicBool,
    resume: Notify,
    cancel: CancellationToken,
}

impl ControlSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn request_resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume.notify_waiters();
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
        self.resume.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Parks the caller while the pause flag is set.
    ///
    /// Returns when the flag clears or cancellation fires; the caller is
    /// expected to check `is_cancelled` next. The waiter is registered before
    /// the flag is re-read, so a resume racing this call cannot be lost.
    pub async fn wait_while_paused(&self) {
        loop {
            if !self.is_paused() || self.is_cancelled() {
                return;
            }
            let mut resumed = std::pin::pin!(self.resume.notified());
            resumed.as_mut().enable();
            if !self.is_paused() {
                return;
            }
            tokio::select! {
                _ = resumed => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_not_paused() {
        let control = ControlSignal::new();
        timeout(Duration::from_millis(100), control.wait_while_paused())
            .await
            .expect("must not block while unpaused");
    }

    #[tokio::test]
    async fn test_resume_releases_paused_waiter() {
        let control = Arc::new(ControlSignal::new());
        control.request_pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "waiter must stay parked while paused");

        control.request_resume();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("resume must release the waiter")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_waiter() {
        let control = Arc::new(ControlSignal::new());
        control.request_pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        control.request_cancel();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel must release the waiter")
            .unwrap();
        assert!(control.is_cancelled());
    }

    #[test]
    fn test_cancel_is_one_way() {
        let control = ControlSignal::new();
        control.request_cancel();
        control.request_cancel();
        control.request_resume();
        assert!(control.is_cancelled());
    }
}
