use std::future::Future;

use tokio::sync::watch;

use crate::error::LedgerError;

/// Owning side of a cancellation signal. Dropping it without calling
/// [`CancelHandle::cancel`] leaves every token un-cancelled forever.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Cheap, cloneable observer handed to the engines.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle fires. Pends forever if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Race `fut` against cancellation.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        if self.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(LedgerError::Cancelled),
            res = fut => res,
        }
    }

    /// Cancellable sleep.
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<(), LedgerError> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
