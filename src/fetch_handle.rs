//! Completion signal of a background fetch.
use tokio::sync::oneshot;

/// Handle to a fetch running in the background.
///
/// The fetch reports exactly once: `true` if the variant cache was replaced with the server
/// response, `false` otherwise. The reason of a failure is only logged. Dropping the handle does
/// not cancel the fetch.
#[derive(Debug)]
#[must_use = "dropping the handle ignores the fetch outcome, the fetch keeps running"]
pub struct FetchHandle {
    receiver: oneshot::Receiver<bool>,
    outcome: Option<bool>,
}

impl FetchHandle {
    /// Wait for the fetch to complete.
    pub async fn wait(self) -> bool {
        match self.outcome {
            Some(success) => success,
            None => self.receiver.await.unwrap_or(false),
        }
    }

    /// Block the current thread until the fetch completes.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context. Use
    /// [`FetchHandle::wait`] there instead.
    pub fn blocking_wait(self) -> bool {
        match self.outcome {
            Some(success) => success,
            None => self.receiver.blocking_recv().unwrap_or(false),
        }
    }

    /// Returns the outcome if the fetch has completed already.
    pub fn try_outcome(&mut self) -> Option<bool> {
        if self.outcome.is_none() {
            self.outcome = match self.receiver.try_recv() {
                Ok(success) => Some(success),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(false),
            };
        }
        self.outcome
    }
}

/// Sending half of [`FetchHandle`]. If it is dropped without [`Completion::complete`] (e.g., the
/// fetch task panicked or could not be spawned), it reports failure.
pub(crate) struct Completion {
    sender: Option<oneshot::Sender<bool>>,
}

impl Completion {
    pub(crate) fn complete(mut self, success: bool) {
        self.send(success);
    }

    fn send(&mut self, success: bool) {
        if let Some(sender) = self.sender.take() {
            // Error means that the handle was dropped and nobody is waiting for the outcome.
            let _ = sender.send(success);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.send(false);
    }
}

pub(crate) fn completion() -> (Completion, FetchHandle) {
    let (sender, receiver) = oneshot::channel();
    (
        Completion {
            sender: Some(sender),
        },
        FetchHandle {
            receiver,
            outcome: None,
        },
    )
}
