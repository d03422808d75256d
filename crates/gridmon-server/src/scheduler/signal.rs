use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Sending half of a capacity-one change channel.
///
/// Sends never block: while one signal is pending, further signals are dropped, so any
/// burst of changes collapses into a single restart.
#[derive(Clone)]
pub struct ChangeSignal {
    tx: mpsc::Sender<()>,
}

impl ChangeSignal {
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Returns `true` when the signal was queued.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => {
                tracing::debug!("Triggered reload via config change signal");
                true
            }
            Err(TrySendError::Full(())) => {
                tracing::debug!("Change signal not sent, channel full");
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}
