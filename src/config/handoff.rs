//! Capacity-zero handoff between the watch task and the control task.
//!
//! `send` resolves only once the receiving side has taken the value and
//! answered it, so the sender can never run ahead of the consumer by more
//! than the item in flight. Values are delivered strictly in send order.

use tokio::sync::{mpsc, oneshot};

/// Create a connected sender/receiver pair.
pub fn channel<T, R>() -> (HandoffSender<T, R>, HandoffReceiver<T, R>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

/// Returned when the other side of the handoff has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("handoff peer closed")]
pub struct HandoffClosed;

#[derive(Debug)]
pub struct HandoffSender<T, R = ()> {
    tx: mpsc::Sender<(T, oneshot::Sender<R>)>,
}

impl<T, R> HandoffSender<T, R> {
    /// Block until the receiver has taken `value` and answered it.
    pub async fn send(&self, value: T) -> Result<R, HandoffClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send((value, reply_tx)).await.map_err(|_| HandoffClosed)?;
        reply_rx.await.map_err(|_| HandoffClosed)
    }
}

#[derive(Debug)]
pub struct HandoffReceiver<T, R = ()> {
    rx: mpsc::Receiver<(T, oneshot::Sender<R>)>,
}

impl<T, R> HandoffReceiver<T, R> {
    /// Take the next value with the slot its sender is waiting on.
    ///
    /// `None` once all senders are gone. Dropping the [`Reply`] unanswered
    /// fails the pending `send` with [`HandoffClosed`].
    pub async fn recv(&mut self) -> Option<(T, Reply<R>)> {
        let (value, reply) = self.rx.recv().await?;
        Some((value, Reply(reply)))
    }
}

/// Answer for one handed-off value
#[derive(Debug)]
pub struct Reply<R>(oneshot::Sender<R>);

impl<R> Reply<R> {
    pub fn send(self, answer: R) {
        let _ = self.0.send(answer);
    }
}
