//! One-way event channel from the engine to its embedder.
//!
//! Components publish into a typed queue; the application drains it.
//! There are no observer back-pointers, and balance events are published
//! only after the operation that triggered them has fully committed.

use tokio::sync::mpsc;

use crate::container::{OutputMask, TransfersContainer};
use crate::error::WalletError;
use crate::types::TransactionId;
use crate::unconfirmed::UnconfirmedTransactions;

/// Events emitted by the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum WalletEvent {
    /// A block was processed during chain sync.
    SyncProgress { current: u64, total: u64 },
    /// A chain sync round finished.
    SyncCompleted(Result<(), WalletError>),
    /// Spendable balance changed.
    ActualBalanceUpdated(u64),
    /// Locked/in-flight balance changed.
    PendingBalanceUpdated(u64),
    /// A transaction not sent by this wallet was first seen.
    ExternalTransactionCreated(TransactionId),
    /// An existing history entry changed state.
    TransactionUpdated(TransactionId),
    /// A local send finished, successfully or not.
    SendTransactionCompleted {
        transaction_id: TransactionId,
        result: Result<(), WalletError>,
    },
}

/// Publishing half of the event channel.
///
/// Sends are fire-and-forget: a dropped receiver silences events rather
/// than failing engine operations.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<WalletEvent>>,
}

impl EventSink {
    /// A sink wired to a fresh channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WalletEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish one event.
    pub fn publish(&self, event: WalletEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// The wallet's spendable balance.
pub(crate) fn actual_balance(container: &TransfersContainer) -> u64 {
    container.balance(OutputMask::SPENDABLE)
}

/// Incoming-but-not-yet-spendable: locked and maturing outputs plus
/// change still in flight.
pub(crate) fn pending_balance(
    container: &TransfersContainer,
    unconfirmed: &UnconfirmedTransactions,
) -> u64 {
    container.balance(OutputMask::LOCKED | OutputMask::SOFT_LOCKED | OutputMask::KEY)
        + unconfirmed.pending_balance()
}

/// Emit both balance events. Callers invoke this only once the
/// triggering operation has fully committed.
pub(crate) fn publish_balances(
    container: &TransfersContainer,
    unconfirmed: &UnconfirmedTransactions,
    sink: &EventSink,
) {
    sink.publish(WalletEvent::ActualBalanceUpdated(actual_balance(container)));
    sink.publish(WalletEvent::PendingBalanceUpdated(pending_balance(
        container,
        unconfirmed,
    )));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.publish(WalletEvent::ActualBalanceUpdated(1));
        sink.publish(WalletEvent::PendingBalanceUpdated(2));

        assert_eq!(rx.try_recv().unwrap(), WalletEvent::ActualBalanceUpdated(1));
        assert_eq!(
            rx.try_recv().unwrap(),
            WalletEvent::PendingBalanceUpdated(2)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        let sink = EventSink::disabled();
        sink.publish(WalletEvent::ActualBalanceUpdated(1));
    }

    #[test]
    fn test_dropped_receiver_does_not_fail() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.publish(WalletEvent::ActualBalanceUpdated(1));
    }
}
