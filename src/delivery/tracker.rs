use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::{status::MessageDeliveryStatus, store::DeliveryStatusStore};
use crate::{
    common::{error::MusigError, types::MessageId},
    peer_msg::AckMessage,
};

/// Delivery status of every outbound message that requested an acknowledgment.
///
/// Updates for one message id are serialized by a lock of their own and persisted
/// before the in-memory value changes hands. No map shard is held while persisting, so
/// unrelated ids do not wait on the journal.
pub struct MessageDeliveryTracker {
    statuses: DashMap<MessageId, watch::Sender<MessageDeliveryStatus>>,
    update_locks: DashMap<MessageId, Arc<Mutex<()>>>,
    store: Arc<dyn DeliveryStatusStore>,
}

impl MessageDeliveryTracker {
    pub fn new(store: Arc<dyn DeliveryStatusStore>) -> Result<Self, MusigError> {
        let statuses = DashMap::new();
        for (message_id, status) in store.load()? {
            let (status_tx, _) = watch::channel(status);
            statuses.insert(message_id, status_tx);
        }
        debug!("Delivery tracker restored {} entries", statuses.len());
        Ok(Self {
            statuses,
            update_locks: DashMap::new(),
            store,
        })
    }

    pub fn on_message_sent_status(
        &self,
        message_id: &str,
        status: MessageDeliveryStatus,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        self.update(message_id, |_| status)
    }

    pub fn on_ack_message_received(
        &self,
        ack_message: &AckMessage,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        self.update(&ack_message.id, MessageDeliveryStatus::on_ack)
    }

    fn update(
        &self,
        message_id: &str,
        next_status: impl FnOnce(Option<MessageDeliveryStatus>) -> MessageDeliveryStatus,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        let update_lock = self
            .update_locks
            .entry(message_id.to_string())
            .or_default()
            .value()
            .clone();
        let _update_guard = update_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.status(message_id);
        let merged = MessageDeliveryStatus::merge(current, next_status(current));
        if current == Some(merged) {
            trace!("Message {} delivery status stays {}", message_id, merged);
            return Ok(merged);
        }

        self.store.persist(message_id, merged)?;
        match self.statuses.entry(message_id.to_string()) {
            Entry::Occupied(entry) => {
                entry.get().send_replace(merged);
            }
            Entry::Vacant(entry) => {
                let (status_tx, _) = watch::channel(merged);
                entry.insert(status_tx);
            }
        }
        match current {
            Some(current) => debug!(
                "Message {} delivery status {} -> {}",
                message_id, current, merged
            ),
            None => debug!("Message {} delivery status {}", message_id, merged),
        }
        Ok(merged)
    }

    pub fn status(&self, message_id: &str) -> Option<MessageDeliveryStatus> {
        self.statuses
            .get(message_id)
            .map(|status_tx| *status_tx.borrow())
    }

    pub fn statuses(&self) -> HashMap<MessageId, MessageDeliveryStatus> {
        self.statuses
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value().borrow()))
            .collect()
    }

    /// Stream of status changes for one message id, if it is being tracked.
    pub fn subscribe(&self, message_id: &str) -> Option<watch::Receiver<MessageDeliveryStatus>> {
        self.statuses
            .get(message_id)
            .map(|status_tx| status_tx.subscribe())
    }

    /// Waits until the message is acknowledged. Reaching the timeout first is a
    /// delivery failure for the caller to act on, the tracked status is left as is.
    pub async fn await_delivery(
        &self,
        message_id: &str,
        timeout: Duration,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        let Some(mut status_rx) = self.subscribe(message_id) else {
            return Err(MusigError::DeliveryFailure {
                message_id: message_id.to_string(),
                status: None,
            });
        };

        let received = status_rx.wait_for(|status| status.is_received());
        let waited = tokio::time::timeout(timeout, received)
            .await
            .map(|received| received.map(|status| *status));
        match waited {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) | Err(_) => Err(MusigError::DeliveryFailure {
                message_id: message_id.to_string(),
                status: self.status(message_id),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{FileDeliveryStatusStore, MemoryDeliveryStatusStore};

    fn some_tracker() -> MessageDeliveryTracker {
        MessageDeliveryTracker::new(Arc::new(MemoryDeliveryStatusStore::new())).unwrap()
    }

    fn ack(message_id: &str) -> AckMessage {
        AckMessage::new(message_id.to_string())
    }

    #[test]
    fn test_received_status_is_never_downgraded() {
        let tracker = some_tracker();
        tracker
            .on_message_sent_status("m1", MessageDeliveryStatus::Sent)
            .unwrap();
        tracker.on_ack_message_received(&ack("m1")).unwrap();
        assert_eq!(tracker.status("m1"), Some(MessageDeliveryStatus::Arrived));

        for late_status in [
            MessageDeliveryStatus::Failed,
            MessageDeliveryStatus::Sent,
            MessageDeliveryStatus::AddedToMailbox,
            MessageDeliveryStatus::MailboxMsgReceived,
        ] {
            let status = tracker.on_message_sent_status("m1", late_status).unwrap();
            assert_eq!(status, MessageDeliveryStatus::Arrived);
        }
        tracker.on_ack_message_received(&ack("m1")).unwrap();
        assert_eq!(tracker.status("m1"), Some(MessageDeliveryStatus::Arrived));
    }

    #[test]
    fn test_ack_without_prior_entry_creates_arrived() {
        let tracker = some_tracker();
        let status = tracker.on_ack_message_received(&ack("unknown")).unwrap();
        assert_eq!(status, MessageDeliveryStatus::Arrived);
        assert_eq!(
            tracker.status("unknown"),
            Some(MessageDeliveryStatus::Arrived)
        );
    }

    #[test]
    fn test_ack_after_mailbox_upgrades_to_mailbox_received() {
        let tracker = some_tracker();
        tracker
            .on_message_sent_status("m1", MessageDeliveryStatus::AddedToMailbox)
            .unwrap();
        tracker.on_ack_message_received(&ack("m1")).unwrap();
        assert_eq!(
            tracker.status("m1"),
            Some(MessageDeliveryStatus::MailboxMsgReceived)
        );

        // A late direct-connection report does not override the mailbox receipt
        tracker
            .on_message_sent_status("m1", MessageDeliveryStatus::Arrived)
            .unwrap();
        assert_eq!(
            tracker.status("m1"),
            Some(MessageDeliveryStatus::MailboxMsgReceived)
        );
    }

    #[test]
    fn test_failed_can_still_improve() {
        let tracker = some_tracker();
        tracker
            .on_message_sent_status("m1", MessageDeliveryStatus::Failed)
            .unwrap();
        tracker
            .on_message_sent_status("m1", MessageDeliveryStatus::Sent)
            .unwrap();
        assert_eq!(tracker.status("m1"), Some(MessageDeliveryStatus::Sent));
    }

    #[test]
    fn test_concurrent_updates_for_many_messages() {
        let tracker = Arc::new(some_tracker());

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let tracker = tracker.clone();
                scope.spawn(move || {
                    for index in 0..50 {
                        let message_id = format!("m{}", index);
                        if (index + worker) % 2 == 0 {
                            tracker.on_ack_message_received(&ack(&message_id)).unwrap();
                        } else {
                            tracker
                                .on_message_sent_status(&message_id, MessageDeliveryStatus::Failed)
                                .unwrap();
                        }
                    }
                });
            }
        });

        // Every id got at least one ack from some worker, and acks always win
        let statuses = tracker.statuses();
        assert_eq!(statuses.len(), 50);
        assert!(statuses.values().all(|status| status.is_received()));
    }

    #[test]
    fn test_statuses_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delivery_status.jsonl");

        {
            let tracker =
                MessageDeliveryTracker::new(Arc::new(FileDeliveryStatusStore::new(&path))).unwrap();
            tracker
                .on_message_sent_status("m1", MessageDeliveryStatus::Sent)
                .unwrap();
            tracker
                .on_message_sent_status("m2", MessageDeliveryStatus::AddedToMailbox)
                .unwrap();
            tracker.on_ack_message_received(&ack("m1")).unwrap();
        }

        let tracker =
            MessageDeliveryTracker::new(Arc::new(FileDeliveryStatusStore::new(&path))).unwrap();
        assert_eq!(tracker.status("m1"), Some(MessageDeliveryStatus::Arrived));
        assert_eq!(
            tracker.status("m2"),
            Some(MessageDeliveryStatus::AddedToMailbox)
        );

        tracker.on_ack_message_received(&ack("m2")).unwrap();
        assert_eq!(
            tracker.status("m2"),
            Some(MessageDeliveryStatus::MailboxMsgReceived)
        );
    }

    struct GatedStore {
        gated_id: &'static str,
        entered_tx: Mutex<std::sync::mpsc::Sender<()>>,
        release_rx: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl DeliveryStatusStore for GatedStore {
        fn load(&self) -> Result<HashMap<MessageId, MessageDeliveryStatus>, MusigError> {
            Ok(HashMap::new())
        }

        fn persist(&self, message_id: &str, _status: MessageDeliveryStatus) -> Result<(), MusigError> {
            if message_id == self.gated_id {
                self.entered_tx.lock().unwrap().send(()).unwrap();
                self.release_rx.lock().unwrap().recv().unwrap();
            }
            Ok(())
        }
    }

    #[test]
    fn test_slow_persist_does_not_block_other_messages() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let store = GatedStore {
            gated_id: "slow",
            entered_tx: Mutex::new(entered_tx),
            release_rx: Mutex::new(release_rx),
        };
        let tracker = MessageDeliveryTracker::new(Arc::new(store)).unwrap();

        std::thread::scope(|scope| {
            let slow = scope.spawn(|| {
                tracker
                    .on_message_sent_status("slow", MessageDeliveryStatus::Sent)
                    .unwrap()
            });
            entered_rx.recv().unwrap();

            // Not published until persisted, and reading it does not wait on the journal
            assert_eq!(tracker.status("slow"), None);
            for index in 0..64 {
                let message_id = format!("m{}", index);
                tracker.on_ack_message_received(&ack(&message_id)).unwrap();
            }
            assert_eq!(tracker.statuses().len(), 64);

            release_tx.send(()).unwrap();
            assert_eq!(slow.join().unwrap(), MessageDeliveryStatus::Sent);
        });
        assert_eq!(tracker.status("slow"), Some(MessageDeliveryStatus::Sent));
    }

    #[tokio::test]
    async fn test_subscriber_sees_acknowledgment() {
        let tracker = some_tracker();
        tracker
            .on_message_sent_status("m1", MessageDeliveryStatus::Sent)
            .unwrap();
        let mut status_rx = tracker.subscribe("m1").unwrap();
        assert!(tracker.subscribe("m2").is_none());

        tracker.on_ack_message_received(&ack("m1")).unwrap();
        status_rx.changed().await.unwrap();
        assert_eq!(*status_rx.borrow(), MessageDeliveryStatus::Arrived);
    }

    #[tokio::test]
    async fn test_await_delivery_times_out() {
        let tracker = some_tracker();
        tracker
            .on_message_sent_status("m1", MessageDeliveryStatus::AddedToMailbox)
            .unwrap();

        let result = tracker
            .await_delivery("m1", Duration::from_millis(20))
            .await;
        match result {
            Err(MusigError::DeliveryFailure { message_id, status }) => {
                assert_eq!(message_id, "m1");
                assert_eq!(status, Some(MessageDeliveryStatus::AddedToMailbox));
            }
            other => panic!("Unexpected result {:?}", other),
        }

        tracker.on_ack_message_received(&ack("m1")).unwrap();
        let status = tracker
            .await_delivery("m1", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(status, MessageDeliveryStatus::MailboxMsgReceived);
    }
}
