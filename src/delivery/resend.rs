use std::collections::HashMap;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{status::MessageDeliveryStatus, tracker::MessageDeliveryTracker};
use crate::{
    common::{error::MusigError, types::MessageId},
    config::ResendConfig,
    peer_msg::TradeMessage,
};

struct PendingResend {
    message: TradeMessage,
    num_auto_resends: u32,
    num_manual_resends: u32,
    next_attempt: Option<Instant>,
    last_attempt: Instant,
}

/// Ack-requesting messages that may still need to be sent again.
///
/// Resends reuse the original message id, so the receiver's replay guard absorbs any
/// copy that arrives more than once. An entry with no automatic resend scheduled is
/// evicted once its manual resends are used up or the manual resend window has passed.
pub(crate) struct ResendQueue {
    config: ResendConfig,
    pending: HashMap<MessageId, PendingResend>,
}

impl ResendQueue {
    pub(crate) fn new(config: ResendConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
        }
    }

    fn next_attempt(&self, status: MessageDeliveryStatus, now: Instant) -> Option<Instant> {
        match status {
            MessageDeliveryStatus::Failed => Some(now + self.config.failed_retry()),
            MessageDeliveryStatus::Connecting
            | MessageDeliveryStatus::Sent
            | MessageDeliveryStatus::TryAddToMailbox => Some(now + self.config.resend_interval()),
            // The mailbox holds the message for the peer, waiting is all there is to do
            MessageDeliveryStatus::AddedToMailbox => None,
            MessageDeliveryStatus::Arrived | MessageDeliveryStatus::MailboxMsgReceived => None,
        }
    }

    pub(crate) fn track(&mut self, message: TradeMessage, status: MessageDeliveryStatus, now: Instant) {
        if status.is_received() {
            self.pending.remove(&message.message_id);
            return;
        }
        let next_attempt = self.next_attempt(status, now);
        match self.pending.get_mut(&message.message_id) {
            Some(pending) => {
                pending.next_attempt = next_attempt;
                pending.last_attempt = now;
            }
            None => {
                self.pending.insert(
                    message.message_id.clone(),
                    PendingResend {
                        message,
                        num_auto_resends: 0,
                        num_manual_resends: 0,
                        next_attempt,
                        last_attempt: now,
                    },
                );
            }
        }
    }

    fn is_spent(config: &ResendConfig, pending: &PendingResend, now: Instant) -> bool {
        pending.next_attempt.is_none()
            && (pending.num_manual_resends >= config.max_manual_resends
                || now >= pending.last_attempt + config.manual_resend_window())
    }

    /// Returns messages due for an automatic resend, dropping those acknowledged or
    /// spent since.
    pub(crate) fn due(&mut self, now: Instant, tracker: &MessageDeliveryTracker) -> Vec<TradeMessage> {
        let config = &self.config;
        let mut due = Vec::new();
        let mut spent = Vec::new();

        for (message_id, pending) in self.pending.iter_mut() {
            let status = tracker.status(message_id);
            if status.map_or(false, |status| status.is_received()) {
                debug!("Message {} acknowledged, no longer pending resend", message_id);
                spent.push(message_id.clone());
                continue;
            }
            if status == Some(MessageDeliveryStatus::AddedToMailbox) {
                pending.next_attempt = None;
            }

            match pending.next_attempt {
                Some(next_attempt) if next_attempt <= now => {
                    pending.next_attempt = None;
                    if pending.num_auto_resends >= config.max_auto_resends {
                        warn!(
                            "Message {} for TradeUUID {} still unacknowledged after {} resends",
                            message_id, pending.message.trade_id, pending.num_auto_resends
                        );
                    } else {
                        pending.num_auto_resends += 1;
                        due.push(pending.message.clone());
                    }
                }
                Some(_) => {}
                None => {
                    if Self::is_spent(config, pending, now) {
                        debug!("Message {} no longer pending resend", message_id);
                        spent.push(message_id.clone());
                    }
                }
            }
        }

        for message_id in spent {
            self.pending.remove(&message_id);
        }
        due
    }

    /// The trade is over. Its messages get no more manual resends and leave the queue
    /// once nothing is scheduled for them.
    pub(crate) fn release_trade(&mut self, trade_id: Uuid, now: Instant) {
        let max_manual_resends = self.config.max_manual_resends;
        for pending in self.pending.values_mut() {
            if pending.message.trade_id == trade_id {
                pending.num_manual_resends = max_manual_resends;
            }
        }
        let config = &self.config;
        self.pending.retain(|_, pending| {
            pending.message.trade_id != trade_id || !Self::is_spent(config, pending, now)
        });
    }

    pub(crate) fn manual(&mut self, message_id: &str) -> Result<TradeMessage, MusigError> {
        let max_manual_resends = self.config.max_manual_resends;
        let Some(pending) = self.pending.get_mut(message_id) else {
            return Err(MusigError::Simple(format!(
                "Message {} is not pending resend",
                message_id
            )));
        };
        if pending.num_manual_resends >= max_manual_resends {
            return Err(MusigError::Simple(format!(
                "Message {} already resent manually {} times",
                message_id, pending.num_manual_resends
            )));
        }
        pending.num_manual_resends += 1;
        info!(
            "Manual resend {} of message {} for TradeUUID {}",
            pending.num_manual_resends, message_id, pending.message.trade_id
        );
        Ok(pending.message.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
