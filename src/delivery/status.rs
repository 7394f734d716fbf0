use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageDeliveryStatus {
    Connecting,
    Sent,
    Arrived,
    TryAddToMailbox,
    AddedToMailbox,
    MailboxMsgReceived,
    Failed,
}

impl MessageDeliveryStatus {
    pub fn is_received(&self) -> bool {
        matches!(
            self,
            MessageDeliveryStatus::Arrived | MessageDeliveryStatus::MailboxMsgReceived
        )
    }

    /// Status after an ack for a message currently in this status.
    pub(crate) fn on_ack(current: Option<MessageDeliveryStatus>) -> MessageDeliveryStatus {
        match current {
            Some(MessageDeliveryStatus::AddedToMailbox) => {
                MessageDeliveryStatus::MailboxMsgReceived
            }
            _ => MessageDeliveryStatus::Arrived,
        }
    }

    /// First-received-wins merge. A received status is never replaced.
    pub(crate) fn merge(
        current: Option<MessageDeliveryStatus>,
        update: MessageDeliveryStatus,
    ) -> MessageDeliveryStatus {
        match current {
            Some(current) if current.is_received() => current,
            _ => update,
        }
    }
}
