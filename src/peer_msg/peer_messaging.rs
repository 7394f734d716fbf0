use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};
use uuid::Uuid;

use crate::{
    common::types::{MessageId, NetworkId},
    trade::MuSigMessage,
};

// Peer Messaging Data Structures

pub trait AckRequestingMessage: Send + Sync {
    fn ack_request_id(&self) -> &str;
    fn sender(&self) -> &NetworkId;
    fn receiver(&self) -> &NetworkId;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayPriority {
    Low,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageMetadata {
    pub ttl: Duration,
    pub priority: RelayPriority,
}

/// Confirms delivery of an ack-requesting message. Carries nothing but the original id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub id: MessageId,
}

impl AckMessage {
    pub const TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);

    pub fn new(id: MessageId) -> Self {
        Self { id }
    }

    pub fn metadata(&self) -> MessageMetadata {
        MessageMetadata {
            ttl: Self::TTL,
            priority: RelayPriority::Low,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeMessage {
    pub message_id: MessageId,
    pub trade_id: Uuid,
    pub protocol_version: u8,
    pub sender: NetworkId,
    pub receiver: NetworkId,
    pub payload: MuSigMessage,
}

impl TradeMessage {
    pub const TTL: Duration = Duration::from_secs(10 * 24 * 60 * 60);

    pub fn new(
        trade_id: Uuid,
        protocol_version: u8,
        sender: NetworkId,
        receiver: NetworkId,
        payload: MuSigMessage,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            trade_id,
            protocol_version,
            sender,
            receiver,
            payload,
        }
    }

    pub fn metadata(&self) -> MessageMetadata {
        MessageMetadata {
            ttl: Self::TTL,
            priority: RelayPriority::High,
        }
    }
}

impl AckRequestingMessage for TradeMessage {
    fn ack_request_id(&self) -> &str {
        &self.message_id
    }

    fn sender(&self) -> &NetworkId {
        &self.sender
    }

    fn receiver(&self) -> &NetworkId {
        &self.receiver
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Display, IntoStaticStr)]
pub enum PeerMessage {
    Ack(AckMessage),
    Trade(TradeMessage),
}

impl PeerMessage {
    pub fn metadata(&self) -> MessageMetadata {
        match self {
            PeerMessage::Ack(ack_message) => ack_message.metadata(),
            PeerMessage::Trade(trade_message) => trade_message.metadata(),
        }
    }

    pub fn as_ack_requesting(&self) -> Option<&dyn AckRequestingMessage> {
        match self {
            PeerMessage::Ack(_) => None,
            PeerMessage::Trade(trade_message) => Some(trade_message),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerEnvelope {
    pub sender: NetworkId,
    pub receiver: NetworkId,
    pub message: PeerMessage,
}
