use std::sync::Arc;

use async_trait::async_trait;

use super::signer::MuSigSigner;
use crate::{
    common::error::MusigError, delivery::MessageDeliveryStatus, peer_msg::TradeMessage,
};

/// Hands outgoing trade messages to the network and starts tracking their delivery.
#[async_trait]
pub trait TradeMessageSender: Send + Sync {
    async fn send_trade_message(
        &self,
        message: TradeMessage,
    ) -> Result<MessageDeliveryStatus, MusigError>;
}

/// Collaborators available to trade event handlers.
#[derive(Clone)]
pub struct TradeContext {
    pub sender: Arc<dyn TradeMessageSender>,
    pub signer: Arc<dyn MuSigSigner>,
}

impl TradeContext {
    pub fn new(sender: Arc<dyn TradeMessageSender>, signer: Arc<dyn MuSigSigner>) -> Self {
        Self { sender, signer }
    }
}
