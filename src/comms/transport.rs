use async_trait::async_trait;

use crate::{
    common::{error::MusigError, types::Identity},
    delivery::MessageDeliveryStatus,
    peer_msg::PeerEnvelope,
};

/// The P2P network underneath. Implementations sign or encrypt the envelope with the
/// given identity as they see fit.
///
/// `send` reports `Sent` for a direct delivery, `AddedToMailbox` when the receiver is
/// offline and the network stored the message for it, or `Failed`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        envelope: PeerEnvelope,
        identity: &Identity,
    ) -> Result<MessageDeliveryStatus, MusigError>;
}
