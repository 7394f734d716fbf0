mod peer_messaging;

pub use peer_messaging::{
    AckMessage, AckRequestingMessage, MessageMetadata, PeerEnvelope, PeerMessage, RelayPriority,
    TradeMessage,
};
