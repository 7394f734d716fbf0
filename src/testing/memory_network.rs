use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    common::{
        error::MusigError,
        types::{Identity, NetworkId},
    },
    comms::Transport,
    delivery::MessageDeliveryStatus,
    peer_msg::PeerEnvelope,
};

struct PeerSlot {
    inbound_tx: mpsc::UnboundedSender<PeerEnvelope>,
    online: bool,
    mailbox: Vec<PeerEnvelope>,
}

#[derive(Default)]
struct NetworkState {
    peers: HashMap<NetworkId, PeerSlot>,
    sent: Vec<PeerEnvelope>,
}

/// In-process stand-in for the P2P network. Envelopes for a peer that is offline go
/// into its mailbox and are handed over once it comes back online.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attaches a peer, or re-attaches it after a restart. It comes online right away
    /// and receives whatever its mailbox holds.
    pub fn join(
        &self,
        network_id: NetworkId,
    ) -> (Arc<MemoryTransport>, mpsc::UnboundedReceiver<PeerEnvelope>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<PeerEnvelope>();
        {
            let mut state = self.lock();
            let slot = state.peers.entry(network_id.clone()).or_insert(PeerSlot {
                inbound_tx: inbound_tx.clone(),
                online: true,
                mailbox: Vec::new(),
            });
            slot.inbound_tx = inbound_tx;
        }
        self.set_online(&network_id, true);

        let transport = Arc::new(MemoryTransport {
            network: self.clone(),
        });
        (transport, inbound_rx)
    }

    pub fn set_online(&self, network_id: &NetworkId, online: bool) {
        let mut state = self.lock();
        let Some(slot) = state.peers.get_mut(network_id) else {
            return;
        };
        slot.online = online;
        if online {
            let mailbox = std::mem::take(&mut slot.mailbox);
            debug!(
                "Peer {} online, delivering {} mailbox messages",
                network_id,
                mailbox.len()
            );
            for envelope in mailbox {
                if let Some(error) = slot.inbound_tx.send(envelope).err() {
                    slot.mailbox.push(error.0);
                }
            }
        }
    }

    /// Puts an envelope on the wire as is, as a misbehaving peer could.
    pub fn inject(&self, envelope: PeerEnvelope) -> MessageDeliveryStatus {
        self.deliver(envelope)
    }

    pub fn sent_envelopes(&self) -> Vec<PeerEnvelope> {
        self.lock().sent.clone()
    }

    fn deliver(&self, envelope: PeerEnvelope) -> MessageDeliveryStatus {
        let mut state = self.lock();
        state.sent.push(envelope.clone());

        let Some(slot) = state.peers.get_mut(&envelope.receiver) else {
            return MessageDeliveryStatus::Failed;
        };

        if !slot.online {
            trace!("Peer {} offline, envelope to mailbox", envelope.receiver);
            slot.mailbox.push(envelope);
            return MessageDeliveryStatus::AddedToMailbox;
        }

        match slot.inbound_tx.send(envelope) {
            Ok(()) => MessageDeliveryStatus::Sent,
            Err(error) => {
                // Receiver gone without going offline first, keep it for its return
                slot.mailbox.push(error.0);
                MessageDeliveryStatus::AddedToMailbox
            }
        }
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(
        &self,
        envelope: PeerEnvelope,
        _identity: &Identity,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        Ok(self.network.deliver(envelope))
    }
}
