use std::sync::Arc;

use async_trait::async_trait;
use strum_macros::{Display, IntoStaticStr};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::{router::Router, transport::Transport};
use crate::{
    common::{
        error::MusigError,
        types::{Identity, MessageId, NetworkId},
    },
    config::ResendConfig,
    delivery::{MessageDeliveryStatus, MessageDeliveryTracker, ResendQueue},
    peer_msg::{AckMessage, AckRequestingMessage, PeerEnvelope, PeerMessage, TradeMessage},
    trade::TradeMessageSender,
};

#[derive(Clone)]
pub struct CommsAccess {
    tx: mpsc::Sender<CommsRequest>,
    network_id: NetworkId,
    tracker: Arc<MessageDeliveryTracker>,
}

impl CommsAccess {
    pub(super) fn new(
        tx: mpsc::Sender<CommsRequest>,
        network_id: NetworkId,
        tracker: Arc<MessageDeliveryTracker>,
    ) -> Self {
        Self {
            tx,
            network_id,
            tracker,
        }
    }

    pub fn network_id(&self) -> &NetworkId {
        &self.network_id
    }

    pub fn delivery_tracker(&self) -> Arc<MessageDeliveryTracker> {
        self.tracker.clone()
    }

    pub(crate) async fn register_trade_tx(
        &self,
        trade_id: Uuid,
        tx: mpsc::UnboundedSender<TradeMessage>,
    ) -> Result<(), MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), MusigError>>();
        let request = CommsRequest::RegisterTradeTx {
            trade_id,
            tx,
            rsp_tx,
        };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub(crate) async fn unregister_trade_tx(&self, trade_id: Uuid) -> Result<(), MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), MusigError>>();
        let request = CommsRequest::UnregisterTradeTx { trade_id, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub(crate) async fn register_fallback_tx(
        &self,
        tx: mpsc::UnboundedSender<TradeMessage>,
    ) -> Result<(), MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), MusigError>>();
        let request = CommsRequest::RegisterFallbackTx { tx, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub(crate) async fn unregister_fallback_tx(&self) -> Result<(), MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), MusigError>>();
        let request = CommsRequest::UnregisterFallbackTx { rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    /// Starts taking envelopes off the network. Until then they queue up, so that
    /// everything restored gets to register with the router first.
    pub(crate) async fn open_inbound(&self) -> Result<(), MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<()>();
        let request = CommsRequest::OpenInbound { rsp_tx };
        self.tx.send(request).await?;
        Ok(rsp_rx.await?)
    }

    pub async fn send_trade_message(
        &self,
        message: TradeMessage,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<MessageDeliveryStatus, MusigError>>();
        let request = CommsRequest::SendTradeMessage { message, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn resend_message(
        &self,
        message_id: MessageId,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<MessageDeliveryStatus, MusigError>>();
        let request = CommsRequest::ResendMessage { message_id, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn shutdown(&self) -> Result<(), MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), MusigError>>();
        let request = CommsRequest::Shutdown { rsp_tx };
        self.tx.send(request).await?; // Shutdown is allowed to fail if already shutdown
        rsp_rx.await?
    }
}

#[async_trait]
impl TradeMessageSender for CommsAccess {
    async fn send_trade_message(
        &self,
        message: TradeMessage,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        CommsAccess::send_trade_message(self, message).await
    }
}

pub(crate) struct Comms {
    tx: mpsc::Sender<CommsRequest>,
    network_id: NetworkId,
    tracker: Arc<MessageDeliveryTracker>,
    pub(crate) task_handle: tokio::task::JoinHandle<()>,
}

impl Comms {
    pub(crate) fn new(
        identity: Identity,
        transport: Arc<dyn Transport>,
        inbound_rx: mpsc::UnboundedReceiver<PeerEnvelope>,
        tracker: Arc<MessageDeliveryTracker>,
        resend_config: ResendConfig,
        request_channel_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<CommsRequest>(request_channel_size);
        let network_id = identity.network_id().clone();
        let actor = CommsActor::new(
            rx,
            identity,
            transport,
            inbound_rx,
            tracker.clone(),
            resend_config,
        );
        let task_handle = tokio::spawn(async move { actor.run().await });
        Self {
            tx,
            network_id,
            tracker,
            task_handle,
        }
    }

    pub(crate) fn new_accessor(&self) -> CommsAccess {
        CommsAccess::new(self.tx.clone(), self.network_id.clone(), self.tracker.clone())
    }
}

#[derive(Display, IntoStaticStr)]
pub(super) enum CommsRequest {
    RegisterTradeTx {
        trade_id: Uuid,
        tx: mpsc::UnboundedSender<TradeMessage>,
        rsp_tx: oneshot::Sender<Result<(), MusigError>>,
    },
    UnregisterTradeTx {
        trade_id: Uuid,
        rsp_tx: oneshot::Sender<Result<(), MusigError>>,
    },
    RegisterFallbackTx {
        tx: mpsc::UnboundedSender<TradeMessage>,
        rsp_tx: oneshot::Sender<Result<(), MusigError>>,
    },
    UnregisterFallbackTx {
        rsp_tx: oneshot::Sender<Result<(), MusigError>>,
    },
    OpenInbound {
        rsp_tx: oneshot::Sender<()>,
    },
    SendTradeMessage {
        message: TradeMessage,
        rsp_tx: oneshot::Sender<Result<MessageDeliveryStatus, MusigError>>,
    },
    ResendMessage {
        message_id: MessageId,
        rsp_tx: oneshot::Sender<Result<MessageDeliveryStatus, MusigError>>,
    },
    Shutdown {
        rsp_tx: oneshot::Sender<Result<(), MusigError>>,
    },
}

pub(super) struct CommsActor {
    rx: mpsc::Receiver<CommsRequest>,
    identity: Identity,
    transport: Arc<dyn Transport>,
    inbound_rx: mpsc::UnboundedReceiver<PeerEnvelope>,
    inbound_open: bool,
    tracker: Arc<MessageDeliveryTracker>,
    resend_queue: ResendQueue,
    resend_tick: std::time::Duration,
    router: Router,
}

impl CommsActor {
    pub(super) fn new(
        rx: mpsc::Receiver<CommsRequest>,
        identity: Identity,
        transport: Arc<dyn Transport>,
        inbound_rx: mpsc::UnboundedReceiver<PeerEnvelope>,
        tracker: Arc<MessageDeliveryTracker>,
        resend_config: ResendConfig,
    ) -> Self {
        CommsActor {
            rx,
            identity,
            transport,
            inbound_rx,
            inbound_open: false,
            tracker,
            resend_tick: resend_config.tick(),
            resend_queue: ResendQueue::new(resend_config),
            router: Router::new(),
        }
    }

    async fn run(mut self) {
        let mut resend_interval = time::interval(self.resend_tick);
        resend_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Request handling main event loop
        // !!! This function will end if no Sender remains for the Receiver
        loop {
            select! {
                request = self.rx.recv() => {
                    match request {
                        Some(request) => {
                            if self.handle_request(request).await {
                                break;
                            }
                        }
                        None => break,
                    }
                },
                Some(envelope) = self.inbound_rx.recv(), if self.inbound_open => {
                    self.handle_envelope(envelope).await;
                },
                _ = resend_interval.tick() => {
                    self.resend_due_messages().await;
                },
            }
        }
        info!(
            "Comms for {} terminating",
            self.identity.network_id()
        );
    }

    // Top-down Request Handling

    async fn handle_request(&mut self, request: CommsRequest) -> bool {
        let mut terminate = false;

        trace!("Comms handle_request() of type {}", request);

        match request {
            CommsRequest::RegisterTradeTx {
                trade_id,
                tx,
                rsp_tx,
            } => {
                let _ = rsp_tx.send(self.router.register_trade_tx(trade_id, tx));
            }
            CommsRequest::UnregisterTradeTx { trade_id, rsp_tx } => {
                self.router.unregister_trade_tx(trade_id);
                self.resend_queue.release_trade(trade_id, Instant::now());
                let _ = rsp_tx.send(Ok(()));
            }
            CommsRequest::RegisterFallbackTx { tx, rsp_tx } => {
                let _ = rsp_tx.send(self.router.set_fallback_tx(Some(tx)));
            }
            CommsRequest::UnregisterFallbackTx { rsp_tx } => {
                let _ = rsp_tx.send(self.router.set_fallback_tx(None));
            }
            CommsRequest::OpenInbound { rsp_tx } => {
                debug!("Comms for {} accepting inbound messages", self.identity.network_id());
                self.inbound_open = true;
                let _ = rsp_tx.send(());
            }
            CommsRequest::SendTradeMessage { message, rsp_tx } => {
                let result = self.send_trade_message(message).await;
                let _ = rsp_tx.send(result);
            }
            CommsRequest::ResendMessage { message_id, rsp_tx } => {
                let result = self.resend_message(message_id).await;
                let _ = rsp_tx.send(result);
            }
            CommsRequest::Shutdown { rsp_tx } => {
                info!("Comms for {} shutting down", self.identity.network_id());
                let _ = rsp_tx.send(Ok(()));
                terminate = true;
            }
        }
        terminate
    }

    async fn send_trade_message(
        &mut self,
        message: TradeMessage,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        self.tracker
            .on_message_sent_status(&message.message_id, MessageDeliveryStatus::Connecting)?;
        let status = self.transmit(&message).await?;
        self.resend_queue.track(message, status, Instant::now());
        Ok(status)
    }

    /// One delivery attempt. The returned status is the merged one, so an ack that
    /// raced ahead of the transport result is never overwritten.
    async fn transmit(&self, message: &TradeMessage) -> Result<MessageDeliveryStatus, MusigError> {
        let envelope = PeerEnvelope {
            sender: message.sender.clone(),
            receiver: message.receiver.clone(),
            message: PeerMessage::Trade(message.clone()),
        };

        let status = match self.transport.send(envelope, &self.identity).await {
            Ok(status) => status,
            Err(error) => {
                warn!(
                    "Comms failed sending message {} to {} - {}",
                    message.message_id, message.receiver, error
                );
                MessageDeliveryStatus::Failed
            }
        };
        debug!(
            "Comms sent {} with message ID {} for TradeUUID {} - {}",
            message.payload.kind(),
            message.message_id,
            message.trade_id,
            status
        );
        self.tracker
            .on_message_sent_status(&message.message_id, status)
    }

    async fn resend_message(
        &mut self,
        message_id: MessageId,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        let message = self.resend_queue.manual(&message_id)?;
        let status = self.transmit(&message).await?;
        self.resend_queue.track(message, status, Instant::now());
        Ok(status)
    }

    async fn resend_due_messages(&mut self) {
        let due = self.resend_queue.due(Instant::now(), &self.tracker);
        if !due.is_empty() {
            debug!(
                "Comms resending {} of {} pending messages",
                due.len(),
                self.resend_queue.len()
            );
        }
        for message in due {
            match self.transmit(&message).await {
                Ok(status) => self.resend_queue.track(message, status, Instant::now()),
                Err(error) => error!(
                    "Comms failed resending message {} - {}",
                    message.message_id, error
                ),
            }
        }
    }

    // Bottom-up Inbound Handling

    async fn handle_envelope(&mut self, envelope: PeerEnvelope) {
        let my_network_id = self.identity.network_id().clone();
        if envelope.receiver != my_network_id {
            warn!(
                "Comms for {} dropped envelope addressed to {}",
                my_network_id, envelope.receiver
            );
            return;
        }

        if let PeerMessage::Trade(trade_message) = &envelope.message {
            if trade_message.sender != envelope.sender {
                warn!(
                    "Comms dropped message {} from {} claiming to be sent by {}",
                    trade_message.message_id, envelope.sender, trade_message.sender
                );
                return;
            }
        }

        if let Some(ack_requesting) = envelope.message.as_ack_requesting() {
            let ack_request_id = ack_requesting.ack_request_id().to_string();
            let ack_receiver = ack_requesting.sender().clone();
            self.send_ack(ack_request_id, ack_receiver).await;
        }

        match envelope.message {
            PeerMessage::Ack(ack_message) => {
                match self.tracker.on_ack_message_received(&ack_message) {
                    Ok(status) => debug!(
                        "Comms received ack for message {} - {}",
                        ack_message.id, status
                    ),
                    Err(error) => error!(
                        "Comms failed recording ack for message {} - {}",
                        ack_message.id, error
                    ),
                }
            }
            PeerMessage::Trade(trade_message) => {
                let message_id = trade_message.message_id.clone();
                if let Some(error) = self.router.handle_trade_message(trade_message).err() {
                    warn!("Comms dropped message {} - {}", message_id, error);
                }
            }
        }
    }

    /// Acks go out before routing, whether or not the message can be routed.
    async fn send_ack(&self, ack_request_id: MessageId, receiver: NetworkId) {
        let ack_message = AckMessage::new(ack_request_id.clone());
        let envelope = PeerEnvelope {
            sender: self.identity.network_id().clone(),
            receiver,
            message: PeerMessage::Ack(ack_message),
        };

        match self.transport.send(envelope, &self.identity).await {
            Ok(status) => trace!("Comms sent ack for message {} - {}", ack_request_id, status),
            Err(error) => warn!(
                "Comms failed sending ack for message {} - {}",
                ack_request_id, error
            ),
        }
    }
}
