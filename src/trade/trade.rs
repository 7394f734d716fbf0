use std::{path::Path, sync::Arc, time::Duration};

use strum_macros::{Display, IntoStaticStr};
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    context::TradeContext,
    data::TradeData,
    event::MuSigTradeEvent,
    model::MuSigTrade,
    protocol::{new_protocol_fsm, TradeFsm},
    signer::MuSigSigner,
    state::MuSigTradeState,
};
use crate::{
    common::{
        error::MusigError,
        types::MessageId,
        utils::now_millis,
    },
    comms::CommsAccess,
    config::ManagerConfig,
    delivery::MessageDeliveryStatus,
    fsm::{Event, HandleOutcome, State},
    peer_msg::TradeMessage,
};

#[derive(Debug)]
pub enum TradeNotif {
    StateChanged {
        trade_id: Uuid,
        from: MuSigTradeState,
        to: MuSigTradeState,
    },
}

/// Handle to a trade actor. A trade that reached a final state leaves the manager, but
/// its actor keeps answering queries until the last handle is dropped.
#[derive(Clone)]
pub struct TradeAccess {
    trade_id: Uuid,
    tx: mpsc::Sender<TradeRequest>,
}

impl TradeAccess {
    pub(super) fn new(trade_id: Uuid, tx: mpsc::Sender<TradeRequest>) -> Self {
        Self { trade_id, tx }
    }

    pub fn trade_id(&self) -> Uuid {
        self.trade_id
    }

    async fn raise(&self, event: MuSigTradeEvent) -> Result<MuSigTradeState, MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<MuSigTradeState, MusigError>>();
        let request = TradeRequest::Event { event, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn take_offer(&self) -> Result<MuSigTradeState, MusigError> {
        self.raise(MuSigTradeEvent::TakeOffer).await
    }

    pub async fn deposit_tx_broadcast(&self) -> Result<MuSigTradeState, MusigError> {
        self.raise(MuSigTradeEvent::DepositTxBroadcast).await
    }

    pub async fn deposit_tx_confirmed(&self) -> Result<MuSigTradeState, MusigError> {
        self.raise(MuSigTradeEvent::DepositTxConfirmed).await
    }

    pub async fn payment_initiated(&self) -> Result<MuSigTradeState, MusigError> {
        self.raise(MuSigTradeEvent::PaymentInitiated).await
    }

    pub async fn payment_receipt_confirmed(&self) -> Result<MuSigTradeState, MusigError> {
        self.raise(MuSigTradeEvent::PaymentReceiptConfirmed).await
    }

    pub async fn close_trade(&self) -> Result<MuSigTradeState, MusigError> {
        self.raise(MuSigTradeEvent::CloseTrade).await
    }

    pub async fn close_trade_timeout(&self) -> Result<MuSigTradeState, MusigError> {
        self.raise(MuSigTradeEvent::CloseTradeTimeout).await
    }

    pub async fn fail(&self, reason: impl Into<String>) -> Result<MuSigTradeState, MusigError> {
        self.raise(MuSigTradeEvent::Failure {
            reason: reason.into(),
        })
        .await
    }

    pub async fn query_trade(&self) -> Result<MuSigTrade, MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<MuSigTrade>();
        let request = TradeRequest::QueryTrade { rsp_tx };
        self.tx.send(request).await?;
        Ok(rsp_rx.await?)
    }

    pub async fn query_state(&self) -> Result<MuSigTradeState, MusigError> {
        Ok(self.query_trade().await?.state)
    }

    pub async fn subscribe_state(&self) -> Result<watch::Receiver<MuSigTradeState>, MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<watch::Receiver<MuSigTradeState>>();
        let request = TradeRequest::SubscribeState { rsp_tx };
        self.tx.send(request).await?;
        Ok(rsp_rx.await?)
    }

    /// Sends one of this trade's messages again, with its original message ID.
    pub async fn resend_message(
        &self,
        message_id: MessageId,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<MessageDeliveryStatus, MusigError>>();
        let request = TradeRequest::ResendMessage { message_id, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn register_notif_tx(
        &self,
        tx: mpsc::Sender<Result<TradeNotif, MusigError>>,
    ) -> Result<(), MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), MusigError>>();
        let request = TradeRequest::RegisterNotifTx { tx, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn unregister_notif_tx(&self) -> Result<(), MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), MusigError>>();
        let request = TradeRequest::UnregisterNotifTx { rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn shutdown(&self) -> Result<(), MusigError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), MusigError>>();
        let request = TradeRequest::Shutdown { rsp_tx };
        self.tx.send(request).await?; // Shutdown is allowed to fail if already shutdown
        rsp_rx.await?
    }
}

pub(crate) struct Trade {
    pub(crate) trade_id: Uuid,
    tx: mpsc::Sender<TradeRequest>,
    inbound_tx: mpsc::UnboundedSender<TradeMessage>,
    pub(crate) task_handle: JoinHandle<()>,
}

impl Trade {
    pub(crate) async fn new(
        comms_accessor: CommsAccess,
        signer: Arc<dyn MuSigSigner>,
        trade: MuSigTrade,
        trade_dir_path: impl AsRef<Path>,
        finished_tx: mpsc::UnboundedSender<Uuid>,
        config: &ManagerConfig,
    ) -> Result<Self, MusigError> {
        let trade_id = trade.trade_id;
        let fsm = new_protocol_fsm(trade.clone(), config.backlog_capacity)?;
        let data = TradeData::new(trade_dir_path, trade);
        Self::spawn(trade_id, comms_accessor, signer, fsm, data, finished_tx, config).await
    }

    /// Restores a trade from its data file. Archived trades stay on disk and are not
    /// brought back to life. A final trade that missed archiving gets archived now.
    pub(crate) async fn restore(
        comms_accessor: CommsAccess,
        signer: Arc<dyn MuSigSigner>,
        trade_data_path: impl AsRef<Path>,
        finished_tx: mpsc::UnboundedSender<Uuid>,
        config: &ManagerConfig,
    ) -> Result<Option<Self>, MusigError> {
        let (trade_id, data) = TradeData::restore(trade_data_path)?;
        if data.archived() {
            debug!("Trade w/ TradeUUID {} is archived, not restoring", trade_id);
            data.terminate();
            return Ok(None);
        }
        if data.trade().state.is_final() {
            info!("Trade w/ TradeUUID {} ended before archiving, archiving now", trade_id);
            data.archive();
            return Ok(None);
        }

        let mut fsm = match new_protocol_fsm(data.trade(), config.backlog_capacity) {
            Ok(fsm) => fsm,
            Err(error) => {
                data.terminate();
                return Err(error);
            }
        };
        fsm.restore_processed_events(data.processed_events());
        let trade =
            Self::spawn(trade_id, comms_accessor, signer, fsm, data, finished_tx, config).await?;
        Ok(Some(trade))
    }

    /// Registers with the router before the actor starts, so no peer message sent in
    /// reply to the trade can arrive ahead of the registration.
    async fn spawn(
        trade_id: Uuid,
        comms_accessor: CommsAccess,
        signer: Arc<dyn MuSigSigner>,
        fsm: TradeFsm,
        data: TradeData,
        finished_tx: mpsc::UnboundedSender<Uuid>,
        config: &ManagerConfig,
    ) -> Result<Self, MusigError> {
        let (tx, rx) = mpsc::channel::<TradeRequest>(config.request_channel_size);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TradeMessage>();

        if !fsm.state().is_final() {
            let registered = comms_accessor
                .register_trade_tx(trade_id, inbound_tx.clone())
                .await;
            if let Some(error) = registered.err() {
                error!(
                    "Failed to register Trade for Peer Messages destined for TradeUUID {}. Error: {}",
                    trade_id, error
                );
                data.terminate();
                return Err(error);
            }
        }

        let ctx = TradeContext::new(Arc::new(comms_accessor.clone()), signer);
        let actor = TradeActor {
            trade_id,
            rx,
            self_tx: tx.downgrade(),
            inbound_rx,
            comms_accessor,
            ctx,
            fsm,
            data: Some(data),
            finished_tx,
            close_trade_timeout: config.close_trade_timeout(),
            close_timer: None,
            notif_tx: None,
        };
        let task_handle = tokio::spawn(async move { actor.run().await });
        Ok(Self {
            trade_id,
            tx,
            inbound_tx,
            task_handle,
        })
    }

    pub(crate) fn new_accessor(&self) -> TradeAccess {
        TradeAccess::new(self.trade_id, self.tx.clone())
    }

    /// Hands a peer message straight to the trade, bypassing the router.
    pub(crate) fn deliver(&self, message: TradeMessage) -> Result<(), MusigError> {
        self.inbound_tx.send(message)?;
        Ok(())
    }
}

#[derive(Display, IntoStaticStr)]
pub(super) enum TradeRequest {
    Event {
        event: MuSigTradeEvent,
        rsp_tx: oneshot::Sender<Result<MuSigTradeState, MusigError>>,
    },
    QueryTrade {
        rsp_tx: oneshot::Sender<MuSigTrade>,
    },
    SubscribeState {
        rsp_tx: oneshot::Sender<watch::Receiver<MuSigTradeState>>,
    },
    ResendMessage {
        message_id: MessageId,
        rsp_tx: oneshot::Sender<Result<MessageDeliveryStatus, MusigError>>,
    },
    RegisterNotifTx {
        tx: mpsc::Sender<Result<TradeNotif, MusigError>>,
        rsp_tx: oneshot::Sender<Result<(), MusigError>>,
    },
    UnregisterNotifTx {
        rsp_tx: oneshot::Sender<Result<(), MusigError>>,
    },
    Shutdown {
        rsp_tx: oneshot::Sender<Result<(), MusigError>>,
    },
}

struct TradeActor {
    trade_id: Uuid,
    rx: mpsc::Receiver<TradeRequest>,
    self_tx: mpsc::WeakSender<TradeRequest>,
    inbound_rx: mpsc::UnboundedReceiver<TradeMessage>,
    comms_accessor: CommsAccess,
    ctx: TradeContext,
    fsm: TradeFsm,
    data: Option<TradeData>,
    finished_tx: mpsc::UnboundedSender<Uuid>,
    close_trade_timeout: Duration,
    close_timer: Option<JoinHandle<()>>,
    notif_tx: Option<mpsc::Sender<Result<TradeNotif, MusigError>>>,
}

impl TradeActor {
    fn trade_id(&self) -> Uuid {
        self.trade_id
    }

    async fn run(mut self) {
        let trade_id = self.trade_id();

        if self.fsm.state() == MuSigTradeState::CooperativeClosure {
            self.arm_close_timer();
        }

        loop {
            select! {
                Some(request) = self.rx.recv() => {
                    if self.handle_request(request).await {
                        break;
                    }
                },
                Some(message) = self.inbound_rx.recv() => {
                    self.handle_peer_message(message).await;
                },
                else => break,
            }
        }

        info!("Trade w/ TradeUUID {} terminating", trade_id);
        self.disarm_close_timer();
        if let Some(data) = self.data.take() {
            data.terminate();
        }
    }

    // Top-down Request Handling

    async fn handle_request(&mut self, request: TradeRequest) -> bool {
        let mut terminate = false;

        debug!(
            "Trade w/ TradeUUID {} handle_request() of type {}",
            self.trade_id(),
            request
        );

        match request {
            TradeRequest::Event { event, rsp_tx } => {
                let result = self.handle_local_event(event).await;
                let _ = rsp_tx.send(result);
            }
            TradeRequest::QueryTrade { rsp_tx } => {
                let _ = rsp_tx.send(self.fsm.model().clone());
            }
            TradeRequest::SubscribeState { rsp_tx } => {
                let _ = rsp_tx.send(self.fsm.subscribe());
            }
            TradeRequest::ResendMessage { message_id, rsp_tx } => {
                let result = self.resend_message(message_id).await;
                let _ = rsp_tx.send(result);
            }
            TradeRequest::RegisterNotifTx { tx, rsp_tx } => {
                self.register_notif_tx(tx, rsp_tx);
            }
            TradeRequest::UnregisterNotifTx { rsp_tx } => {
                self.unregister_notif_tx(rsp_tx);
            }
            TradeRequest::Shutdown { rsp_tx } => {
                self.shutdown(rsp_tx);
                terminate = true;
            }
        }
        terminate
    }

    async fn handle_local_event(
        &mut self,
        event: MuSigTradeEvent,
    ) -> Result<MuSigTradeState, MusigError> {
        let kind = event.kind();
        let state = self.fsm.state();
        match self.apply_event(event).await? {
            HandleOutcome::Ignored(reason) => Err(MusigError::Simple(format!(
                "Trade w/ TradeUUID {} cannot take event {:?} in state {} - {:?}",
                self.trade_id(),
                kind,
                state,
                reason
            ))),
            _ => Ok(self.fsm.state()),
        }
    }

    async fn resend_message(
        &mut self,
        message_id: MessageId,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        if !self.fsm.model().sent_message_ids.contains(&message_id) {
            return Err(MusigError::Simple(format!(
                "Trade w/ TradeUUID {} never sent message {}",
                self.trade_id(),
                message_id
            )));
        }
        self.comms_accessor.resend_message(message_id).await
    }

    fn register_notif_tx(
        &mut self,
        tx: mpsc::Sender<Result<TradeNotif, MusigError>>,
        rsp_tx: oneshot::Sender<Result<(), MusigError>>,
    ) {
        let mut result = Ok(());
        if self.notif_tx.is_some() {
            let error = MusigError::Simple(format!(
                "Trade w/ TradeUUID {} already have notif_tx registered",
                self.trade_id()
            ));
            result = Err(error);
        }
        self.notif_tx = Some(tx);
        let _ = rsp_tx.send(result);
    }

    fn unregister_notif_tx(&mut self, rsp_tx: oneshot::Sender<Result<(), MusigError>>) {
        let mut result = Ok(());
        if self.notif_tx.is_none() {
            let error = MusigError::Simple(format!(
                "Trade w/ TradeUUID {} expected to already have notif_tx registered",
                self.trade_id()
            ));
            result = Err(error);
        }
        self.notif_tx = None;
        let _ = rsp_tx.send(result);
    }

    fn shutdown(&mut self, rsp_tx: oneshot::Sender<Result<(), MusigError>>) {
        info!("Trade w/ TradeUUID {} shutting down", self.trade_id());
        let _ = rsp_tx.send(Ok(()));
    }

    // Bottom-up Peer Message Handling

    async fn handle_peer_message(&mut self, message: TradeMessage) {
        debug!(
            "Trade w/ TradeUUID {} received {} with message ID {}",
            self.trade_id(),
            message.payload.kind(),
            message.message_id
        );

        if let Some(error) = self.validate_envelope(&message).err() {
            warn!(
                "Trade w/ TradeUUID {} dropped message {} - {}",
                self.trade_id(),
                message.message_id,
                error
            );
            return;
        }

        match self.apply_event(MuSigTradeEvent::Message(message)).await {
            Ok(HandleOutcome::Ignored(reason)) => {
                debug!(
                    "Trade w/ TradeUUID {} ignored peer message - {:?}",
                    self.trade_id(),
                    reason
                );
            }
            Ok(_) => {}
            Err(error) => self.notify(Err(error)).await,
        }
    }

    /// Stray or forged messages must never be able to move the trade, so envelope
    /// mismatches are dropped rather than failing it.
    fn validate_envelope(&self, message: &TradeMessage) -> Result<(), MusigError> {
        let trade = self.fsm.model();
        if message.trade_id != trade.trade_id {
            return Err(MusigError::Validation(format!(
                "message is for TradeUUID {}",
                message.trade_id
            )));
        }
        if message.protocol_version != trade.protocol_version {
            return Err(MusigError::Validation(format!(
                "protocol version {} does not match {}",
                message.protocol_version, trade.protocol_version
            )));
        }
        if message.sender != trade.peer_party().network_id {
            return Err(MusigError::Validation(format!(
                "sender {} is not the trade peer",
                message.sender
            )));
        }
        if message.receiver != trade.my_party().network_id {
            return Err(MusigError::Validation(format!(
                "receiver {} is not us",
                message.receiver
            )));
        }
        Ok(())
    }

    // Event Processing

    async fn apply_event(
        &mut self,
        event: MuSigTradeEvent,
    ) -> Result<HandleOutcome<MuSigTradeState>, MusigError> {
        let mut outcome = match self.fsm.handle(&self.ctx, event).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if error.is_validation() {
                    self.fail_trade(error.to_string()).await;
                }
                return Err(error);
            }
        };

        if let HandleOutcome::Transitioned {
            from,
            to,
            replay_errors,
            ..
        } = &mut outcome
        {
            let (from, to) = (*from, *to);
            let replay_errors = std::mem::take(replay_errors);
            self.after_transition(from, to).await;
            self.escalate_replay_errors(replay_errors).await;
        }
        Ok(outcome)
    }

    async fn escalate_replay_errors(&mut self, replay_errors: Vec<MusigError>) {
        for error in replay_errors {
            if error.is_validation() && !self.fsm.state().is_final() {
                self.fail_trade(error.to_string()).await;
            }
            self.notify(Err(error)).await;
        }
    }

    async fn fail_trade(&mut self, reason: String) {
        let event = MuSigTradeEvent::Failure { reason };
        match self.fsm.handle(&self.ctx, event).await {
            Ok(HandleOutcome::Transitioned { from, to, .. }) => {
                self.after_transition(from, to).await;
            }
            Ok(outcome) => {
                debug!(
                    "Trade w/ TradeUUID {} failure not applied - {:?}",
                    self.trade_id(),
                    outcome
                );
            }
            Err(error) => {
                error!(
                    "Trade w/ TradeUUID {} could not be failed - {}",
                    self.trade_id(),
                    error
                );
            }
        }
    }

    async fn after_transition(&mut self, from: MuSigTradeState, to: MuSigTradeState) {
        let trade_id = self.trade_id();
        if let Some(data) = self.data.as_mut() {
            data.update(
                self.fsm.model().clone(),
                self.fsm.processed_events().clone(),
            );
        }

        if to == MuSigTradeState::CooperativeClosure {
            self.arm_close_timer();
        } else {
            self.disarm_close_timer();
        }

        self.notify(Ok(TradeNotif::StateChanged { trade_id, from, to }))
            .await;

        if to.is_final() {
            info!("Trade w/ TradeUUID {} ended in state {}", trade_id, to);
            if let Some(error) = self
                .comms_accessor
                .unregister_trade_tx(trade_id)
                .await
                .err()
            {
                warn!(
                    "Trade w/ TradeUUID {} failed to unregister from router - {}",
                    trade_id, error
                );
            }
            if let Some(data) = self.data.take() {
                data.archive();
            }
            if self.finished_tx.send(trade_id).is_err() {
                debug!(
                    "Trade w/ TradeUUID {} finished after its manager went away",
                    trade_id
                );
            }
        }
    }

    async fn notify(&self, notif: Result<TradeNotif, MusigError>) {
        match &self.notif_tx {
            Some(tx) => {
                if let Some(error) = tx.send(notif).await.err() {
                    error!(
                        "Trade w/ TradeUUID {} failed in notifying user with error {}",
                        self.trade_id(),
                        error
                    );
                }
            }
            None => {
                if let Err(error) = notif {
                    warn!(
                        "Trade w/ TradeUUID {} has no notif_tx registered, error dropped - {}",
                        self.trade_id(),
                        error
                    );
                }
            }
        }
    }

    // Close Trade Timer

    fn arm_close_timer(&mut self) {
        if self.close_timer.is_some() {
            return;
        }

        let elapsed = self
            .fsm
            .model()
            .close_requested_at
            .map(|requested_at| Duration::from_millis(now_millis().saturating_sub(requested_at)))
            .unwrap_or_default();
        let remaining = self.close_trade_timeout.saturating_sub(elapsed);
        let trade_id = self.trade_id();
        let self_tx = self.self_tx.clone();

        debug!(
            "Trade w/ TradeUUID {} close trade timeout in {:?}",
            trade_id, remaining
        );

        self.close_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let Some(tx) = self_tx.upgrade() else {
                return;
            };
            let (rsp_tx, rsp_rx) = oneshot::channel();
            let request = TradeRequest::Event {
                event: MuSigTradeEvent::CloseTradeTimeout,
                rsp_tx,
            };
            if tx.send(request).await.is_err() {
                return;
            }
            if let Ok(Err(error)) = rsp_rx.await {
                warn!(
                    "Trade w/ TradeUUID {} close trade timeout not applied - {}",
                    trade_id, error
                );
            }
        }));
    }

    fn disarm_close_timer(&mut self) {
        if let Some(close_timer) = self.close_timer.take() {
            close_timer.abort();
        }
    }
}
