use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use iso_currency::Currency;
use tokio::{
    select,
    sync::{mpsc, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    common::{
        error::MusigError,
        types::{Identity, MessageId, NetworkId},
        utils::now_millis,
    },
    comms::{Comms, CommsAccess, Transport},
    config::ManagerConfig,
    delivery::{FileDeliveryStatusStore, MessageDeliveryStatus, MessageDeliveryTracker},
    pairing::{PairingCode, Permission},
    peer_msg::{PeerEnvelope, TradeMessage},
    trade::{
        MuSigMessage, MuSigOffer, MuSigSigner, MuSigTrade, Trade, TradeAccess, TradeData,
        TradeRole, TradeStore, TradeTerms,
    },
};

const DELIVERY_STATUS_FILE: &str = "delivery_status.jsonl";
const TRADES_DIR: &str = "trades";

/// Entry point of the library. Owns the comms actor, every live trade and the offers we
/// made that are still open for taking.
pub struct Manager {
    shared: Arc<ManagerShared>,
    comms: Comms,
    listener_task_handle: JoinHandle<()>,
}

struct ManagerShared {
    network_id: NetworkId,
    config: ManagerConfig,
    trade_dir_path: PathBuf,
    comms_accessor: CommsAccess,
    tracker: Arc<MessageDeliveryTracker>,
    signer: Arc<dyn MuSigSigner>,
    trade_store: TradeStore,
    finished_tx: mpsc::UnboundedSender<Uuid>,
    offers: RwLock<HashMap<String, MuSigOffer>>,
    new_trade_notif_tx: RwLock<Option<mpsc::Sender<Result<TradeAccess, MusigError>>>>,
}

impl Manager {
    // Constructors

    /// Starts comms over `transport`, restores every live trade found under the data
    /// directory of `identity`, then starts accepting trades for our offers.
    pub async fn new(
        identity: Identity,
        transport: Arc<dyn Transport>,
        inbound_rx: mpsc::UnboundedReceiver<PeerEnvelope>,
        signer: Arc<dyn MuSigSigner>,
        config: ManagerConfig,
    ) -> Result<Self, MusigError> {
        config.validate()?;

        let network_id = identity.network_id().clone();
        let identity_dir_path = config.data_dir.join(network_id.pubkey.to_string());
        let trade_dir_path = identity_dir_path.join(TRADES_DIR);
        std::fs::create_dir_all(&trade_dir_path)?;

        let status_store = FileDeliveryStatusStore::new(identity_dir_path.join(DELIVERY_STATUS_FILE));
        let tracker = Arc::new(MessageDeliveryTracker::new(Arc::new(status_store))?);

        let comms = Comms::new(
            identity,
            transport,
            inbound_rx,
            tracker.clone(),
            config.resend.clone(),
            config.request_channel_size,
        );
        let comms_accessor = comms.new_accessor();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel::<Uuid>();

        let shared = Arc::new(ManagerShared {
            network_id,
            config,
            trade_dir_path,
            comms_accessor,
            tracker,
            signer,
            trade_store: TradeStore::new(),
            finished_tx,
            offers: RwLock::new(HashMap::new()),
            new_trade_notif_tx: RwLock::new(None),
        });

        shared.restore_trades().await?;

        let (fallback_tx, fallback_rx) = mpsc::unbounded_channel::<TradeMessage>();
        shared.comms_accessor.register_fallback_tx(fallback_tx).await?;
        let listener_shared = shared.clone();
        let listener_task_handle = tokio::spawn(async move {
            listener_shared.run_listener(fallback_rx, finished_rx).await
        });
        shared.comms_accessor.open_inbound().await?;

        info!("Manager for {} started", shared.network_id);
        Ok(Self {
            shared,
            comms,
            listener_task_handle,
        })
    }

    // Identity

    pub fn network_id(&self) -> &NetworkId {
        &self.shared.network_id
    }

    // Offer Management

    pub async fn make_offer(
        &self,
        maker_is_buyer: bool,
        base_amount_sats: u64,
        quote_amount: u64,
        quote_currency: Currency,
        payment_method: impl Into<String>,
    ) -> Result<MuSigOffer, MusigError> {
        let offer = MuSigOffer {
            offer_id: Uuid::new_v4().to_string(),
            maker_network_id: self.shared.network_id.clone(),
            maker_is_buyer,
            base_amount_sats,
            quote_amount,
            quote_currency,
            payment_method: payment_method.into(),
        };
        TradeTerms::from_offer(&offer, now_millis()).validate()?;

        let mut offers = self.shared.offers.write().await;
        offers.insert(offer.offer_id.clone(), offer.clone());
        debug!("Offer {} registered", offer.offer_id);
        Ok(offer)
    }

    pub async fn withdraw_offer(&self, offer_id: &str) -> Result<MuSigOffer, MusigError> {
        let mut offers = self.shared.offers.write().await;
        offers
            .remove(offer_id)
            .ok_or_else(|| MusigError::Simple(format!("Offer {} not found", offer_id)))
    }

    pub async fn offers(&self) -> Vec<MuSigOffer> {
        self.shared.offers.read().await.values().cloned().collect()
    }

    // Trade Management

    /// Takes a counterparty's offer. The returned trade has already sent the opening
    /// setup message.
    pub async fn take_offer(&self, offer: MuSigOffer) -> Result<TradeAccess, MusigError> {
        if offer.maker_network_id == self.shared.network_id {
            return Err(MusigError::Validation(format!(
                "Offer {} is our own",
                offer.offer_id
            )));
        }
        let terms = TradeTerms::from_offer(&offer, now_millis());
        terms.validate()?;

        let role = TradeRole::new(false, !offer.maker_is_buyer);
        let trade = MuSigTrade::new(
            Uuid::new_v4(),
            self.shared.config.protocol_version,
            role,
            terms,
            offer.maker_network_id.clone(),
            self.shared.network_id.clone(),
        );
        let trade_id = trade.trade_id;

        let trade = Trade::new(
            self.shared.comms_accessor.clone(),
            self.shared.signer.clone(),
            trade,
            &self.shared.trade_dir_path,
            self.shared.finished_tx.clone(),
            &self.shared.config,
        )
        .await?;
        let accessor = self.shared.trade_store.insert(trade).await?;
        info!(
            "Trade w/ TradeUUID {} created taking offer {}",
            trade_id, offer.offer_id
        );

        accessor.take_offer().await?;
        Ok(accessor)
    }

    pub async fn trade(&self, trade_id: &Uuid) -> Option<TradeAccess> {
        self.shared.trade_store.accessor(trade_id).await
    }

    pub async fn trade_ids(&self) -> Vec<Uuid> {
        self.shared.trade_store.accessors().await.into_keys().collect()
    }

    pub async fn register_new_trade_notif_tx(
        &self,
        tx: mpsc::Sender<Result<TradeAccess, MusigError>>,
    ) -> Result<(), MusigError> {
        let mut new_trade_notif_tx = self.shared.new_trade_notif_tx.write().await;
        if new_trade_notif_tx.is_some() {
            let error = MusigError::Simple("New trade notif tx already registered".to_string());
            return Err(error);
        }
        *new_trade_notif_tx = Some(tx);
        Ok(())
    }

    pub async fn unregister_new_trade_notif_tx(&self) -> Result<(), MusigError> {
        let mut new_trade_notif_tx = self.shared.new_trade_notif_tx.write().await;
        if new_trade_notif_tx.take().is_none() {
            let error = MusigError::Simple("New trade notif tx not registered".to_string());
            return Err(error);
        }
        Ok(())
    }

    // Delivery

    pub fn delivery_status(&self, message_id: &str) -> Option<MessageDeliveryStatus> {
        self.shared.tracker.status(message_id)
    }

    pub async fn await_delivery(
        &self,
        message_id: &MessageId,
        timeout: Duration,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        self.shared.tracker.await_delivery(message_id, timeout).await
    }

    // Pairing

    pub fn create_pairing_code(
        &self,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> PairingCode {
        PairingCode::generate(self.shared.config.pairing_code_validity(), permissions)
    }

    pub async fn shutdown(self) -> Result<(), MusigError> {
        info!("Manager for {} shutting down", self.shared.network_id);

        if let Some(error) = self.shared.comms_accessor.unregister_fallback_tx().await.err() {
            warn!("Failed to unregister fallback tx - {}", error);
        }
        // Router dropped the fallback sender, the listener ends on its own
        if let Some(error) = self.listener_task_handle.await.err() {
            error!("Manager listener task failed - {}", error);
        }

        for trade in self.shared.trade_store.drain().await {
            let trade_id = trade.trade_id;
            if let Some(error) = trade.new_accessor().shutdown().await.err() {
                warn!("Trade w/ TradeUUID {} shutdown failed - {}", trade_id, error);
            }
            if let Some(error) = trade.task_handle.await.err() {
                error!("Trade w/ TradeUUID {} task failed - {}", trade_id, error);
            }
        }

        self.shared.comms_accessor.shutdown().await?;
        if let Some(error) = self.comms.task_handle.await.err() {
            error!("Comms task failed - {}", error);
        }
        Ok(())
    }
}

impl ManagerShared {
    async fn restore_trades(&self) -> Result<(), MusigError> {
        let data_paths = Self::trade_data_paths(&self.trade_dir_path)?;
        for data_path in data_paths {
            let restored = Trade::restore(
                self.comms_accessor.clone(),
                self.signer.clone(),
                &data_path,
                self.finished_tx.clone(),
                &self.config,
            )
            .await;
            match restored {
                Ok(Some(trade)) => {
                    let trade_id = trade.trade_id;
                    self.trade_store.insert(trade).await?;
                    info!("Trade w/ TradeUUID {} restored", trade_id);
                }
                Ok(None) => {}
                Err(error) => {
                    error!(
                        "Failed to restore trade from {} - {}",
                        data_path.display(),
                        error
                    );
                }
            }
        }
        Ok(())
    }

    fn trade_data_paths(dir_path: &Path) -> Result<Vec<PathBuf>, MusigError> {
        let mut data_paths = Vec::new();
        for entry in std::fs::read_dir(dir_path)? {
            let path = entry?.path();
            if TradeData::is_data_path(&path) {
                data_paths.push(path);
            }
        }
        Ok(data_paths)
    }

    /// Takes trade-opening messages off the fallback channel and lets go of trades
    /// that finished. Ends once the fallback channel is unregistered.
    async fn run_listener(
        &self,
        mut fallback_rx: mpsc::UnboundedReceiver<TradeMessage>,
        mut finished_rx: mpsc::UnboundedReceiver<Uuid>,
    ) {
        loop {
            select! {
                message = fallback_rx.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    let trade_id = message.trade_id;
                    if let Some(error) = self.handle_opening_message(message).await.err() {
                        warn!(
                            "Trade w/ TradeUUID {} opening message dropped - {}",
                            trade_id, error
                        );
                    }
                },
                Some(trade_id) = finished_rx.recv() => {
                    self.release_trade(trade_id).await;
                },
            }
        }
        debug!("Manager listener for {} terminating", self.network_id);
    }

    async fn release_trade(&self, trade_id: Uuid) {
        match self.trade_store.remove(&trade_id).await {
            Some(_) => info!("Trade w/ TradeUUID {} finished, released", trade_id),
            None => debug!("Trade w/ TradeUUID {} already released", trade_id),
        }
    }

    /// Creates the maker side of a trade for a `SetupTradeA` naming one of our offers.
    async fn handle_opening_message(&self, message: TradeMessage) -> Result<(), MusigError> {
        let trade_id = message.trade_id;

        // A copy queued behind the message that created the trade
        if self.trade_store.deliver(&trade_id, message.clone()).await? {
            return Ok(());
        }

        if message.protocol_version != self.config.protocol_version {
            return Err(MusigError::Validation(format!(
                "Protocol version {} not supported",
                message.protocol_version
            )));
        }
        if message.receiver != self.network_id {
            return Err(MusigError::Validation(format!(
                "Addressed to {}",
                message.receiver
            )));
        }
        let MuSigMessage::SetupTradeA { terms, .. } = &message.payload else {
            return Err(MusigError::Validation(format!(
                "{} does not open a trade",
                message.payload.kind()
            )));
        };

        let offer = {
            let offers = self.offers.read().await;
            let offer = offers.get(&terms.offer_id).ok_or_else(|| {
                MusigError::Validation(format!("Offer {} not found", terms.offer_id))
            })?;
            if !terms.matches_offer(offer) {
                return Err(MusigError::Validation(format!(
                    "Terms do not match offer {}",
                    terms.offer_id
                )));
            }
            offer.clone()
        };

        let role = TradeRole::new(true, offer.maker_is_buyer);
        let trade = MuSigTrade::new(
            trade_id,
            self.config.protocol_version,
            role,
            terms.clone(),
            self.network_id.clone(),
            message.sender.clone(),
        );
        let trade = Trade::new(
            self.comms_accessor.clone(),
            self.signer.clone(),
            trade,
            &self.trade_dir_path,
            self.finished_tx.clone(),
            &self.config,
        )
        .await?;
        trade.deliver(message)?;
        let accessor = self.trade_store.insert(trade).await?;
        self.offers.write().await.remove(&offer.offer_id);
        info!(
            "Trade w/ TradeUUID {} created for offer {}",
            trade_id, offer.offer_id
        );

        if let Some(tx) = self.new_trade_notif_tx.read().await.as_ref() {
            if let Some(error) = tx.send(Ok(accessor)).await.err() {
                warn!(
                    "Trade w/ TradeUUID {} new trade notification failed - {}",
                    trade_id, error
                );
            }
        }
        Ok(())
    }
}
