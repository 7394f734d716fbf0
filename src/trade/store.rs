use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::trade::{Trade, TradeAccess};
use crate::{common::error::MusigError, peer_msg::TradeMessage};

/// Owner of every live trade actor, keyed by trade ID.
#[derive(Default)]
pub(crate) struct TradeStore {
    trades: RwLock<HashMap<Uuid, Trade>>,
}

impl TradeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn insert(&self, trade: Trade) -> Result<TradeAccess, MusigError> {
        let mut trades = self.trades.write().await;
        if trades.contains_key(&trade.trade_id) {
            return Err(MusigError::Simple(format!(
                "Trade w/ TradeUUID {} already exists",
                trade.trade_id
            )));
        }
        let accessor = trade.new_accessor();
        trades.insert(trade.trade_id, trade);
        Ok(accessor)
    }

    /// Takes a finished trade out. Its actor lives on while handles to it remain.
    pub(crate) async fn remove(&self, trade_id: &Uuid) -> Option<Trade> {
        self.trades.write().await.remove(trade_id)
    }

    pub(crate) async fn accessor(&self, trade_id: &Uuid) -> Option<TradeAccess> {
        self.trades
            .read()
            .await
            .get(trade_id)
            .map(|trade| trade.new_accessor())
    }

    pub(crate) async fn accessors(&self) -> HashMap<Uuid, TradeAccess> {
        self.trades
            .read()
            .await
            .iter()
            .map(|(trade_id, trade)| (*trade_id, trade.new_accessor()))
            .collect()
    }

    /// Hands a message to a known trade. Returns false if the trade is unknown.
    pub(crate) async fn deliver(
        &self,
        trade_id: &Uuid,
        message: TradeMessage,
    ) -> Result<bool, MusigError> {
        match self.trades.read().await.get(trade_id) {
            Some(trade) => {
                trade.deliver(message)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) async fn drain(&self) -> Vec<Trade> {
        self.trades
            .write()
            .await
            .drain()
            .map(|(_, trade)| trade)
            .collect()
    }
}
