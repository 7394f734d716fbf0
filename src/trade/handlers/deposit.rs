use async_trait::async_trait;

use crate::{
    common::{error::MusigError, utils::now_millis},
    fsm::EventHandler,
    trade::{context::TradeContext, event::MuSigTradeEvent, model::MuSigTrade},
};

/// Maker learned the deposit tx was broadcast. Only accepted once the signer sees it
/// in the mempool.
#[derive(Default)]
pub(crate) struct DepositTxBroadcastHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for DepositTxBroadcastHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        _event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        if !ctx.signer.is_deposit_tx_in_mempool(trade.trade_id).await? {
            return Err(MusigError::Handler(format!(
                "Trade w/ TradeUUID {} deposit tx not found in mempool",
                trade.trade_id
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct DepositTxConfirmedHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for DepositTxConfirmedHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        _ctx: &TradeContext,
        _event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        trade.deposit_confirmed_at = Some(now_millis());
        Ok(())
    }
}
