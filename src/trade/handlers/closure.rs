use async_trait::async_trait;
use tracing::warn;

use super::{emit, require_non_empty, unexpected_event};
use crate::{
    common::{error::MusigError, utils::now_millis},
    fsm::EventHandler,
    trade::{
        context::TradeContext, event::MuSigTradeEvent, messages::MuSigMessage, model::MuSigTrade,
    },
};

/// Buyer asks the seller to close cooperatively, handing over its output key share.
#[derive(Default)]
pub(crate) struct CloseTradeHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for CloseTradeHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        _event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let close_data = ctx.signer.close_trade(trade.trade_id, None).await?;
        trade.my_party_mut().output_prv_key_share = Some(close_data.output_prv_key_share.clone());
        trade.close_requested_at = Some(now_millis());
        emit(trade, ctx, MuSigMessage::CloseTradeRequest { close_data }).await
    }
}

#[derive(Default)]
pub(crate) struct CloseTradeRequestHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for CloseTradeRequestHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let MuSigTradeEvent::Message(message) = event else {
            return Err(unexpected_event(trade, event));
        };
        let MuSigMessage::CloseTradeRequest {
            close_data: peer_close_data,
        } = &message.payload
        else {
            return Err(unexpected_event(trade, event));
        };

        let peer_share = &peer_close_data.output_prv_key_share;
        require_non_empty(trade, "output private key share", peer_share)?;
        let close_data = ctx
            .signer
            .close_trade(trade.trade_id, Some(peer_share.clone()))
            .await?;

        trade.peer_party_mut().output_prv_key_share = Some(peer_share.clone());
        trade.my_party_mut().output_prv_key_share = Some(close_data.output_prv_key_share.clone());
        trade.completed_at = Some(now_millis());
        emit(trade, ctx, MuSigMessage::CloseTradeResponse { close_data }).await
    }
}

#[derive(Default)]
pub(crate) struct CloseTradeResponseHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for CloseTradeResponseHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let MuSigTradeEvent::Message(message) = event else {
            return Err(unexpected_event(trade, event));
        };
        let MuSigMessage::CloseTradeResponse {
            close_data: peer_close_data,
        } = &message.payload
        else {
            return Err(unexpected_event(trade, event));
        };

        let peer_share = &peer_close_data.output_prv_key_share;
        require_non_empty(trade, "output private key share", peer_share)?;
        ctx.signer
            .close_trade(trade.trade_id, Some(peer_share.clone()))
            .await?;

        trade.peer_party_mut().output_prv_key_share = Some(peer_share.clone());
        trade.completed_at = Some(now_millis());
        Ok(())
    }
}

/// The seller never answered the close request. The buyer spends the escrow through
/// the swap tx, using the signature the seller released on payment receipt.
#[derive(Default)]
pub(crate) struct CloseTradeTimeoutHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for CloseTradeTimeoutHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        _event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let Some(swap_tx_signature) = trade.peer_party().swap_tx_signature.clone() else {
            return Err(MusigError::Handler(format!(
                "Trade w/ TradeUUID {} has no peer swap tx signature to force close with",
                trade.trade_id
            )));
        };

        warn!(
            "Trade w/ TradeUUID {} close request unanswered, broadcasting swap tx",
            trade.trade_id
        );
        ctx.signer
            .broadcast_swap_tx(trade.trade_id, &swap_tx_signature)
            .await?;
        trade.completed_at = Some(now_millis());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FailureHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for FailureHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        _ctx: &TradeContext,
        event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let MuSigTradeEvent::Failure { reason } = event else {
            return Err(unexpected_event(trade, event));
        };
        warn!(
            "Trade w/ TradeUUID {} failing in state {} - {}",
            trade.trade_id, trade.state, reason
        );
        trade.failure_reason = Some(reason.clone());
        Ok(())
    }
}
