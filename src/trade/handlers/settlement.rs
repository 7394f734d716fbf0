use async_trait::async_trait;

use super::{emit, require_non_empty, unexpected_event};
use crate::{
    common::{error::MusigError, utils::now_millis},
    fsm::EventHandler,
    trade::{
        context::TradeContext, event::MuSigTradeEvent, messages::MuSigMessage, model::MuSigTrade,
    },
};

/// Buyer reports the fiat payment as sent.
#[derive(Default)]
pub(crate) struct PaymentInitiatedHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for PaymentInitiatedHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        _event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        trade.payment_initiated_at = Some(now_millis());
        emit(trade, ctx, MuSigMessage::PaymentInitiated).await
    }
}

#[derive(Default)]
pub(crate) struct PaymentInitiatedMessageHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for PaymentInitiatedMessageHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        _ctx: &TradeContext,
        _event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        trade.payment_initiated_at = Some(now_millis());
        Ok(())
    }
}

/// Seller confirms receipt and releases its swap tx signature.
#[derive(Default)]
pub(crate) struct PaymentReceiptConfirmedHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for PaymentReceiptConfirmedHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        _event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let swap_tx_signature = ctx.signer.sign_swap_tx(trade.trade_id).await?;
        trade.my_party_mut().swap_tx_signature = Some(swap_tx_signature.clone());
        emit(trade, ctx, MuSigMessage::PaymentReceived { swap_tx_signature }).await
    }
}

#[derive(Default)]
pub(crate) struct PaymentReceivedMessageHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for PaymentReceivedMessageHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let MuSigTradeEvent::Message(message) = event else {
            return Err(unexpected_event(trade, event));
        };
        let MuSigMessage::PaymentReceived { swap_tx_signature } = &message.payload else {
            return Err(unexpected_event(trade, event));
        };

        require_non_empty(
            trade,
            "swap tx partial signature",
            &swap_tx_signature.swap_tx_input_partial_signature,
        )?;
        ctx.signer
            .verify_swap_tx_signature(trade.trade_id, swap_tx_signature)
            .await?;

        trade.peer_party_mut().swap_tx_signature = Some(swap_tx_signature.clone());
        Ok(())
    }
}
