use async_trait::async_trait;
use tracing::debug;

use super::{
    check_peer_partial_signatures, emit, outgoing_partial_signatures, require_non_empty,
    unexpected_event,
};
use crate::{
    common::error::MusigError,
    fsm::EventHandler,
    trade::{
        context::TradeContext, event::MuSigTradeEvent, messages::MuSigMessage, model::MuSigTrade,
    },
};

/// Taker opens the trade with its pub key shares.
#[derive(Default)]
pub(crate) struct TakeOfferHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for TakeOfferHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        _event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        trade.terms.validate()?;
        let pub_key_shares = ctx.signer.init_trade(trade.trade_id, trade.role).await?;
        trade.my_party_mut().pub_key_shares = Some(pub_key_shares.clone());

        let payload = MuSigMessage::SetupTradeA {
            terms: trade.terms.clone(),
            pub_key_shares,
        };
        emit(trade, ctx, payload).await
    }
}

#[derive(Default)]
pub(crate) struct SetupTradeAHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for SetupTradeAHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let MuSigTradeEvent::Message(message) = event else {
            return Err(unexpected_event(trade, event));
        };
        let MuSigMessage::SetupTradeA {
            terms,
            pub_key_shares: peer_pub_key_shares,
        } = &message.payload
        else {
            return Err(unexpected_event(trade, event));
        };

        terms.validate()?;
        if *terms != trade.terms {
            return Err(MusigError::Validation(format!(
                "Trade w/ TradeUUID {} received terms differing from the agreed ones",
                trade.trade_id
            )));
        }
        require_non_empty(
            trade,
            "buyer output pub key share",
            &peer_pub_key_shares.buyer_output_pub_key_share,
        )?;
        require_non_empty(
            trade,
            "seller output pub key share",
            &peer_pub_key_shares.seller_output_pub_key_share,
        )?;

        let pub_key_shares = ctx.signer.init_trade(trade.trade_id, trade.role).await?;
        let nonce_shares = ctx
            .signer
            .get_nonce_shares(trade.trade_id, peer_pub_key_shares)
            .await?;

        trade.peer_party_mut().pub_key_shares = Some(peer_pub_key_shares.clone());
        let my_party = trade.my_party_mut();
        my_party.pub_key_shares = Some(pub_key_shares.clone());
        my_party.nonce_shares = Some(nonce_shares.clone());

        let payload = MuSigMessage::SetupTradeB {
            pub_key_shares,
            nonce_shares,
        };
        emit(trade, ctx, payload).await
    }
}

#[derive(Default)]
pub(crate) struct SetupTradeBHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for SetupTradeBHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let MuSigTradeEvent::Message(message) = event else {
            return Err(unexpected_event(trade, event));
        };
        let MuSigMessage::SetupTradeB {
            pub_key_shares: peer_pub_key_shares,
            nonce_shares: peer_nonce_shares,
        } = &message.payload
        else {
            return Err(unexpected_event(trade, event));
        };

        require_non_empty(
            trade,
            "deposit tx input nonce share",
            &peer_nonce_shares.deposit_tx_input_nonce_share,
        )?;
        require_non_empty(
            trade,
            "swap tx input nonce share",
            &peer_nonce_shares.swap_tx_input_nonce_share,
        )?;

        let nonce_shares = ctx
            .signer
            .get_nonce_shares(trade.trade_id, peer_pub_key_shares)
            .await?;
        let partial_signatures = ctx
            .signer
            .get_partial_signatures(trade.trade_id, peer_nonce_shares)
            .await?;
        let outgoing = outgoing_partial_signatures(trade, &partial_signatures);

        let peer_party = trade.peer_party_mut();
        peer_party.pub_key_shares = Some(peer_pub_key_shares.clone());
        peer_party.nonce_shares = Some(peer_nonce_shares.clone());
        let my_party = trade.my_party_mut();
        my_party.nonce_shares = Some(nonce_shares.clone());
        my_party.partial_signatures = Some(partial_signatures);

        let payload = MuSigMessage::SetupTradeC {
            nonce_shares,
            partial_signatures: outgoing,
        };
        emit(trade, ctx, payload).await
    }
}

#[derive(Default)]
pub(crate) struct SetupTradeCHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for SetupTradeCHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let MuSigTradeEvent::Message(message) = event else {
            return Err(unexpected_event(trade, event));
        };
        let MuSigMessage::SetupTradeC {
            nonce_shares: peer_nonce_shares,
            partial_signatures: peer_partial_signatures,
        } = &message.payload
        else {
            return Err(unexpected_event(trade, event));
        };

        check_peer_partial_signatures(trade, peer_partial_signatures)?;

        let partial_signatures = ctx
            .signer
            .get_partial_signatures(trade.trade_id, peer_nonce_shares)
            .await?;
        let deposit_psbt = ctx
            .signer
            .sign_deposit_tx(trade.trade_id, peer_partial_signatures)
            .await?;
        let outgoing = outgoing_partial_signatures(trade, &partial_signatures);

        let peer_party = trade.peer_party_mut();
        peer_party.nonce_shares = Some(peer_nonce_shares.clone());
        peer_party.set_partial_signatures(peer_partial_signatures.clone());
        let my_party = trade.my_party_mut();
        my_party.partial_signatures = Some(partial_signatures);
        my_party.deposit_psbt = Some(deposit_psbt.clone());

        let payload = MuSigMessage::SetupTradeD {
            partial_signatures: outgoing,
            deposit_psbt,
        };
        emit(trade, ctx, payload).await
    }
}

/// Taker co-signs the deposit tx and publishes it. Nothing left to tell the maker,
/// which watches the chain for it.
#[derive(Default)]
pub(crate) struct SetupTradeDHandler;

#[async_trait]
impl EventHandler<MuSigTrade> for SetupTradeDHandler {
    async fn handle(
        &self,
        trade: &mut MuSigTrade,
        ctx: &TradeContext,
        event: &MuSigTradeEvent,
    ) -> Result<(), MusigError> {
        let MuSigTradeEvent::Message(message) = event else {
            return Err(unexpected_event(trade, event));
        };
        let MuSigMessage::SetupTradeD {
            partial_signatures: peer_partial_signatures,
            deposit_psbt: peer_deposit_psbt,
        } = &message.payload
        else {
            return Err(unexpected_event(trade, event));
        };

        check_peer_partial_signatures(trade, peer_partial_signatures)?;
        require_non_empty(trade, "deposit psbt", &peer_deposit_psbt.psbt)?;

        let deposit_psbt = ctx
            .signer
            .sign_deposit_tx(trade.trade_id, peer_partial_signatures)
            .await?;
        ctx.signer
            .publish_deposit_tx(trade.trade_id, &deposit_psbt)
            .await?;
        debug!(
            "Trade w/ TradeUUID {} published deposit tx",
            trade.trade_id
        );

        let peer_party = trade.peer_party_mut();
        peer_party.set_partial_signatures(peer_partial_signatures.clone());
        peer_party.deposit_psbt = Some(peer_deposit_psbt.clone());
        trade.my_party_mut().deposit_psbt = Some(deposit_psbt);
        Ok(())
    }
}
