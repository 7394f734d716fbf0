mod closure;
mod deposit;
mod settlement;
mod setup;

pub(crate) use closure::{
    CloseTradeHandler, CloseTradeRequestHandler, CloseTradeResponseHandler,
    CloseTradeTimeoutHandler, FailureHandler,
};
pub(crate) use deposit::{DepositTxBroadcastHandler, DepositTxConfirmedHandler};
pub(crate) use settlement::{
    PaymentInitiatedHandler, PaymentInitiatedMessageHandler, PaymentReceiptConfirmedHandler,
    PaymentReceivedMessageHandler,
};
pub(crate) use setup::{
    SetupTradeAHandler, SetupTradeBHandler, SetupTradeCHandler, SetupTradeDHandler,
    TakeOfferHandler,
};

use tracing::debug;

use super::{
    context::TradeContext,
    event::MuSigTradeEvent,
    messages::{MuSigMessage, PartialSignatures, PartialSignaturesMessage},
    model::MuSigTrade,
};
use crate::{common::error::MusigError, fsm::Event};

/// Sends a message to the counterparty and records it against the trade.
async fn emit(
    trade: &mut MuSigTrade,
    ctx: &TradeContext,
    payload: MuSigMessage,
) -> Result<(), MusigError> {
    let message = trade.new_message(payload);
    let message_id = message.message_id.clone();
    let kind = message.payload.kind();

    let status = ctx.sender.send_trade_message(message).await?;
    debug!(
        "Trade w/ TradeUUID {} sent {} with message ID {}, delivery status {}",
        trade.trade_id, kind, message_id, status
    );
    trade.sent_message_ids.push(message_id);
    Ok(())
}

fn unexpected_event(trade: &MuSigTrade, event: &MuSigTradeEvent) -> MusigError {
    MusigError::Handler(format!(
        "Trade w/ TradeUUID {} handler invoked with unexpected event {:?}",
        trade.trade_id,
        event.kind()
    ))
}

fn require_non_empty(trade: &MuSigTrade, name: &str, bytes: &[u8]) -> Result<(), MusigError> {
    if bytes.is_empty() {
        return Err(MusigError::Validation(format!(
            "Trade w/ TradeUUID {} received an empty {}",
            trade.trade_id, name
        )));
    }
    Ok(())
}

/// A seller must never hand out its swap tx signature during setup, a buyer always does.
fn check_peer_partial_signatures(
    trade: &MuSigTrade,
    partial_signatures: &PartialSignaturesMessage,
) -> Result<(), MusigError> {
    let peer_is_buyer = !trade.is_buyer();
    match (peer_is_buyer, partial_signatures) {
        (true, PartialSignaturesMessage::Full(signatures)) => {
            require_non_empty(
                trade,
                "deposit tx partial signature",
                &signatures.deposit_tx_partial_signature,
            )?;
            require_non_empty(
                trade,
                "swap tx partial signature",
                &signatures.swap_tx_input_partial_signature,
            )
        }
        (false, PartialSignaturesMessage::Redacted(signatures)) => require_non_empty(
            trade,
            "deposit tx partial signature",
            &signatures.deposit_tx_partial_signature,
        ),
        (true, PartialSignaturesMessage::Redacted(_)) => Err(MusigError::Validation(format!(
            "Trade w/ TradeUUID {} expected full partial signatures from the buyer",
            trade.trade_id
        ))),
        (false, PartialSignaturesMessage::Full(_)) => Err(MusigError::Validation(format!(
            "Trade w/ TradeUUID {} received unredacted partial signatures from the seller",
            trade.trade_id
        ))),
    }
}

fn outgoing_partial_signatures(
    trade: &MuSigTrade,
    partial_signatures: &PartialSignatures,
) -> PartialSignaturesMessage {
    if trade.is_buyer() {
        PartialSignaturesMessage::Full(partial_signatures.clone())
    } else {
        PartialSignaturesMessage::Redacted(partial_signatures.redact())
    }
}
