use super::messages::MuSigMessageKind;
use crate::{fsm::Event, peer_msg::TradeMessage};

#[derive(Clone, Debug)]
pub enum MuSigTradeEvent {
    // Raised locally by the user, a chain observer or a timer
    TakeOffer,
    DepositTxBroadcast,
    DepositTxConfirmed,
    PaymentInitiated,
    PaymentReceiptConfirmed,
    CloseTrade,
    CloseTradeTimeout,
    Failure { reason: String },

    // Received from the counterparty
    Message(TradeMessage),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MuSigTradeEventKind {
    TakeOffer,
    DepositTxBroadcast,
    DepositTxConfirmed,
    PaymentInitiated,
    PaymentReceiptConfirmed,
    CloseTrade,
    CloseTradeTimeout,
    Failure,
    Message(MuSigMessageKind),
}

impl Event for MuSigTradeEvent {
    type Kind = MuSigTradeEventKind;

    fn kind(&self) -> MuSigTradeEventKind {
        match self {
            MuSigTradeEvent::TakeOffer => MuSigTradeEventKind::TakeOffer,
            MuSigTradeEvent::DepositTxBroadcast => MuSigTradeEventKind::DepositTxBroadcast,
            MuSigTradeEvent::DepositTxConfirmed => MuSigTradeEventKind::DepositTxConfirmed,
            MuSigTradeEvent::PaymentInitiated => MuSigTradeEventKind::PaymentInitiated,
            MuSigTradeEvent::PaymentReceiptConfirmed => {
                MuSigTradeEventKind::PaymentReceiptConfirmed
            }
            MuSigTradeEvent::CloseTrade => MuSigTradeEventKind::CloseTrade,
            MuSigTradeEvent::CloseTradeTimeout => MuSigTradeEventKind::CloseTradeTimeout,
            MuSigTradeEvent::Failure { .. } => MuSigTradeEventKind::Failure,
            MuSigTradeEvent::Message(message) => {
                MuSigTradeEventKind::Message(message.payload.kind())
            }
        }
    }

    fn identity(&self) -> Option<String> {
        match self {
            MuSigTradeEvent::Message(message) => Some(message.message_id.clone()),
            _ => None,
        }
    }
}
