use super::{
    event::MuSigTradeEventKind as Kind,
    handlers::*,
    messages::MuSigMessageKind as Msg,
    model::MuSigTrade,
    state::MuSigTradeState::*,
    terms::TradeRole,
};
use crate::{common::error::MusigError, fsm::Fsm};

pub type TradeFsm = Fsm<MuSigTrade>;

/// Builds the state machine driving a trade, wired for the trade's role.
pub fn new_protocol_fsm(
    trade: MuSigTrade,
    backlog_capacity: usize,
) -> Result<TradeFsm, MusigError> {
    let role = trade.role;
    let mut fsm = Fsm::new(trade).with_backlog_capacity(backlog_capacity);
    configure(&mut fsm, role)?;
    Ok(fsm)
}

pub fn configure(fsm: &mut TradeFsm, role: TradeRole) -> Result<(), MusigError> {
    configure_error_handling(fsm)?;
    if role.is_maker() {
        configure_maker_setup(fsm)?;
    } else {
        configure_taker_setup(fsm)?;
    }
    configure_deposit(fsm, role)?;
    if role.is_buyer() {
        configure_buyer_settlement(fsm)
    } else {
        configure_seller_settlement(fsm)
    }
}

fn configure_error_handling(fsm: &mut TradeFsm) -> Result<(), MusigError> {
    fsm.from_any()
        .on(Kind::Failure)
        .run::<FailureHandler>()
        .to(Failed)
}

fn configure_taker_setup(fsm: &mut TradeFsm) -> Result<(), MusigError> {
    fsm.from(Init)
        .on(Kind::TakeOffer)
        .run::<TakeOfferHandler>()
        .to(SetupSent)?;
    fsm.from(SetupSent)
        .on(Kind::Message(Msg::SetupTradeB))
        .run::<SetupTradeBHandler>()
        .to(SetupReceived)?;
    fsm.from(SetupReceived)
        .on(Kind::Message(Msg::SetupTradeD))
        .run::<SetupTradeDHandler>()
        .to(DepositBroadcast)
}

fn configure_maker_setup(fsm: &mut TradeFsm) -> Result<(), MusigError> {
    fsm.from(Init)
        .on(Kind::Message(Msg::SetupTradeA))
        .run::<SetupTradeAHandler>()
        .to(SetupReceived)?;
    fsm.from(SetupReceived)
        .on(Kind::Message(Msg::SetupTradeC))
        .run::<SetupTradeCHandler>()
        .to(DepositSigned)
}

fn configure_deposit(fsm: &mut TradeFsm, role: TradeRole) -> Result<(), MusigError> {
    if role.is_maker() {
        fsm.from(DepositSigned)
            .on(Kind::DepositTxBroadcast)
            .run::<DepositTxBroadcastHandler>()
            .to(DepositBroadcast)?;
    }
    fsm.from_states(&[DepositSigned, DepositBroadcast])
        .on(Kind::DepositTxConfirmed)
        .run::<DepositTxConfirmedHandler>()
        .to(DepositConfirmed)
}

fn configure_buyer_settlement(fsm: &mut TradeFsm) -> Result<(), MusigError> {
    fsm.from(DepositConfirmed)
        .on(Kind::PaymentInitiated)
        .run::<PaymentInitiatedHandler>()
        .to(PaymentStarted)?;
    fsm.from(PaymentStarted)
        .on(Kind::Message(Msg::PaymentReceived))
        .run::<PaymentReceivedMessageHandler>()
        .to(PaymentReceived)?;
    fsm.from(PaymentReceived)
        .on(Kind::CloseTrade)
        .run::<CloseTradeHandler>()
        .to(CooperativeClosure)?;
    fsm.from(CooperativeClosure)
        .on(Kind::Message(Msg::CloseTradeResponse))
        .run::<CloseTradeResponseHandler>()
        .to(Completed)?;
    fsm.from(CooperativeClosure)
        .on(Kind::CloseTradeTimeout)
        .run::<CloseTradeTimeoutHandler>()
        .to(ForceClosed)
}

fn configure_seller_settlement(fsm: &mut TradeFsm) -> Result<(), MusigError> {
    fsm.from(DepositConfirmed)
        .on(Kind::Message(Msg::PaymentInitiated))
        .run::<PaymentInitiatedMessageHandler>()
        .to(PaymentStarted)?;
    fsm.from(PaymentStarted)
        .on(Kind::PaymentReceiptConfirmed)
        .run::<PaymentReceiptConfirmedHandler>()
        .to(PaymentReceived)?;
    fsm.from(PaymentReceived)
        .on(Kind::Message(Msg::CloseTradeRequest))
        .run::<CloseTradeRequestHandler>()
        .to(Completed)
}
