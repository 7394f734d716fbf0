use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    context::TradeContext, event::MuSigTradeEvent, messages::MuSigMessage, party::TradeParty,
    state::MuSigTradeState, terms::TradeRole, terms::TradeTerms,
};
use crate::{
    common::types::{MessageId, NetworkId},
    fsm::FsmModel,
    peer_msg::TradeMessage,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MuSigTrade {
    pub trade_id: Uuid,
    pub protocol_version: u8,
    pub role: TradeRole,
    pub terms: TradeTerms,
    pub maker: TradeParty,
    pub taker: TradeParty,
    pub state: MuSigTradeState,
    pub failure_reason: Option<String>,
    pub deposit_confirmed_at: Option<u64>,
    pub payment_initiated_at: Option<u64>,
    pub close_requested_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub sent_message_ids: Vec<MessageId>,
}

impl MuSigTrade {
    pub fn new(
        trade_id: Uuid,
        protocol_version: u8,
        role: TradeRole,
        terms: TradeTerms,
        maker_network_id: NetworkId,
        taker_network_id: NetworkId,
    ) -> Self {
        Self {
            trade_id,
            protocol_version,
            role,
            terms,
            maker: TradeParty::new(maker_network_id),
            taker: TradeParty::new(taker_network_id),
            state: MuSigTradeState::Init,
            failure_reason: None,
            deposit_confirmed_at: None,
            payment_initiated_at: None,
            close_requested_at: None,
            completed_at: None,
            sent_message_ids: Vec::new(),
        }
    }

    pub fn is_buyer(&self) -> bool {
        self.role.is_buyer()
    }

    pub fn is_maker(&self) -> bool {
        self.role.is_maker()
    }

    pub fn my_party(&self) -> &TradeParty {
        if self.is_maker() {
            &self.maker
        } else {
            &self.taker
        }
    }

    pub fn peer_party(&self) -> &TradeParty {
        if self.is_maker() {
            &self.taker
        } else {
            &self.maker
        }
    }

    pub(crate) fn my_party_mut(&mut self) -> &mut TradeParty {
        if self.is_maker() {
            &mut self.maker
        } else {
            &mut self.taker
        }
    }

    pub(crate) fn peer_party_mut(&mut self) -> &mut TradeParty {
        if self.is_maker() {
            &mut self.taker
        } else {
            &mut self.maker
        }
    }

    pub(crate) fn new_message(&self, payload: MuSigMessage) -> TradeMessage {
        TradeMessage::new(
            self.trade_id,
            self.protocol_version,
            self.my_party().network_id.clone(),
            self.peer_party().network_id.clone(),
            payload,
        )
    }
}

impl FsmModel for MuSigTrade {
    type State = MuSigTradeState;
    type Event = MuSigTradeEvent;
    type Context = TradeContext;

    fn state(&self) -> MuSigTradeState {
        self.state
    }

    fn set_state(&mut self, state: MuSigTradeState) {
        self.state = state;
    }

    fn label(&self) -> String {
        format!("Trade w/ TradeUUID {}", self.trade_id)
    }
}
