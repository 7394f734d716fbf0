use std::{str::FromStr, sync::Mutex};

use async_trait::async_trait;
use iso_currency::Currency;
use secp256k1::SecretKey;
use url::Url;
use uuid::Uuid;

use crate::{
    common::{
        error::MusigError,
        types::{Identity, NetworkId},
    },
    config::PROTOCOL_VERSION,
    delivery::MessageDeliveryStatus,
    peer_msg::TradeMessage,
    trade::{
        MuSigMessage, MuSigOffer, MuSigTrade, MuSigTradeState, NonceShares, PubKeyShares,
        TradeMessageSender, TradeRole, TradeTerms,
    },
};

pub const TESTING_DEFAULT_CHANNEL_SIZE: usize = 10;

pub struct SomeTestParams {}

impl SomeTestParams {
    pub fn maker_secret_key() -> SecretKey {
        SecretKey::from_str("01010101010101010001020304050607ffff0000ffff00006363636363636363")
            .unwrap()
    }

    pub fn taker_secret_key() -> SecretKey {
        SecretKey::from_str("0202020202020202000102030405060700ff00ff00ff00ff6464646464646464")
            .unwrap()
    }

    pub fn maker_address() -> Url {
        Url::parse("tor://makerpeeraddress.onion:9999").unwrap()
    }

    pub fn taker_address() -> Url {
        Url::parse("tor://takerpeeraddress.onion:9999").unwrap()
    }

    pub fn maker_identity() -> Identity {
        Identity::new(Self::maker_secret_key(), Self::maker_address())
    }

    pub fn taker_identity() -> Identity {
        Identity::new(Self::taker_secret_key(), Self::taker_address())
    }
}

pub struct SomeTestTradeParams {}

impl SomeTestTradeParams {
    pub fn some_uuid() -> Uuid {
        Uuid::from_str("20c38e4b-037b-4654-b99c-1d9f2beb755f").unwrap()
    }

    pub fn some_offer(maker_network_id: &NetworkId) -> MuSigOffer {
        Self::some_offer_with(maker_network_id, true)
    }

    pub fn some_offer_with(maker_network_id: &NetworkId, maker_is_buyer: bool) -> MuSigOffer {
        MuSigOffer {
            offer_id: "some-offer-id".to_string(),
            maker_network_id: maker_network_id.clone(),
            maker_is_buyer,
            base_amount_sats: 1_000_000,
            quote_amount: 250_000,
            quote_currency: Currency::EUR,
            payment_method: "SEPA".to_string(),
        }
    }

    pub fn some_terms(maker_is_buyer: bool) -> TradeTerms {
        let maker_network_id = SomeTestParams::maker_identity().network_id().clone();
        let offer = Self::some_offer_with(&maker_network_id, maker_is_buyer);
        TradeTerms::from_offer(&offer, 1_700_000_000_000)
    }

    pub fn some_pub_key_shares() -> PubKeyShares {
        PubKeyShares {
            buyer_output_pub_key_share: vec![0x02; 33],
            seller_output_pub_key_share: vec![0x03; 33],
            current_block_height: 800_000,
        }
    }

    pub fn some_nonce_shares() -> NonceShares {
        NonceShares {
            deposit_tx_input_nonce_share: vec![0x04; 66],
            swap_tx_input_nonce_share: vec![0x05; 66],
        }
    }

    /// Taker's opening message of the trade with ID `some_uuid()`.
    pub fn some_trade_message() -> TradeMessage {
        TradeMessage::new(
            Self::some_uuid(),
            PROTOCOL_VERSION,
            SomeTestParams::taker_identity().network_id().clone(),
            SomeTestParams::maker_identity().network_id().clone(),
            MuSigMessage::SetupTradeA {
                terms: Self::some_terms(true),
                pub_key_shares: Self::some_pub_key_shares(),
            },
        )
    }

    /// The maker's and the taker's view of the same fresh trade.
    pub fn some_trade_pair(maker_is_buyer: bool) -> (MuSigTrade, MuSigTrade) {
        let maker_trade = Self::some_trade(TradeRole::new(true, maker_is_buyer));
        let taker_trade = Self::some_trade(TradeRole::new(false, !maker_is_buyer));
        (maker_trade, taker_trade)
    }

    pub fn some_trade(role: TradeRole) -> MuSigTrade {
        let maker_is_buyer = role.is_maker() == role.is_buyer();
        MuSigTrade::new(
            Self::some_uuid(),
            PROTOCOL_VERSION,
            role,
            Self::some_terms(maker_is_buyer),
            SomeTestParams::maker_identity().network_id().clone(),
            SomeTestParams::taker_identity().network_id().clone(),
        )
    }

    pub fn some_trade_in_state(role: TradeRole, state: MuSigTradeState) -> MuSigTrade {
        let mut trade = Self::some_trade(role);
        trade.state = state;
        trade
    }

    /// A message from the counterparty of `trade`, addressed to us.
    pub fn some_peer_message(trade: &MuSigTrade, payload: MuSigMessage) -> TradeMessage {
        TradeMessage::new(
            trade.trade_id,
            trade.protocol_version,
            trade.peer_party().network_id.clone(),
            trade.my_party().network_id.clone(),
            payload,
        )
    }
}

/// Keeps every message handed to it instead of sending it anywhere.
pub struct RecordingSender {
    sent: Mutex<Vec<TradeMessage>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<TradeMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<TradeMessage> {
        self.sent().pop()
    }
}

impl Default for RecordingSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradeMessageSender for RecordingSender {
    async fn send_trade_message(
        &self,
        message: TradeMessage,
    ) -> Result<MessageDeliveryStatus, MusigError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);
        Ok(MessageDeliveryStatus::Sent)
    }
}
