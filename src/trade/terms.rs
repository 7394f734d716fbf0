use iso_currency::Currency;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

use crate::common::{error::MusigError, types::NetworkId};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum TradeRole {
    BuyerAsMaker,
    BuyerAsTaker,
    SellerAsMaker,
    SellerAsTaker,
}

impl TradeRole {
    pub fn new(is_maker: bool, is_buyer: bool) -> Self {
        match (is_maker, is_buyer) {
            (true, true) => TradeRole::BuyerAsMaker,
            (false, true) => TradeRole::BuyerAsTaker,
            (true, false) => TradeRole::SellerAsMaker,
            (false, false) => TradeRole::SellerAsTaker,
        }
    }

    pub fn is_maker(&self) -> bool {
        matches!(self, TradeRole::BuyerAsMaker | TradeRole::SellerAsMaker)
    }

    pub fn is_buyer(&self) -> bool {
        matches!(self, TradeRole::BuyerAsMaker | TradeRole::BuyerAsTaker)
    }
}

/// An offer a maker is willing to trade on. Publishing it is the offer book's business.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MuSigOffer {
    pub offer_id: String,
    pub maker_network_id: NetworkId,
    pub maker_is_buyer: bool,
    pub base_amount_sats: u64,
    pub quote_amount: u64,
    pub quote_currency: Currency,
    pub payment_method: String,
}

/// The terms a taker accepted, as carried in the first setup message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeTerms {
    pub offer_id: String,
    pub maker_is_buyer: bool,
    pub base_amount_sats: u64,
    pub quote_amount: u64,
    pub quote_currency: Currency,
    pub payment_method: String,
    pub taken_at_millis: u64,
}

impl TradeTerms {
    pub fn from_offer(offer: &MuSigOffer, taken_at_millis: u64) -> Self {
        Self {
            offer_id: offer.offer_id.clone(),
            maker_is_buyer: offer.maker_is_buyer,
            base_amount_sats: offer.base_amount_sats,
            quote_amount: offer.quote_amount,
            quote_currency: offer.quote_currency,
            payment_method: offer.payment_method.clone(),
            taken_at_millis,
        }
    }

    pub fn validate(&self) -> Result<(), MusigError> {
        if self.offer_id.is_empty() {
            return Err(MusigError::Validation(
                "Trade terms reference no offer".to_string(),
            ));
        }
        if self.base_amount_sats == 0 || self.quote_amount == 0 {
            return Err(MusigError::Validation(format!(
                "Trade terms for offer {} have a zero amount",
                self.offer_id
            )));
        }
        if self.payment_method.is_empty() {
            return Err(MusigError::Validation(format!(
                "Trade terms for offer {} have no payment method",
                self.offer_id
            )));
        }
        Ok(())
    }

    pub fn matches_offer(&self, offer: &MuSigOffer) -> bool {
        self.offer_id == offer.offer_id
            && self.maker_is_buyer == offer.maker_is_buyer
            && self.base_amount_sats == offer.base_amount_sats
            && self.quote_amount == offer.quote_amount
            && self.quote_currency == offer.quote_currency
            && self.payment_method == offer.payment_method
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SomeTestParams, SomeTestTradeParams};

    #[test]
    fn test_roles() {
        let role = TradeRole::new(true, false);
        assert_eq!(role, TradeRole::SellerAsMaker);
        assert!(role.is_maker());
        assert!(!role.is_buyer());
        assert!(TradeRole::BuyerAsTaker.is_buyer());
    }

    #[test]
    fn test_terms_match_their_offer() {
        let offer = SomeTestTradeParams::some_offer(SomeTestParams::maker_identity().network_id());
        let terms = TradeTerms::from_offer(&offer, 1_700_000_000_000);
        assert!(terms.validate().is_ok());
        assert!(terms.matches_offer(&offer));

        let mut changed = terms.clone();
        changed.quote_amount += 1;
        assert!(!changed.matches_offer(&offer));
    }

    #[test]
    fn test_zero_amount_terms_rejected() {
        let offer = SomeTestTradeParams::some_offer(SomeTestParams::maker_identity().network_id());
        let mut terms = TradeTerms::from_offer(&offer, 0);
        terms.base_amount_sats = 0;
        assert!(matches!(terms.validate(), Err(MusigError::Validation(_))));
    }
}
