use serde::{Deserialize, Serialize};

use super::messages::{
    DepositPsbt, NonceShares, PartialSignatures, PartialSignaturesMessage, PubKeyShares,
    RedactedPartialSignatures, SwapTxSignature,
};
use crate::common::types::NetworkId;

/// One side of a trade and the protocol artifacts that side produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeParty {
    pub network_id: NetworkId,
    pub pub_key_shares: Option<PubKeyShares>,
    pub nonce_shares: Option<NonceShares>,
    pub partial_signatures: Option<PartialSignatures>,
    pub redacted_partial_signatures: Option<RedactedPartialSignatures>,
    pub deposit_psbt: Option<DepositPsbt>,
    pub swap_tx_signature: Option<SwapTxSignature>,
    pub output_prv_key_share: Option<Vec<u8>>,
}

impl TradeParty {
    pub fn new(network_id: NetworkId) -> Self {
        Self {
            network_id,
            pub_key_shares: None,
            nonce_shares: None,
            partial_signatures: None,
            redacted_partial_signatures: None,
            deposit_psbt: None,
            swap_tx_signature: None,
            output_prv_key_share: None,
        }
    }

    pub(crate) fn set_partial_signatures(&mut self, partial_signatures: PartialSignaturesMessage) {
        match partial_signatures {
            PartialSignaturesMessage::Full(signatures) => {
                self.partial_signatures = Some(signatures)
            }
            PartialSignaturesMessage::Redacted(signatures) => {
                self.redacted_partial_signatures = Some(signatures)
            }
        }
    }
}
