use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumDiscriminants};

use super::terms::TradeTerms;

// Protocol artifacts exchanged between the two parties. The contents are opaque to
// this crate and produced or checked by the signer.

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyShares {
    pub buyer_output_pub_key_share: Vec<u8>,
    pub seller_output_pub_key_share: Vec<u8>,
    pub current_block_height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceShares {
    pub deposit_tx_input_nonce_share: Vec<u8>,
    pub swap_tx_input_nonce_share: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignatures {
    pub deposit_tx_partial_signature: Vec<u8>,
    pub swap_tx_input_partial_signature: Vec<u8>,
}

/// Partial signatures with the swap tx signature withheld.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedPartialSignatures {
    pub deposit_tx_partial_signature: Vec<u8>,
}

impl PartialSignatures {
    pub fn redact(&self) -> RedactedPartialSignatures {
        RedactedPartialSignatures {
            deposit_tx_partial_signature: self.deposit_tx_partial_signature.clone(),
        }
    }
}

/// A seller's partial signatures always travel redacted during setup, since its swap tx
/// signature would let the buyer take the escrow before paying.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialSignaturesMessage {
    Full(PartialSignatures),
    Redacted(RedactedPartialSignatures),
}

impl PartialSignaturesMessage {
    pub fn deposit_tx_partial_signature(&self) -> &[u8] {
        match self {
            PartialSignaturesMessage::Full(signatures) => &signatures.deposit_tx_partial_signature,
            PartialSignaturesMessage::Redacted(signatures) => {
                &signatures.deposit_tx_partial_signature
            }
        }
    }

    pub fn is_redacted(&self) -> bool {
        matches!(self, PartialSignaturesMessage::Redacted(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositPsbt {
    pub psbt: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapTxSignature {
    pub swap_tx_input_partial_signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseTradeData {
    pub output_prv_key_share: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(MuSigMessageKind), derive(Hash, Display))]
pub enum MuSigMessage {
    /// Taker to maker
    SetupTradeA {
        terms: TradeTerms,
        pub_key_shares: PubKeyShares,
    },
    /// Maker to taker
    SetupTradeB {
        pub_key_shares: PubKeyShares,
        nonce_shares: NonceShares,
    },
    /// Taker to maker
    SetupTradeC {
        nonce_shares: NonceShares,
        partial_signatures: PartialSignaturesMessage,
    },
    /// Maker to taker
    SetupTradeD {
        partial_signatures: PartialSignaturesMessage,
        deposit_psbt: DepositPsbt,
    },
    /// Buyer to seller
    PaymentInitiated,
    /// Seller to buyer, releasing the seller's swap tx signature
    PaymentReceived { swap_tx_signature: SwapTxSignature },
    /// Buyer to seller
    CloseTradeRequest { close_data: CloseTradeData },
    /// Seller to buyer
    CloseTradeResponse { close_data: CloseTradeData },
}

impl MuSigMessage {
    pub fn kind(&self) -> MuSigMessageKind {
        MuSigMessageKind::from(self)
    }

    /// Whether the message may arrive before the receiver knows about the trade.
    pub fn opens_trade(&self) -> bool {
        matches!(self, MuSigMessage::SetupTradeA { .. })
    }
}
