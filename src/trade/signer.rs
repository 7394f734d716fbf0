use async_trait::async_trait;
use uuid::Uuid;

use super::{
    messages::{
        CloseTradeData, DepositPsbt, NonceShares, PartialSignatures, PartialSignaturesMessage,
        PubKeyShares, SwapTxSignature,
    },
    terms::TradeRole,
};
use crate::common::error::MusigError;

/// The MuSig key, nonce and transaction work of a trade, done by a wallet daemon.
///
/// Calls may block for as long as the daemon takes. Implementations return
/// `MusigError::Validation` when the counterparty supplied data that does not verify, and
/// `MusigError::Handler` when the daemon itself could not do the work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MuSigSigner: Send + Sync {
    async fn init_trade(&self, trade_id: Uuid, role: TradeRole)
        -> Result<PubKeyShares, MusigError>;

    async fn get_nonce_shares(
        &self,
        trade_id: Uuid,
        peer_pub_key_shares: &PubKeyShares,
    ) -> Result<NonceShares, MusigError>;

    async fn get_partial_signatures(
        &self,
        trade_id: Uuid,
        peer_nonce_shares: &NonceShares,
    ) -> Result<PartialSignatures, MusigError>;

    async fn sign_deposit_tx(
        &self,
        trade_id: Uuid,
        peer_partial_signatures: &PartialSignaturesMessage,
    ) -> Result<DepositPsbt, MusigError>;

    async fn publish_deposit_tx(
        &self,
        trade_id: Uuid,
        deposit_psbt: &DepositPsbt,
    ) -> Result<(), MusigError>;

    async fn is_deposit_tx_in_mempool(&self, trade_id: Uuid) -> Result<bool, MusigError>;

    async fn sign_swap_tx(&self, trade_id: Uuid) -> Result<SwapTxSignature, MusigError>;

    async fn verify_swap_tx_signature(
        &self,
        trade_id: Uuid,
        peer_swap_tx_signature: &SwapTxSignature,
    ) -> Result<(), MusigError>;

    /// Releases our output key share, given the peer's share once it is known.
    async fn close_trade(
        &self,
        trade_id: Uuid,
        peer_output_prv_key_share: Option<Vec<u8>>,
    ) -> Result<CloseTradeData, MusigError>;

    async fn broadcast_swap_tx(
        &self,
        trade_id: Uuid,
        peer_swap_tx_signature: &SwapTxSignature,
    ) -> Result<(), MusigError>;
}
