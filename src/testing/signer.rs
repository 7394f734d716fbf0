use std::{collections::HashSet, sync::Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    common::error::MusigError,
    trade::{
        CloseTradeData, DepositPsbt, MuSigSigner, NonceShares, PartialSignatures,
        PartialSignaturesMessage, PubKeyShares, SwapTxSignature, TradeRole,
    },
};

/// Signer producing deterministic artifacts derived from the trade ID.
///
/// Individual calls can be made to fail as if the wallet daemon broke (`fail_on`), or as
/// if the peer's data did not verify (`reject_on`).
#[derive(Default)]
pub struct FakeSigner {
    calls: Mutex<Vec<&'static str>>,
    fail_on: Mutex<HashSet<&'static str>>,
    reject_on: Mutex<HashSet<&'static str>>,
}

impl FakeSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, method: &'static str) {
        self.fail_on
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(method);
    }

    pub fn reject_on(&self, method: &'static str) {
        self.reject_on
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(method);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn call(&self, method: &'static str) -> Result<(), MusigError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(method);

        let failing = self
            .fail_on
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(method);
        if failing {
            return Err(MusigError::Handler(format!("{} unavailable", method)));
        }

        let rejecting = self
            .reject_on
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(method);
        if rejecting {
            return Err(MusigError::Validation(format!("{} rejected peer data", method)));
        }
        Ok(())
    }

    fn artifact(trade_id: Uuid, tag: u8) -> Vec<u8> {
        let mut bytes = trade_id.as_bytes().to_vec();
        bytes.push(tag);
        bytes
    }
}

#[async_trait]
impl MuSigSigner for FakeSigner {
    async fn init_trade(
        &self,
        trade_id: Uuid,
        _role: TradeRole,
    ) -> Result<PubKeyShares, MusigError> {
        self.call("init_trade")?;
        Ok(PubKeyShares {
            buyer_output_pub_key_share: Self::artifact(trade_id, 1),
            seller_output_pub_key_share: Self::artifact(trade_id, 2),
            current_block_height: 800_000,
        })
    }

    async fn get_nonce_shares(
        &self,
        trade_id: Uuid,
        _peer_pub_key_shares: &PubKeyShares,
    ) -> Result<NonceShares, MusigError> {
        self.call("get_nonce_shares")?;
        Ok(NonceShares {
            deposit_tx_input_nonce_share: Self::artifact(trade_id, 3),
            swap_tx_input_nonce_share: Self::artifact(trade_id, 4),
        })
    }

    async fn get_partial_signatures(
        &self,
        trade_id: Uuid,
        _peer_nonce_shares: &NonceShares,
    ) -> Result<PartialSignatures, MusigError> {
        self.call("get_partial_signatures")?;
        Ok(PartialSignatures {
            deposit_tx_partial_signature: Self::artifact(trade_id, 5),
            swap_tx_input_partial_signature: Self::artifact(trade_id, 6),
        })
    }

    async fn sign_deposit_tx(
        &self,
        trade_id: Uuid,
        _peer_partial_signatures: &PartialSignaturesMessage,
    ) -> Result<DepositPsbt, MusigError> {
        self.call("sign_deposit_tx")?;
        Ok(DepositPsbt {
            psbt: Self::artifact(trade_id, 7),
        })
    }

    async fn publish_deposit_tx(
        &self,
        _trade_id: Uuid,
        _deposit_psbt: &DepositPsbt,
    ) -> Result<(), MusigError> {
        self.call("publish_deposit_tx")
    }

    async fn is_deposit_tx_in_mempool(&self, _trade_id: Uuid) -> Result<bool, MusigError> {
        self.call("is_deposit_tx_in_mempool")?;
        Ok(true)
    }

    async fn sign_swap_tx(&self, trade_id: Uuid) -> Result<SwapTxSignature, MusigError> {
        self.call("sign_swap_tx")?;
        Ok(SwapTxSignature {
            swap_tx_input_partial_signature: Self::artifact(trade_id, 8),
        })
    }

    async fn verify_swap_tx_signature(
        &self,
        _trade_id: Uuid,
        _peer_swap_tx_signature: &SwapTxSignature,
    ) -> Result<(), MusigError> {
        self.call("verify_swap_tx_signature")
    }

    async fn close_trade(
        &self,
        trade_id: Uuid,
        _peer_output_prv_key_share: Option<Vec<u8>>,
    ) -> Result<CloseTradeData, MusigError> {
        self.call("close_trade")?;
        Ok(CloseTradeData {
            output_prv_key_share: Self::artifact(trade_id, 9),
        })
    }

    async fn broadcast_swap_tx(
        &self,
        _trade_id: Uuid,
        _peer_swap_tx_signature: &SwapTxSignature,
    ) -> Result<(), MusigError> {
        self.call("broadcast_swap_tx")
    }
}
