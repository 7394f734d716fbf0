#![allow(dead_code)]

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use iso_currency::Currency;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use uuid::Uuid;

use crusty_musig::{
    common::{error::MusigError, types::Identity},
    config::ManagerConfig,
    manager::Manager,
    testing::{FakeSigner, MemoryNetwork, TESTING_DEFAULT_CHANNEL_SIZE},
    trade::{MuSigOffer, MuSigTradeState, TradeAccess},
};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestPeer {
    pub identity: Identity,
    pub manager: Manager,
    pub signer: Arc<FakeSigner>,
}

pub async fn start_peer(
    network: &MemoryNetwork,
    identity: Identity,
    config: ManagerConfig,
) -> Result<TestPeer> {
    let (transport, inbound_rx) = network.join(identity.network_id().clone());
    let signer = Arc::new(FakeSigner::new());
    let manager = Manager::new(
        identity.clone(),
        transport,
        inbound_rx,
        signer.clone(),
        config,
    )
    .await?;
    Ok(TestPeer {
        identity,
        manager,
        signer,
    })
}

pub fn test_config(data_dir: &Path) -> ManagerConfig {
    ManagerConfig::with_data_dir(data_dir)
}

pub async fn some_offer(maker: &TestPeer, maker_is_buyer: bool) -> Result<MuSigOffer> {
    let offer = maker
        .manager
        .make_offer(maker_is_buyer, 1_000_000, 250_000, Currency::EUR, "SEPA")
        .await?;
    Ok(offer)
}

pub async fn new_trade_notif_rx(
    maker: &TestPeer,
) -> Result<mpsc::Receiver<Result<TradeAccess, MusigError>>> {
    let (tx, rx) = mpsc::channel::<Result<TradeAccess, MusigError>>(TESTING_DEFAULT_CHANNEL_SIZE);
    maker.manager.register_new_trade_notif_tx(tx).await?;
    Ok(rx)
}

pub async fn next_new_trade(
    rx: &mut mpsc::Receiver<Result<TradeAccess, MusigError>>,
) -> Result<TradeAccess> {
    match timeout(WAIT_TIMEOUT, rx.recv()).await {
        Ok(Some(result)) => Ok(result?),
        Ok(None) => Err(anyhow!("New trade notification channel closed")),
        Err(_) => Err(anyhow!("No new trade within {:?}", WAIT_TIMEOUT)),
    }
}

pub async fn wait_for_state(trade: &TradeAccess, state: MuSigTradeState) -> Result<()> {
    let mut state_rx = trade.subscribe_state().await?;
    let reached = timeout(WAIT_TIMEOUT, state_rx.wait_for(|current| *current == state))
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false);
    if reached {
        return Ok(());
    }
    let current = *state_rx.borrow();
    Err(anyhow!(
        "Trade {} stuck in {} waiting for {}",
        trade.trade_id(),
        current,
        state
    ))
}

/// Waits until the manager has let go of a finished trade.
pub async fn wait_for_release(peer: &TestPeer, trade_id: Uuid) -> Result<()> {
    let released = timeout(WAIT_TIMEOUT, async {
        while peer.manager.trade_ids().await.contains(&trade_id) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    released.map_err(|_| anyhow!("Trade {} not released within {:?}", trade_id, WAIT_TIMEOUT))
}

/// Drives both sides through setup and deposit until the deposit is confirmed.
pub async fn run_to_deposit_confirmed(
    maker_trade: &TradeAccess,
    taker_trade: &TradeAccess,
) -> Result<()> {
    wait_for_state(maker_trade, MuSigTradeState::DepositSigned).await?;
    wait_for_state(taker_trade, MuSigTradeState::DepositBroadcast).await?;

    maker_trade.deposit_tx_broadcast().await?;
    maker_trade.deposit_tx_confirmed().await?;
    taker_trade.deposit_tx_confirmed().await?;
    Ok(())
}

/// Continues a confirmed trade until the buyer holds the seller's swap tx signature.
pub async fn run_to_payment_received(buyer: &TradeAccess, seller: &TradeAccess) -> Result<()> {
    buyer.payment_initiated().await?;
    wait_for_state(seller, MuSigTradeState::PaymentStarted).await?;

    seller.payment_receipt_confirmed().await?;
    wait_for_state(buyer, MuSigTradeState::PaymentReceived).await?;
    Ok(())
}
