mod common;

#[cfg(test)]
mod tests {
    use crusty_musig::{
        testing::{MemoryNetwork, SomeTestParams},
        trade::MuSigTradeState,
    };

    use super::common::{
        new_trade_notif_rx, next_new_trade, run_to_deposit_confirmed, run_to_payment_received,
        some_offer, start_peer, test_config, wait_for_state,
    };

    #[tokio::test]
    async fn test_restore_mid_trade() -> anyhow::Result<()> {
        let _ = tracing_subscriber::fmt::try_init();
        let data_dir = tempfile::tempdir()?;
        let network = MemoryNetwork::new();

        let maker = start_peer(
            &network,
            SomeTestParams::maker_identity(),
            test_config(data_dir.path()),
        )
        .await?;
        let taker = start_peer(
            &network,
            SomeTestParams::taker_identity(),
            test_config(data_dir.path()),
        )
        .await?;
        let mut new_trade_rx = new_trade_notif_rx(&maker).await?;

        let offer = some_offer(&maker, true).await?;
        let taker_trade = taker.manager.take_offer(offer).await?;
        let trade_id = taker_trade.trade_id();
        let maker_trade = next_new_trade(&mut new_trade_rx).await?;
        wait_for_state(&taker_trade, MuSigTradeState::DepositBroadcast).await?;
        let taker_before = taker_trade.query_trade().await?;

        // Taker goes down, maker keeps going and its messages wait in the mailbox
        network.set_online(taker.identity.network_id(), false);
        taker.manager.shutdown().await?;

        maker_trade.deposit_tx_broadcast().await?;
        maker_trade.deposit_tx_confirmed().await?;
        maker_trade.payment_initiated().await?;

        let taker = start_peer(
            &network,
            SomeTestParams::taker_identity(),
            test_config(data_dir.path()),
        )
        .await?;
        assert_eq!(taker.manager.trade_ids().await, vec![trade_id]);
        let taker_trade = taker
            .manager
            .trade(&trade_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("Trade not restored"))?;

        let taker_restored = taker_trade.query_trade().await?;
        assert_eq!(taker_restored, taker_before);

        // PaymentInitiated from the mailbox is backlogged until the deposit confirms
        taker_trade.deposit_tx_confirmed().await?;
        wait_for_state(&taker_trade, MuSigTradeState::PaymentStarted).await?;

        taker_trade.payment_receipt_confirmed().await?;
        wait_for_state(&maker_trade, MuSigTradeState::PaymentReceived).await?;
        maker_trade.close_trade().await?;
        wait_for_state(&maker_trade, MuSigTradeState::Completed).await?;
        wait_for_state(&taker_trade, MuSigTradeState::Completed).await?;

        maker.manager.shutdown().await?;
        taker.manager.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_completed_trade_not_restored() -> anyhow::Result<()> {
        let _ = tracing_subscriber::fmt::try_init();
        let data_dir = tempfile::tempdir()?;
        let network = MemoryNetwork::new();

        let maker = start_peer(
            &network,
            SomeTestParams::maker_identity(),
            test_config(data_dir.path()),
        )
        .await?;
        let taker = start_peer(
            &network,
            SomeTestParams::taker_identity(),
            test_config(data_dir.path()),
        )
        .await?;
        let mut new_trade_rx = new_trade_notif_rx(&maker).await?;

        let offer = some_offer(&maker, true).await?;
        let taker_trade = taker.manager.take_offer(offer).await?;
        let maker_trade = next_new_trade(&mut new_trade_rx).await?;
        run_to_deposit_confirmed(&maker_trade, &taker_trade).await?;
        wait_for_state(&taker_trade, MuSigTradeState::DepositConfirmed).await?;
        run_to_payment_received(&maker_trade, &taker_trade).await?;
        maker_trade.close_trade().await?;
        wait_for_state(&maker_trade, MuSigTradeState::Completed).await?;
        wait_for_state(&taker_trade, MuSigTradeState::Completed).await?;

        maker.manager.shutdown().await?;
        taker.manager.shutdown().await?;

        let maker = start_peer(
            &network,
            SomeTestParams::maker_identity(),
            test_config(data_dir.path()),
        )
        .await?;
        assert!(maker.manager.trade_ids().await.is_empty());
        maker.manager.shutdown().await?;
        Ok(())
    }
}
