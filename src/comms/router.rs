use std::collections::{hash_map::Entry, HashMap};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{common::error::MusigError, peer_msg::TradeMessage};

/// Routes inbound trade messages by trade ID. A trade is routed from registration until
/// it reaches a final state. Messages able to open a trade nobody routes yet go to the
/// fallback channel.
pub(super) struct Router {
    trade_tx_map: HashMap<Uuid, mpsc::UnboundedSender<TradeMessage>>,
    fallback_tx: Option<mpsc::UnboundedSender<TradeMessage>>,
}

impl Router {
    pub(super) fn new() -> Self {
        Router {
            trade_tx_map: HashMap::new(),
            fallback_tx: None,
        }
    }

    /// A trade ID is routed to one trade only, a second registration leaves the first
    /// route in place.
    pub(super) fn register_trade_tx(
        &mut self,
        trade_id: Uuid,
        tx: mpsc::UnboundedSender<TradeMessage>,
    ) -> Result<(), MusigError> {
        match self.trade_tx_map.entry(trade_id) {
            Entry::Occupied(_) => Err(MusigError::Simple(format!(
                "TradeUUID {} is already routed",
                trade_id
            ))),
            Entry::Vacant(entry) => {
                debug!("Routing messages for TradeUUID {}", trade_id);
                entry.insert(tx);
                Ok(())
            }
        }
    }

    /// Returns whether the trade was still routed. Routes to trades that went away are
    /// pruned while routing, so an unknown ID is only worth a warning.
    pub(super) fn unregister_trade_tx(&mut self, trade_id: Uuid) -> bool {
        let routed = self.trade_tx_map.remove(&trade_id).is_some();
        if routed {
            debug!("Stopped routing messages for TradeUUID {}", trade_id);
        } else {
            warn!("TradeUUID {} was not routed", trade_id);
        }
        routed
    }

    pub(super) fn set_fallback_tx(
        &mut self,
        tx: Option<mpsc::UnboundedSender<TradeMessage>>,
    ) -> Result<(), MusigError> {
        match (self.fallback_tx.is_some(), tx.is_some()) {
            (true, true) => {
                return Err(MusigError::Simple(
                    "Fallback channel already registered".to_string(),
                ))
            }
            (false, false) => warn!("No fallback channel registered to remove"),
            (_, true) => debug!("Fallback channel registered"),
            (_, false) => debug!("Fallback channel removed"),
        }
        self.fallback_tx = tx;
        Ok(())
    }

    /// Routes by trade ID. Only messages able to open a trade may fall back to the
    /// fallback channel, anything else for an unknown trade is refused.
    pub(super) fn handle_trade_message(&mut self, message: TradeMessage) -> Result<(), MusigError> {
        let trade_id = message.trade_id;
        if let Some(tx) = self.trade_tx_map.get(&trade_id) {
            trace!(
                "Routing message {} to TradeUUID {}",
                message.message_id,
                trade_id
            );
            return match tx.send(message) {
                Ok(()) => Ok(()),
                Err(error) => {
                    warn!("TradeUUID {} stopped taking messages, route removed", trade_id);
                    self.trade_tx_map.remove(&trade_id);
                    Err(error.into())
                }
            };
        }

        if message.payload.opens_trade() {
            if let Some(tx) = &self.fallback_tx {
                tx.send(message)?;
                return Ok(());
            }
        }

        Err(MusigError::Validation(format!(
            "No channel Tx registered for message {} of unknown TradeUUID {}",
            message.message_id, trade_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testing::SomeTestTradeParams, trade::MuSigMessage};

    fn some_setup_message(trade_id: Uuid) -> TradeMessage {
        let mut message = SomeTestTradeParams::some_trade_message();
        message.trade_id = trade_id;
        message
    }

    #[tokio::test]
    async fn test_tx_for_trade_id() {
        let trade_id = SomeTestTradeParams::some_uuid();
        let mut router = Router::new();
        let (trade_tx, mut trade_rx) = mpsc::unbounded_channel::<TradeMessage>();
        let (fallback_tx, mut fallback_rx) = mpsc::unbounded_channel::<TradeMessage>();
        router.register_trade_tx(trade_id, trade_tx).unwrap();
        router.set_fallback_tx(Some(fallback_tx)).unwrap();

        router
            .handle_trade_message(some_setup_message(trade_id))
            .unwrap();

        let mut trade_count = 0;
        let mut fallback_count = 0;
        while let Ok(message) = trade_rx.try_recv() {
            assert_eq!(message.trade_id, trade_id);
            trade_count += 1;
        }
        while fallback_rx.try_recv().is_ok() {
            fallback_count += 1;
        }

        assert_eq!(1, trade_count);
        assert_eq!(0, fallback_count);
    }

    #[tokio::test]
    async fn test_trade_opening_message_fallback_tx() {
        let mut router = Router::new();
        let (trade_tx, mut trade_rx) = mpsc::unbounded_channel::<TradeMessage>();
        let (fallback_tx, mut fallback_rx) = mpsc::unbounded_channel::<TradeMessage>();
        router.register_trade_tx(Uuid::new_v4(), trade_tx).unwrap();
        router.set_fallback_tx(Some(fallback_tx)).unwrap();

        let message = some_setup_message(SomeTestTradeParams::some_uuid());
        assert!(message.payload.opens_trade());
        router.handle_trade_message(message).unwrap();

        assert!(trade_rx.try_recv().is_err());
        assert!(fallback_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_trade_mid_protocol_message_dropped() {
        let mut router = Router::new();
        let (fallback_tx, mut fallback_rx) = mpsc::unbounded_channel::<TradeMessage>();
        router.set_fallback_tx(Some(fallback_tx)).unwrap();

        let mut message = some_setup_message(SomeTestTradeParams::some_uuid());
        message.payload = MuSigMessage::PaymentInitiated;

        let result = router.handle_trade_message(message);
        assert!(matches!(result, Err(MusigError::Validation(_))));
        assert!(fallback_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_matching_registered_tx() {
        let mut router = Router::new();
        let (trade_tx, mut trade_rx) = mpsc::unbounded_channel::<TradeMessage>();
        router.register_trade_tx(Uuid::new_v4(), trade_tx).unwrap();

        let result =
            router.handle_trade_message(some_setup_message(SomeTestTradeParams::some_uuid()));

        assert!(result.is_err());
        assert!(trade_rx.try_recv().is_err());
    }

    #[test]
    fn test_double_registration_keeps_first_route() {
        let trade_id = SomeTestTradeParams::some_uuid();
        let mut router = Router::new();
        let (trade_tx, mut trade_rx) = mpsc::unbounded_channel::<TradeMessage>();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel::<TradeMessage>();
        router.register_trade_tx(trade_id, trade_tx).unwrap();
        assert!(router.register_trade_tx(trade_id, other_tx).is_err());

        router
            .handle_trade_message(some_setup_message(trade_id))
            .unwrap();
        assert!(trade_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());

        assert!(router.unregister_trade_tx(trade_id));
        assert!(!router.unregister_trade_tx(trade_id));
    }

    #[test]
    fn test_route_to_closed_trade_is_pruned() {
        let trade_id = SomeTestTradeParams::some_uuid();
        let mut router = Router::new();
        let (trade_tx, trade_rx) = mpsc::unbounded_channel::<TradeMessage>();
        router.register_trade_tx(trade_id, trade_tx).unwrap();
        drop(trade_rx);

        assert!(router
            .handle_trade_message(some_setup_message(trade_id))
            .is_err());
        assert!(!router.unregister_trade_tx(trade_id));
    }

    #[test]
    fn test_second_fallback_rejected() {
        let mut router = Router::new();
        let (fallback_tx, _fallback_rx) = mpsc::unbounded_channel::<TradeMessage>();
        router.set_fallback_tx(Some(fallback_tx.clone())).unwrap();
        assert!(router.set_fallback_tx(Some(fallback_tx)).is_err());
        router.set_fallback_tx(None).unwrap();
        router.set_fallback_tx(None).unwrap();
    }
}
