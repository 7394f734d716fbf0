use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use super::model::MuSigTrade;
use crate::common::{error::MusigError, persist::Persister, types::SerdeGenericTrait};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct TradeDataStore {
    trade: MuSigTrade,
    processed_events: HashSet<String>,
    archived: bool,
}

#[typetag::serde(name = "musig_trade_data")]
impl SerdeGenericTrait for TradeDataStore {
    fn any_ref(&self) -> &dyn std::any::Any {
        self
    }
}

pub(crate) struct TradeData {
    pub(crate) trade_id: Uuid,
    store: Arc<RwLock<TradeDataStore>>,
    persister: Persister,
}

impl TradeData {
    const FILE_SUFFIX: &'static str = "-trade.json";

    pub(crate) fn data_path(dir_path: impl AsRef<Path>, trade_id: Uuid) -> PathBuf {
        dir_path
            .as_ref()
            .join(format!("{}{}", trade_id, Self::FILE_SUFFIX))
    }

    pub(crate) fn is_data_path(path: impl AsRef<Path>) -> bool {
        path.as_ref()
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.ends_with(Self::FILE_SUFFIX))
    }

    pub(crate) fn new(dir_path: impl AsRef<Path>, trade: MuSigTrade) -> Self {
        let trade_id = trade.trade_id;
        let data_path = Self::data_path(dir_path, trade_id);

        let store = TradeDataStore {
            trade,
            processed_events: HashSet::new(),
            archived: false,
        };

        let store = Arc::new(RwLock::new(store));
        let generic_store: Arc<RwLock<dyn SerdeGenericTrait + 'static>> = store.clone();
        let persister = Persister::new(generic_store, data_path);
        persister.queue();

        Self {
            trade_id,
            store,
            persister,
        }
    }

    pub(crate) fn restore(data_path: impl AsRef<Path>) -> Result<(Uuid, Self), MusigError> {
        let json = Persister::restore(&data_path)?;
        let store: TradeDataStore = serde_json::from_str(&json)?;

        let trade_id = store.trade.trade_id;

        let store = Arc::new(RwLock::new(store));
        let generic_store: Arc<RwLock<dyn SerdeGenericTrait + 'static>> = store.clone();
        let persister = Persister::new(generic_store, &data_path);

        let data = Self {
            trade_id,
            store,
            persister,
        };

        Ok((trade_id, data))
    }

    fn read_store(&self) -> RwLockReadGuard<'_, TradeDataStore> {
        match self.store.read() {
            Ok(store) => store,
            Err(error) => {
                panic!("Error reading store - {}", error);
            }
        }
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, TradeDataStore> {
        match self.store.write() {
            Ok(store) => store,
            Err(error) => {
                panic!("Error writing store - {}", error);
            }
        }
    }

    // Getter methods

    pub(crate) fn trade(&self) -> MuSigTrade {
        self.read_store().trade.to_owned()
    }

    pub(crate) fn processed_events(&self) -> HashSet<String> {
        self.read_store().processed_events.to_owned()
    }

    pub(crate) fn archived(&self) -> bool {
        self.read_store().archived
    }

    // Setter methods

    /// Records a committed transition. It is on disk before this returns, so a restart
    /// never replays an event the peer already saw the effects of.
    pub(crate) fn update(&mut self, trade: MuSigTrade, processed_events: HashSet<String>) {
        {
            let mut store = self.write_store();
            store.trade = trade;
            store.processed_events = processed_events;
        }
        if let Some(error) = self.persister.persist_now().err() {
            error!(
                "Trade w/ TradeUUID {} failed to persist, queueing retry - {}",
                self.trade_id, error
            );
            self.persister.queue();
        }
    }

    /// Marks the trade archived on disk and stops persisting it.
    pub(crate) fn archive(self) {
        self.write_store().archived = true;
        if let Some(error) = self.persister.persist_now().err() {
            error!(
                "Trade w/ TradeUUID {} failed to persist archived flag, queueing retry - {}",
                self.trade_id, error
            );
            self.persister.queue();
        }
        self.terminate();
    }

    pub(crate) fn terminate(self) {
        self.persister.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::SomeTestTradeParams,
        trade::{state::MuSigTradeState, terms::TradeRole},
    };

    #[test]
    fn test_update_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let trade = SomeTestTradeParams::some_trade(TradeRole::SellerAsTaker);
        let trade_id = trade.trade_id;

        let mut data = TradeData::new(dir.path(), trade.clone());
        let mut updated = trade.clone();
        updated.state = MuSigTradeState::SetupSent;
        data.update(updated, HashSet::from(["some-message-id".to_string()]));
        data.terminate();

        let data_path = TradeData::data_path(dir.path(), trade_id);
        assert!(TradeData::is_data_path(&data_path));

        let (restored_id, restored) = TradeData::restore(&data_path).unwrap();
        assert_eq!(restored_id, trade_id);
        assert_eq!(restored.trade().state, MuSigTradeState::SetupSent);
        assert!(restored.processed_events().contains("some-message-id"));
        assert!(!restored.archived());
        restored.archive();

        let (_, archived) = TradeData::restore(&data_path).unwrap();
        assert!(archived.archived());
        archived.terminate();
    }
}
