use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, TrySendError},
        Arc, Mutex, RwLock,
    },
};

use tracing::{debug, error, trace};

use crate::common::{error::MusigError, types::SerdeGenericTrait};

enum PersisterMsg {
    Persist,
    Close,
}

/// Writes a JSON snapshot of a shared store to disk from a dedicated thread.
///
/// `queue()` coalesces bursts of updates, since the channel only ever holds one pending
/// request and a snapshot always reflects the latest store content.
pub(crate) struct Persister {
    store: Arc<RwLock<dyn SerdeGenericTrait>>,
    data_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    persist_tx: mpsc::SyncSender<PersisterMsg>,
    task_handle: std::thread::JoinHandle<()>,
}

impl Persister {
    pub(crate) fn restore(data_path: impl AsRef<Path>) -> Result<String, MusigError> {
        let json: String = fs::read_to_string(data_path.as_ref())?;
        Ok(json)
    }

    pub(crate) fn new(
        store: Arc<RwLock<dyn SerdeGenericTrait>>,
        data_path: impl AsRef<Path>,
    ) -> Self {
        let data_path = data_path.as_ref().to_path_buf();
        let write_lock = Arc::new(Mutex::new(()));
        let (persist_tx, task_handle) =
            Self::setup_persistence(store.clone(), data_path.clone(), write_lock.clone());

        Self {
            store,
            data_path,
            write_lock,
            persist_tx,
            task_handle,
        }
    }

    fn setup_persistence(
        store: Arc<RwLock<dyn SerdeGenericTrait>>,
        data_path: PathBuf,
        write_lock: Arc<Mutex<()>>,
    ) -> (mpsc::SyncSender<PersisterMsg>, std::thread::JoinHandle<()>) {
        let (persist_tx, persist_rx) = mpsc::sync_channel(1);
        let task_handle = std::thread::spawn(move || {
            loop {
                match persist_rx.recv() {
                    Ok(PersisterMsg::Persist) => {
                        if let Some(error) = Self::persist(&store, &data_path, &write_lock).err() {
                            error!(
                                "Error persisting data to path {} - {}",
                                data_path.display(),
                                error
                            );
                        }
                    }
                    Ok(PersisterMsg::Close) => break,
                    Err(err) => {
                        error!("Persistance channel recv Error - {}", err);
                        break;
                    }
                }
            }
            debug!("Persistence thread for {} exiting", data_path.display());
        });
        (persist_tx, task_handle)
    }

    fn persist(
        store: &Arc<RwLock<dyn SerdeGenericTrait>>,
        data_path: impl AsRef<Path>,
        write_lock: &Mutex<()>,
    ) -> Result<(), MusigError> {
        // Snapshot and write under one lock so an older snapshot never lands last
        let _guard = write_lock
            .lock()
            .map_err(|error| MusigError::Simple(format!("Error locking persister - {}", error)))?;
        let json = {
            let store = store
                .read()
                .map_err(|error| MusigError::Simple(format!("Error reading store - {}", error)))?;
            serde_json::to_string(&*store)?
        };

        trace!(
            "Persisting JSON to path: {} - {}",
            data_path.as_ref().display(),
            json
        );

        // Write then rename so a crash mid-write never leaves a truncated snapshot
        let tmp_path = data_path.as_ref().with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, data_path.as_ref())?;
        Ok(())
    }

    pub(crate) fn queue(&self) {
        match self.persist_tx.try_send(PersisterMsg::Persist) {
            Ok(_) => {}
            Err(error) => match error {
                TrySendError::Full(_) => {
                    trace!("Persistence channel full")
                }
                TrySendError::Disconnected(_) => {
                    error!("Persistence channel disconnected")
                }
            },
        }
    }

    /// Persists on the calling thread, for updates that must be on disk before returning.
    pub(crate) fn persist_now(&self) -> Result<(), MusigError> {
        Self::persist(&self.store, &self.data_path, &self.write_lock)
    }

    pub(crate) fn terminate(self) {
        if let Some(error) = self.persist_tx.send(PersisterMsg::Close).err() {
            error!("Error closing persistence channel - {}", error);
        }
        if let Some(error) = self.task_handle.join().err() {
            error!("Error terminating persistence thread - {:?}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct SomeStore {
        counter: u32,
    }

    #[typetag::serde(name = "musig_some_store")]
    impl SerdeGenericTrait for SomeStore {
        fn any_ref(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_persist_now_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("some-store.json");

        let store = Arc::new(RwLock::new(SomeStore { counter: 7 }));
        let generic_store: Arc<RwLock<dyn SerdeGenericTrait>> = store.clone();
        let persister = Persister::new(generic_store, &data_path);

        store.write().unwrap().counter = 8;
        persister.persist_now().unwrap();
        persister.terminate();

        let json = Persister::restore(&data_path).unwrap();
        assert!(json.contains("musig_some_store"));
        let restored: SomeStore = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.counter, 8);
    }
}
