use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::status::MessageDeliveryStatus;
use crate::common::{error::MusigError, types::MessageId};

/// Durable backing of the delivery tracker. `persist` must not return before the
/// record is on disk.
pub trait DeliveryStatusStore: Send + Sync {
    fn load(&self) -> Result<HashMap<MessageId, MessageDeliveryStatus>, MusigError>;
    fn persist(&self, message_id: &str, status: MessageDeliveryStatus) -> Result<(), MusigError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct DeliveryRecord {
    message_id: MessageId,
    status: MessageDeliveryStatus,
}

/// Append-only JSON lines journal. Later lines supersede earlier ones for the same
/// message id, and the journal is compacted each time it is loaded.
pub struct FileDeliveryStatusStore {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileDeliveryStatusStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    fn lock_file(&self) -> Result<MutexGuard<'_, Option<File>>, MusigError> {
        self.file.lock().map_err(|error| {
            MusigError::Simple(format!("Delivery status journal lock poisoned - {}", error))
        })
    }

    fn open_append(&self) -> Result<File, MusigError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(file)
    }

    fn compact(&self, entries: &HashMap<MessageId, MessageDeliveryStatus>) -> Result<(), MusigError> {
        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut file = File::create(&tmp_path)?;
        for (message_id, status) in entries {
            let record = DeliveryRecord {
                message_id: message_id.clone(),
                status: *status,
            };
            writeln!(file, "{}", serde_json::to_string(&record)?)?;
        }
        file.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl DeliveryStatusStore for FileDeliveryStatusStore {
    fn load(&self) -> Result<HashMap<MessageId, MessageDeliveryStatus>, MusigError> {
        let mut file_guard = self.lock_file()?;
        let mut entries = HashMap::new();

        if self.path.exists() {
            let reader = BufReader::new(File::open(&self.path)?);
            for line in reader.lines() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<DeliveryRecord>(line) {
                    Ok(record) => {
                        entries.insert(record.message_id, record.status);
                    }
                    Err(error) => {
                        // A torn final line after a crash is expected, skip it
                        warn!(
                            "Skipping unreadable delivery status record in {} - {}",
                            self.path.display(),
                            error
                        );
                    }
                }
            }
            self.compact(&entries)?;
        }

        debug!(
            "Loaded {} delivery status entries from {}",
            entries.len(),
            self.path.display()
        );
        *file_guard = Some(self.open_append()?);
        Ok(entries)
    }

    fn persist(&self, message_id: &str, status: MessageDeliveryStatus) -> Result<(), MusigError> {
        let mut file_guard = self.lock_file()?;
        if file_guard.is_none() {
            *file_guard = Some(self.open_append()?);
        }
        let Some(file) = file_guard.as_mut() else {
            return Err(MusigError::Simple(
                "Delivery status journal not open".to_string(),
            ));
        };

        let record = DeliveryRecord {
            message_id: message_id.to_string(),
            status,
        };
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        file.sync_data()?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDeliveryStatusStore {
    entries: Mutex<HashMap<MessageId, MessageDeliveryStatus>>,
}

impl MemoryDeliveryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<MessageId, MessageDeliveryStatus>>, MusigError> {
        self.entries.lock().map_err(|error| {
            MusigError::Simple(format!("Delivery status entries lock poisoned - {}", error))
        })
    }
}

impl DeliveryStatusStore for MemoryDeliveryStatusStore {
    fn load(&self) -> Result<HashMap<MessageId, MessageDeliveryStatus>, MusigError> {
        Ok(self.lock_entries()?.clone())
    }

    fn persist(&self, message_id: &str, status: MessageDeliveryStatus) -> Result<(), MusigError> {
        self.lock_entries()?.insert(message_id.to_string(), status);
        Ok(())
    }
}
