use std::{error::Error, fmt};

use tokio::sync::{mpsc, oneshot};

use crate::{common::types::MessageId, delivery::MessageDeliveryStatus};

#[derive(Debug)]
pub enum MusigError {
    Simple(String),
    Configuration(String),
    Validation(String),
    Handler(String),
    DeliveryFailure {
        message_id: MessageId,
        status: Option<MessageDeliveryStatus>,
    },
    Codec(String),
    SerdesJson(serde_json::Error),
    Io(std::io::Error),
    MpscSend(String),
    OneshotRecv(String),
}

impl MusigError {
    pub fn is_validation(&self) -> bool {
        matches!(self, MusigError::Validation(_))
    }
}

impl Error for MusigError {}

impl fmt::Display for MusigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let error_string = match self {
            MusigError::Simple(msg) => format!("MuSig-Error | Other - {}", msg),
            MusigError::Configuration(msg) => {
                format!("MuSig-Error | Configuration - {}", msg)
            }
            MusigError::Validation(msg) => format!("MuSig-Error | Validation - {}", msg),
            MusigError::Handler(msg) => format!("MuSig-Error | Handler - {}", msg),
            MusigError::DeliveryFailure { message_id, status } => {
                let status = match status {
                    Some(status) => status.to_string(),
                    None => "untracked".to_string(),
                };
                format!(
                    "MuSig-Error | DeliveryFailure - Message {} not acknowledged, last status {}",
                    message_id, status
                )
            }
            MusigError::Codec(msg) => format!("MuSig-Error | Codec - {}", msg),
            MusigError::SerdesJson(err) => {
                format!("MuSig-Error | SerdesJsonError - {}", err)
            }
            MusigError::Io(err) => format!("MuSig-Error | IoError - {}", err),
            MusigError::MpscSend(msg) => format!("MuSig-Error | MpscSendError - {}", msg),
            MusigError::OneshotRecv(msg) => {
                format!("MuSig-Error | OneshotRecvError - {}", msg)
            }
        };
        write!(f, "{}", error_string)
    }
}

impl From<serde_json::Error> for MusigError {
    fn from(e: serde_json::Error) -> MusigError {
        MusigError::SerdesJson(e)
    }
}

impl From<std::io::Error> for MusigError {
    fn from(e: std::io::Error) -> MusigError {
        MusigError::Io(e)
    }
}

impl<T> From<mpsc::error::SendError<T>> for MusigError {
    fn from(e: mpsc::error::SendError<T>) -> MusigError {
        MusigError::MpscSend(e.to_string())
    }
}

impl From<oneshot::error::RecvError> for MusigError {
    fn from(e: oneshot::error::RecvError) -> MusigError {
        MusigError::OneshotRecv(e.to_string())
    }
}
