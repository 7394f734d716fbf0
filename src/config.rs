use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::common::error::MusigError;

pub const PROTOCOL_VERSION: u8 = 1;

/// Resend policy for ack-requesting messages that have not been confirmed yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResendConfig {
    pub resend_interval_secs: u64,
    pub failed_retry_secs: u64,
    pub max_auto_resends: u32,
    pub max_manual_resends: u32,
    /// How long a message with no automatic resend left stays available for manual ones.
    pub manual_resend_window_secs: u64,
    pub tick_millis: u64,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            resend_interval_secs: 120,
            failed_retry_secs: 15,
            max_auto_resends: 2,
            max_manual_resends: 3,
            manual_resend_window_secs: 24 * 60 * 60,
            tick_millis: 1000,
        }
    }
}

impl ResendConfig {
    pub fn resend_interval(&self) -> Duration {
        Duration::from_secs(self.resend_interval_secs)
    }

    pub fn failed_retry(&self) -> Duration {
        Duration::from_secs(self.failed_retry_secs)
    }

    pub fn manual_resend_window(&self) -> Duration {
        Duration::from_secs(self.manual_resend_window_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub data_dir: PathBuf,
    pub protocol_version: u8,
    pub close_trade_timeout_secs: u64,
    pub backlog_capacity: usize,
    pub pairing_code_validity_secs: u64,
    pub request_channel_size: usize,
    pub resend: ResendConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("musig_data"),
            protocol_version: PROTOCOL_VERSION,
            close_trade_timeout_secs: 24 * 60 * 60,
            backlog_capacity: 32,
            pairing_code_validity_secs: 5 * 60,
            request_channel_size: 100,
            resend: ResendConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, MusigError> {
        let config: ManagerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MusigError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn close_trade_timeout(&self) -> Duration {
        Duration::from_secs(self.close_trade_timeout_secs)
    }

    pub fn pairing_code_validity(&self) -> Duration {
        Duration::from_secs(self.pairing_code_validity_secs)
    }

    pub fn validate(&self) -> Result<(), MusigError> {
        if self.protocol_version == 0 {
            return Err(MusigError::Configuration(
                "protocol_version must be non-zero".to_string(),
            ));
        }
        if self.request_channel_size == 0 {
            return Err(MusigError::Configuration(
                "request_channel_size must be non-zero".to_string(),
            ));
        }
        if self.resend.tick_millis == 0 {
            return Err(MusigError::Configuration(
                "resend.tick_millis must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = ManagerConfig::from_json_str(
            r#"{ "data_dir": "/tmp/musig", "resend": { "max_auto_resends": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/musig"));
        assert_eq!(config.protocol_version, PROTOCOL_VERSION);
        assert_eq!(config.resend.max_auto_resends, 5);
        assert_eq!(config.resend.failed_retry(), Duration::from_secs(15));
        assert_eq!(config.close_trade_timeout(), Duration::from_secs(86400));
    }

    #[test]
    fn test_zero_protocol_version_rejected() {
        let result = ManagerConfig::from_json_str(r#"{ "protocol_version": 0 }"#);
        assert!(matches!(result, Err(MusigError::Configuration(_))));
    }
}
