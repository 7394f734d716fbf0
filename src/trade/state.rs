use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

use crate::fsm::State;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MuSigTradeState {
    Init,
    SetupSent,
    SetupReceived,
    DepositSigned,
    DepositBroadcast,
    DepositConfirmed,
    PaymentStarted,
    PaymentReceived,
    CooperativeClosure,
    Completed,
    ForceClosed,
    Failed,
}

impl State for MuSigTradeState {
    fn is_final(&self) -> bool {
        matches!(
            self,
            MuSigTradeState::Completed | MuSigTradeState::ForceClosed | MuSigTradeState::Failed
        )
    }

    fn ordinal(&self) -> u32 {
        *self as u32
    }
}
