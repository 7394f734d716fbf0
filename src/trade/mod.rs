mod context;
mod data;
mod event;
mod handlers;
mod messages;
mod model;
mod party;
mod protocol;
mod signer;
mod state;
mod store;
mod terms;
mod trade;

pub use context::{TradeContext, TradeMessageSender};
pub use event::{MuSigTradeEvent, MuSigTradeEventKind};
pub use messages::{
    CloseTradeData, DepositPsbt, MuSigMessage, MuSigMessageKind, NonceShares, PartialSignatures,
    PartialSignaturesMessage, PubKeyShares, RedactedPartialSignatures, SwapTxSignature,
};
pub use model::MuSigTrade;
pub use party::TradeParty;
pub use protocol::{configure, new_protocol_fsm, TradeFsm};
pub use signer::MuSigSigner;
pub use state::MuSigTradeState;
pub use terms::{MuSigOffer, TradeRole, TradeTerms};
pub use trade::{TradeAccess, TradeNotif};

pub(crate) use data::TradeData;
pub(crate) use store::TradeStore;
pub(crate) use trade::Trade;
