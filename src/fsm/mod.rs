mod event;
mod fsm;
mod state;
mod transition;

pub use event::Event;
pub use fsm::{EventKind, Fsm, FsmModel, HandleOutcome, IgnoreReason};
pub use state::{SourceState, State};
pub use transition::{EventHandler, HandlerFactory, Transition, TransitionBuilder};
