use std::{fmt::Debug, hash::Hash};

pub trait Event: Clone + Debug + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Runtime type of the event, the key used for transition lookup.
    fn kind(&self) -> Self::Kind;

    /// Identity recorded once the event is processed, so replays are dropped.
    /// Events without one are never deduplicated nor deferred.
    fn identity(&self) -> Option<String>;
}
