use std::{fmt::Debug, hash::Hash};

pub trait State: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// A final state permanently stops event processing for the FSM instance.
    fn is_final(&self) -> bool;

    /// Ordering index. Only used to list transitions deterministically.
    fn ordinal(&self) -> u32;
}

/// Source of a transition. `Any` matches every state, but is only consulted after the
/// exact `(state, event kind)` lookup misses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceState<S: State> {
    Any,
    Exact(S),
}

impl<S: State> SourceState<S> {
    pub fn is_any(&self) -> bool {
        matches!(self, SourceState::Any)
    }

    fn sort_key(&self) -> (u8, u32) {
        match self {
            SourceState::Exact(state) => (0, state.ordinal()),
            SourceState::Any => (1, 0),
        }
    }

    pub(crate) fn cmp_ordinal(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
