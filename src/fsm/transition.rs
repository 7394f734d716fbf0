use std::sync::Arc;

use async_trait::async_trait;

use super::{
    fsm::{EventKind, Fsm, FsmModel},
    state::SourceState,
};
use crate::common::error::MusigError;

/// Work performed when a transition fires.
///
/// The handler receives a draft copy of the model. Its mutations are only committed,
/// together with the target state, if it returns `Ok`.
#[async_trait]
pub trait EventHandler<M: FsmModel>: Send + Sync {
    async fn handle(
        &self,
        model: &mut M,
        ctx: &M::Context,
        event: &M::Event,
    ) -> Result<(), MusigError>;
}

pub type HandlerFactory<M> = Arc<dyn Fn() -> Box<dyn EventHandler<M>> + Send + Sync>;

pub struct Transition<M: FsmModel> {
    pub(crate) source: SourceState<M::State>,
    pub(crate) event_kind: EventKind<M>,
    pub(crate) factory: HandlerFactory<M>,
    pub(crate) target: M::State,
}

impl<M: FsmModel> Clone for Transition<M> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            event_kind: self.event_kind,
            factory: self.factory.clone(),
            target: self.target,
        }
    }
}

pub struct TransitionBuilder<'a, M: FsmModel> {
    fsm: &'a mut Fsm<M>,
    sources: Vec<SourceState<M::State>>,
    event_kind: Option<EventKind<M>>,
    factory: Option<HandlerFactory<M>>,
}

impl<'a, M: FsmModel> TransitionBuilder<'a, M> {
    pub(crate) fn new(fsm: &'a mut Fsm<M>, sources: Vec<SourceState<M::State>>) -> Self {
        Self {
            fsm,
            sources,
            event_kind: None,
            factory: None,
        }
    }

    pub fn on(mut self, event_kind: EventKind<M>) -> Self {
        self.event_kind = Some(event_kind);
        self
    }

    /// Registers a handler type. A fresh instance is created for every invocation.
    pub fn run<H>(mut self) -> Self
    where
        H: EventHandler<M> + Default + 'static,
    {
        self.factory = Some(Arc::new(|| {
            Box::new(H::default()) as Box<dyn EventHandler<M>>
        }));
        self
    }

    pub fn run_with<H>(mut self, handler: H) -> Self
    where
        H: EventHandler<M> + Clone + 'static,
    {
        self.factory = Some(Arc::new(move || {
            Box::new(handler.clone()) as Box<dyn EventHandler<M>>
        }));
        self
    }

    pub fn to(self, target: M::State) -> Result<(), MusigError> {
        let Some(event_kind) = self.event_kind else {
            return Err(MusigError::Configuration(format!(
                "Transition to {:?} has no event kind",
                target
            )));
        };

        let Some(factory) = self.factory else {
            return Err(MusigError::Configuration(format!(
                "Transition on {:?} to {:?} has no handler",
                event_kind, target
            )));
        };

        if self.sources.is_empty() {
            return Err(MusigError::Configuration(format!(
                "Transition on {:?} to {:?} has no source state",
                event_kind, target
            )));
        }

        let transitions: Vec<Transition<M>> = self
            .sources
            .into_iter()
            .map(|source| Transition {
                source,
                event_kind,
                factory: factory.clone(),
                target,
            })
            .collect();

        self.fsm.add_transitions(transitions)
    }
}

impl<M: FsmModel> Transition<M> {
    pub(crate) fn validate(&self) -> Result<(), MusigError> {
        if self.source == SourceState::Exact(self.target) {
            return Err(MusigError::Configuration(format!(
                "Transition on {:?} must not have source equal to target {:?}",
                self.event_kind, self.target
            )));
        }
        Ok(())
    }
}

