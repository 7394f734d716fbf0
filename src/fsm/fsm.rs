use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    event::Event,
    state::{SourceState, State},
    transition::{Transition, TransitionBuilder},
};
use crate::common::error::MusigError;

pub type EventKind<M> = <<M as FsmModel>::Event as Event>::Kind;

/// The aggregate an [`Fsm`] drives.
pub trait FsmModel: Clone + Send + Sync + 'static {
    type State: State;
    type Event: Event;
    type Context: Send + Sync;

    fn state(&self) -> Self::State;
    fn set_state(&mut self, state: Self::State);

    /// Prefix for log lines about this instance.
    fn label(&self) -> String {
        "FSM".to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    FinalState,
    Duplicate,
    NoTransition,
}

#[derive(Debug)]
pub enum HandleOutcome<S> {
    Transitioned {
        from: S,
        to: S,
        replayed: usize,
        replay_errors: Vec<MusigError>,
    },
    Deferred,
    Ignored(IgnoreReason),
}

impl<S> HandleOutcome<S> {
    pub fn is_transitioned(&self) -> bool {
        matches!(self, HandleOutcome::Transitioned { .. })
    }
}

pub struct Fsm<M: FsmModel> {
    model: M,
    transitions: HashMap<(SourceState<M::State>, EventKind<M>), Transition<M>>,
    processed_events: HashSet<String>,
    backlog: VecDeque<M::Event>,
    backlog_capacity: usize,
    state_tx: watch::Sender<M::State>,
    dropped_events: u64,
}

impl<M: FsmModel> Fsm<M> {
    pub const DEFAULT_BACKLOG_CAPACITY: usize = 32;

    pub fn new(model: M) -> Self {
        let (state_tx, _) = watch::channel(model.state());
        Self {
            model,
            transitions: HashMap::new(),
            processed_events: HashSet::new(),
            backlog: VecDeque::new(),
            backlog_capacity: Self::DEFAULT_BACKLOG_CAPACITY,
            state_tx,
            dropped_events: 0,
        }
    }

    pub fn with_backlog_capacity(mut self, backlog_capacity: usize) -> Self {
        self.backlog_capacity = backlog_capacity;
        self
    }

    // Configuration

    pub fn from(&mut self, state: M::State) -> TransitionBuilder<'_, M> {
        TransitionBuilder::new(self, vec![SourceState::Exact(state)])
    }

    pub fn from_any(&mut self) -> TransitionBuilder<'_, M> {
        TransitionBuilder::new(self, vec![SourceState::Any])
    }

    pub fn from_states(&mut self, states: &[M::State]) -> TransitionBuilder<'_, M> {
        let sources = states.iter().map(|state| SourceState::Exact(*state)).collect();
        TransitionBuilder::new(self, sources)
    }

    pub(crate) fn add_transitions(
        &mut self,
        transitions: Vec<Transition<M>>,
    ) -> Result<(), MusigError> {
        for transition in transitions.iter() {
            transition.validate()?;
            let key = (transition.source, transition.event_kind);
            if self.transitions.contains_key(&key) {
                return Err(MusigError::Configuration(format!(
                    "{} already has a transition from {:?} on {:?}",
                    self.model.label(),
                    transition.source,
                    transition.event_kind
                )));
            }
        }

        for transition in transitions {
            let key = (transition.source, transition.event_kind);
            self.transitions.insert(key, transition);
        }
        Ok(())
    }

    // Accessors

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn state(&self) -> M::State {
        self.model.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<M::State> {
        self.state_tx.subscribe()
    }

    pub fn processed_events(&self) -> &HashSet<String> {
        &self.processed_events
    }

    pub fn restore_processed_events(&mut self, identities: impl IntoIterator<Item = String>) {
        self.processed_events.extend(identities);
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Events dropped because no transition could ever apply to them.
    pub fn dropped_event_count(&self) -> u64 {
        self.dropped_events
    }

    pub fn transitions(&self) -> Vec<(SourceState<M::State>, EventKind<M>, M::State)> {
        let mut transitions: Vec<_> = self
            .transitions
            .values()
            .map(|transition| (transition.source, transition.event_kind, transition.target))
            .collect();
        transitions.sort_by(|a, b| {
            a.0.cmp_ordinal(&b.0)
                .then(a.2.ordinal().cmp(&b.2.ordinal()))
                .then(format!("{:?}", a.1).cmp(&format!("{:?}", b.1)))
        });
        transitions
    }

    // Event Handling

    pub async fn handle(
        &mut self,
        ctx: &M::Context,
        event: M::Event,
    ) -> Result<HandleOutcome<M::State>, MusigError> {
        let from = self.state();

        if from.is_final() {
            debug!(
                "{} in final state {:?} dropped event {:?}",
                self.model.label(),
                from,
                event.kind()
            );
            return Ok(HandleOutcome::Ignored(IgnoreReason::FinalState));
        }

        if self.is_processed(&event) {
            debug!(
                "{} already processed event {:?}, dropping replay",
                self.model.label(),
                event.identity()
            );
            return Ok(HandleOutcome::Ignored(IgnoreReason::Duplicate));
        }

        let Some(transition) = self.find_transition(from, event.kind()) else {
            return Ok(self.defer_or_drop(event));
        };

        self.apply(ctx, &event, transition).await?;
        let (replayed, replay_errors) = self.replay_backlog(ctx).await;

        Ok(HandleOutcome::Transitioned {
            from,
            to: self.state(),
            replayed,
            replay_errors,
        })
    }

    fn is_processed(&self, event: &M::Event) -> bool {
        match event.identity() {
            Some(identity) => self.processed_events.contains(&identity),
            None => false,
        }
    }

    fn find_transition(&self, state: M::State, kind: EventKind<M>) -> Option<Transition<M>> {
        self.transitions
            .get(&(SourceState::Exact(state), kind))
            .or_else(|| self.transitions.get(&(SourceState::Any, kind)))
            .cloned()
    }

    fn defer_or_drop(&mut self, event: M::Event) -> HandleOutcome<M::State> {
        let kind = event.kind();
        let state = self.state();
        let known_kind = self.transitions.keys().any(|(_, event_kind)| *event_kind == kind);

        if known_kind && event.identity().is_some() && self.backlog_capacity > 0 {
            let identity = event.identity();
            if !self.backlog.iter().any(|queued| queued.identity() == identity) {
                if self.backlog.len() >= self.backlog_capacity {
                    if let Some(evicted) = self.backlog.pop_front() {
                        self.dropped_events += 1;
                        warn!(
                            "{} backlog full, evicted event {:?} with identity {:?}",
                            self.model.label(),
                            evicted.kind(),
                            evicted.identity()
                        );
                    }
                }
                debug!(
                    "{} deferring event {:?} received in state {:?}",
                    self.model.label(),
                    kind,
                    state
                );
                self.backlog.push_back(event);
            }
            return HandleOutcome::Deferred;
        }

        self.dropped_events += 1;
        warn!(
            "{} has no transition from {:?} on {:?}, event dropped ({} dropped so far)",
            self.model.label(),
            state,
            kind,
            self.dropped_events
        );
        HandleOutcome::Ignored(IgnoreReason::NoTransition)
    }

    async fn apply(
        &mut self,
        ctx: &M::Context,
        event: &M::Event,
        transition: Transition<M>,
    ) -> Result<(), MusigError> {
        let from = self.state();
        let handler = (transition.factory)();
        let mut draft = self.model.clone();

        if let Err(error) = handler.handle(&mut draft, ctx, event).await {
            warn!(
                "{} handler for {:?} in state {:?} failed - {}",
                self.model.label(),
                transition.event_kind,
                from,
                error
            );
            return Err(error);
        }

        draft.set_state(transition.target);
        self.model = draft;
        if let Some(identity) = event.identity() {
            self.processed_events.insert(identity);
        }
        self.state_tx.send_replace(transition.target);

        info!(
            "{} transitioned {:?} -> {:?} on {:?}",
            self.model.label(),
            from,
            transition.target,
            transition.event_kind
        );

        if transition.target.is_final() && !self.backlog.is_empty() {
            debug!(
                "{} reached final state, discarding {} deferred events",
                self.model.label(),
                self.backlog.len()
            );
            self.backlog.clear();
        }
        Ok(())
    }

    async fn replay_backlog(&mut self, ctx: &M::Context) -> (usize, Vec<MusigError>) {
        let mut replayed = 0;
        let mut replay_errors = Vec::new();

        loop {
            let state = self.state();
            if state.is_final() {
                break;
            }

            let next = self.backlog.iter().enumerate().find_map(|(index, event)| {
                self.find_transition(state, event.kind())
                    .map(|transition| (index, transition))
            });
            let Some((index, transition)) = next else {
                break;
            };
            let Some(event) = self.backlog.remove(index) else {
                break;
            };
            if self.is_processed(&event) {
                continue;
            }

            match self.apply(ctx, &event, transition).await {
                Ok(()) => replayed += 1,
                Err(error) => replay_errors.push(error),
            }
        }
        (replayed, replay_errors)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::fsm::EventHandler;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    enum SomeState {
        #[default]
        S0,
        S1,
        S2,
        S3,
        Done,
        Failed,
    }

    impl State for SomeState {
        fn is_final(&self) -> bool {
            matches!(self, SomeState::Done | SomeState::Failed)
        }

        fn ordinal(&self) -> u32 {
            *self as u32
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum SomeKind {
        E1,
        E2,
        E3,
        Fail,
        Boom,
        Unknown,
    }

    #[derive(Clone, Debug)]
    struct SomeEvent {
        kind: SomeKind,
        id: Option<String>,
    }

    impl SomeEvent {
        fn with_id(kind: SomeKind, id: &str) -> Self {
            Self {
                kind,
                id: Some(id.to_string()),
            }
        }

        fn internal(kind: SomeKind) -> Self {
            Self { kind, id: None }
        }
    }

    impl Event for SomeEvent {
        type Kind = SomeKind;

        fn kind(&self) -> SomeKind {
            self.kind
        }

        fn identity(&self) -> Option<String> {
            self.id.clone()
        }
    }

    #[derive(Clone, Debug, Default)]
    struct SomeModel {
        state: SomeState,
        handled: Vec<SomeKind>,
    }

    impl FsmModel for SomeModel {
        type State = SomeState;
        type Event = SomeEvent;
        type Context = SomeContext;

        fn state(&self) -> SomeState {
            self.state
        }

        fn set_state(&mut self, state: SomeState) {
            self.state = state;
        }
    }

    #[derive(Default)]
    struct SomeContext {
        invocations: Mutex<Vec<SomeKind>>,
    }

    impl SomeContext {
        fn invocations(&self) -> Vec<SomeKind> {
            self.invocations.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingHandler;

    #[async_trait]
    impl EventHandler<SomeModel> for RecordingHandler {
        async fn handle(
            &self,
            model: &mut SomeModel,
            ctx: &SomeContext,
            event: &SomeEvent,
        ) -> Result<(), MusigError> {
            ctx.invocations.lock().unwrap().push(event.kind);
            model.handled.push(event.kind);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailingHandler;

    #[async_trait]
    impl EventHandler<SomeModel> for FailingHandler {
        async fn handle(
            &self,
            model: &mut SomeModel,
            ctx: &SomeContext,
            event: &SomeEvent,
        ) -> Result<(), MusigError> {
            ctx.invocations.lock().unwrap().push(event.kind);
            model.handled.push(event.kind);
            Err(MusigError::Handler("collaborator unavailable".to_string()))
        }
    }

    fn some_fsm() -> Fsm<SomeModel> {
        let mut fsm = Fsm::new(SomeModel::default());
        fsm.from(SomeState::S0)
            .on(SomeKind::E1)
            .run::<RecordingHandler>()
            .to(SomeState::S1)
            .unwrap();
        fsm.from(SomeState::S1)
            .on(SomeKind::E2)
            .run::<RecordingHandler>()
            .to(SomeState::S2)
            .unwrap();
        fsm.from(SomeState::S2)
            .on(SomeKind::E3)
            .run::<RecordingHandler>()
            .to(SomeState::S3)
            .unwrap();
        fsm.from(SomeState::S0)
            .on(SomeKind::Boom)
            .run::<FailingHandler>()
            .to(SomeState::S1)
            .unwrap();
        fsm.from_any()
            .on(SomeKind::Fail)
            .run::<RecordingHandler>()
            .to(SomeState::Failed)
            .unwrap();
        fsm
    }

    #[tokio::test]
    async fn test_registered_transitions_are_followed() {
        let ctx = SomeContext::default();
        let mut fsm = some_fsm();

        for (kind, id) in [(SomeKind::E1, "a"), (SomeKind::E2, "b"), (SomeKind::E3, "c")] {
            let outcome = fsm.handle(&ctx, SomeEvent::with_id(kind, id)).await.unwrap();
            assert!(outcome.is_transitioned());
        }

        assert_eq!(fsm.state(), SomeState::S3);
        assert_eq!(
            ctx.invocations(),
            vec![SomeKind::E1, SomeKind::E2, SomeKind::E3]
        );
        assert_eq!(fsm.model().handled.len(), 3);
    }

    #[tokio::test]
    async fn test_unmatched_event_leaves_state_unchanged() {
        let ctx = SomeContext::default();
        let mut fsm = some_fsm();

        let outcome = fsm
            .handle(&ctx, SomeEvent::with_id(SomeKind::Unknown, "x"))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            HandleOutcome::Ignored(IgnoreReason::NoTransition)
        ));
        assert_eq!(fsm.state(), SomeState::S0);
        assert!(ctx.invocations().is_empty());
        assert!(fsm.model().handled.is_empty());
        assert_eq!(fsm.dropped_event_count(), 1);
    }

    #[tokio::test]
    async fn test_internal_event_out_of_place_is_dropped_not_deferred() {
        let ctx = SomeContext::default();
        let mut fsm = some_fsm();

        let outcome = fsm
            .handle(&ctx, SomeEvent::internal(SomeKind::E2))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            HandleOutcome::Ignored(IgnoreReason::NoTransition)
        ));
        assert_eq!(fsm.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_final_state_is_noop() {
        let ctx = SomeContext::default();
        let mut fsm = some_fsm();

        fsm.handle(&ctx, SomeEvent::internal(SomeKind::Fail))
            .await
            .unwrap();
        assert_eq!(fsm.state(), SomeState::Failed);

        for kind in [SomeKind::E1, SomeKind::Fail, SomeKind::Unknown] {
            let outcome = fsm.handle(&ctx, SomeEvent::with_id(kind, "late")).await.unwrap();
            assert!(matches!(
                outcome,
                HandleOutcome::Ignored(IgnoreReason::FinalState)
            ));
        }
        assert_eq!(fsm.state(), SomeState::Failed);
        assert_eq!(ctx.invocations(), vec![SomeKind::Fail]);
        assert_eq!(fsm.dropped_event_count(), 0);
    }

    #[tokio::test]
    async fn test_replayed_event_is_dropped() {
        let ctx = SomeContext::default();
        let mut fsm = some_fsm();

        let first = fsm
            .handle(&ctx, SomeEvent::with_id(SomeKind::E1, "m1"))
            .await
            .unwrap();
        let second = fsm
            .handle(&ctx, SomeEvent::with_id(SomeKind::E1, "m1"))
            .await
            .unwrap();

        assert!(first.is_transitioned());
        assert!(matches!(
            second,
            HandleOutcome::Ignored(IgnoreReason::Duplicate)
        ));
        assert_eq!(ctx.invocations(), vec![SomeKind::E1]);
        assert!(fsm.processed_events().contains("m1"));
    }

    #[tokio::test]
    async fn test_out_of_order_events_are_replayed() {
        let ctx = SomeContext::default();
        let mut fsm = some_fsm();

        let e3 = fsm
            .handle(&ctx, SomeEvent::with_id(SomeKind::E3, "c"))
            .await
            .unwrap();
        let e2 = fsm
            .handle(&ctx, SomeEvent::with_id(SomeKind::E2, "b"))
            .await
            .unwrap();
        assert!(matches!(e3, HandleOutcome::Deferred));
        assert!(matches!(e2, HandleOutcome::Deferred));
        assert_eq!(fsm.state(), SomeState::S0);
        assert_eq!(fsm.backlog_len(), 2);

        let outcome = fsm
            .handle(&ctx, SomeEvent::with_id(SomeKind::E1, "a"))
            .await
            .unwrap();

        match outcome {
            HandleOutcome::Transitioned {
                from,
                to,
                replayed,
                replay_errors,
            } => {
                assert_eq!(from, SomeState::S0);
                assert_eq!(to, SomeState::S3);
                assert_eq!(replayed, 2);
                assert!(replay_errors.is_empty());
            }
            other => panic!("Unexpected outcome {:?}", other),
        }
        assert_eq!(fsm.backlog_len(), 0);
        assert_eq!(
            ctx.invocations(),
            vec![SomeKind::E1, SomeKind::E2, SomeKind::E3]
        );
    }

    #[tokio::test]
    async fn test_handler_error_keeps_model_untouched() {
        let ctx = SomeContext::default();
        let mut fsm = some_fsm();

        let result = fsm
            .handle(&ctx, SomeEvent::with_id(SomeKind::Boom, "boom"))
            .await;
        assert!(matches!(result, Err(MusigError::Handler(_))));
        assert_eq!(fsm.state(), SomeState::S0);
        assert!(fsm.model().handled.is_empty());
        assert!(!fsm.processed_events().contains("boom"));

        // Not recorded as processed, so a retry reaches the handler again
        let result = fsm
            .handle(&ctx, SomeEvent::with_id(SomeKind::Boom, "boom"))
            .await;
        assert!(result.is_err());
        assert_eq!(ctx.invocations(), vec![SomeKind::Boom, SomeKind::Boom]);
    }

    #[tokio::test]
    async fn test_exact_transition_takes_precedence_over_any() {
        let ctx = SomeContext::default();
        let mut fsm = Fsm::new(SomeModel::default());
        fsm.from(SomeState::S0)
            .on(SomeKind::Fail)
            .run::<RecordingHandler>()
            .to(SomeState::S1)
            .unwrap();
        fsm.from_any()
            .on(SomeKind::Fail)
            .run::<RecordingHandler>()
            .to(SomeState::Failed)
            .unwrap();

        fsm.handle(&ctx, SomeEvent::internal(SomeKind::Fail))
            .await
            .unwrap();
        assert_eq!(fsm.state(), SomeState::S1);

        fsm.handle(&ctx, SomeEvent::internal(SomeKind::Fail))
            .await
            .unwrap();
        assert_eq!(fsm.state(), SomeState::Failed);
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let ctx = SomeContext::default();
        let mut fsm = some_fsm();
        let mut state_rx = fsm.subscribe();
        assert_eq!(*state_rx.borrow(), SomeState::S0);

        fsm.handle(&ctx, SomeEvent::with_id(SomeKind::E1, "a"))
            .await
            .unwrap();

        assert!(state_rx.has_changed().unwrap());
        assert_eq!(*state_rx.borrow_and_update(), SomeState::S1);
    }

    #[test]
    fn test_duplicate_transition_rejected() {
        let mut fsm = some_fsm();
        let result = fsm
            .from(SomeState::S0)
            .on(SomeKind::E1)
            .run::<RecordingHandler>()
            .to(SomeState::S2);
        assert!(matches!(result, Err(MusigError::Configuration(_))));
    }

    #[test]
    fn test_source_equal_to_target_rejected() {
        let mut fsm = Fsm::new(SomeModel::default());
        let result = fsm
            .from(SomeState::S1)
            .on(SomeKind::E1)
            .run::<RecordingHandler>()
            .to(SomeState::S1);
        assert!(matches!(result, Err(MusigError::Configuration(_))));
    }

    #[test]
    fn test_missing_handler_rejected() {
        let mut fsm = Fsm::new(SomeModel::default());
        let result = fsm.from(SomeState::S0).on(SomeKind::E1).to(SomeState::S1);
        assert!(matches!(result, Err(MusigError::Configuration(_))));
    }

    #[test]
    fn test_multi_source_registration_is_all_or_nothing() {
        let mut fsm = some_fsm();
        let result = fsm
            .from_states(&[SomeState::S3, SomeState::S0])
            .on(SomeKind::E1)
            .run::<RecordingHandler>()
            .to(SomeState::Done);
        assert!(result.is_err());
        assert!(!fsm
            .transitions()
            .iter()
            .any(|(source, _, _)| *source == SourceState::Exact(SomeState::S3)));
    }
}
