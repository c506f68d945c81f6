use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::db::{AbciAppDb, SynchronizedData};
use crate::error::{ConfigError, InternalError};
use crate::params::ConsensusParams;
use crate::payload::{Payload, PayloadRegistry, Transaction, Value};
use crate::round::{Round, RoundContext};
use crate::timeouts::Timeouts;
use crate::Result;

pub type KindOf<A> = <<A as Application>::Payload as Payload>::Kind;

/// An application built out of rounds.
///
/// It names its rounds and events, wires them together with a transition
/// function and knows how to build each round from a [`RoundContext`].
pub trait Application: Sized + 'static {
    type Payload: Payload;
    type Event: Copy + Ord + Debug + Display;
    type RoundKind: Copy + Ord + Debug + Display;

    fn initial_round(&self) -> Self::RoundKind;

    fn final_rounds(&self) -> BTreeSet<Self::RoundKind>;

    fn transition_function(&self) -> TransitionFunction<Self::RoundKind, Self::Event>;

    /// Events that fire on their own when a round takes too long.
    fn event_timeouts(&self) -> BTreeMap<Self::Event, Duration>;

    /// Keys carried over when a round opens a new period.
    fn cross_period_keys(&self) -> &'static [&'static str] {
        &[]
    }

    fn build_round(
        &self,
        kind: Self::RoundKind,
        ctx: RoundContext<KindOf<Self>>,
    ) -> Result<Box<dyn Round<Self>>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionFunction<R, E> {
    edges: BTreeMap<R, BTreeMap<E, R>>,
}

impl<R: Copy + Ord, E: Copy + Ord> Default for TransitionFunction<R, E> {
    fn default() -> Self {
        Self {
            edges: Default::default(),
        }
    }
}

impl<R: Copy + Ord, E: Copy + Ord> TransitionFunction<R, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, from: R, event: E, to: R) -> Self {
        self.edges.entry(from).or_default().insert(event, to);
        self
    }

    pub fn next(&self, from: R, event: E) -> Option<R> {
        self.edges.get(&from).and_then(|out| out.get(&event)).copied()
    }

    pub fn events_from(&self, from: R) -> impl Iterator<Item = E> + '_ {
        self.edges
            .get(&from)
            .into_iter()
            .flat_map(|out| out.keys().copied())
    }

    /// Every round that appears in the table, as a source or a target.
    pub fn rounds(&self) -> BTreeSet<R> {
        self.edges
            .iter()
            .flat_map(|(from, out)| std::iter::once(*from).chain(out.values().copied()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "R: Serialize",
    deserialize = "R: Ord + Deserialize<'de>"
))]
pub struct AbciAppConfig<R> {
    pub consensus_params: ConsensusParams,
    /// Blocks a round waits after reaching its threshold. Rounds not listed wait none.
    #[serde(default)]
    pub block_confirmations: BTreeMap<R, u64>,
}

impl<R: Ord> AbciAppConfig<R> {
    pub fn new(consensus_params: ConsensusParams) -> Self {
        Self {
            consensus_params,
            block_confirmations: Default::default(),
        }
    }

    pub fn with_block_confirmations(mut self, round: R, confirmations: u64) -> Self {
        self.block_confirmations.insert(round, confirmations);
        self
    }

    pub fn required_block_confirmations(&self, round: &R) -> u64 {
        self.block_confirmations.get(round).copied().unwrap_or(0)
    }
}

/// The state machine sequencing an application's rounds.
pub struct AbciApp<A: Application> {
    app: A,
    config: AbciAppConfig<A::RoundKind>,
    registry: Arc<PayloadRegistry<KindOf<A>>>,
    transition_function: TransitionFunction<A::RoundKind, A::Event>,
    final_rounds: BTreeSet<A::RoundKind>,
    event_timeouts: BTreeMap<A::Event, Duration>,
    initial_data: SynchronizedData,
    last_synchronized_data: SynchronizedData,
    current_round: Option<Box<dyn Round<A>>>,
    current_round_kind: Option<A::RoundKind>,
    current_round_height: u64,
    previous_rounds: Vec<A::RoundKind>,
    round_results: Vec<SynchronizedData>,
    timeouts: Timeouts<A::Event>,
    timeouts_unscheduled: bool,
    last_timestamp: Option<Duration>,
}

impl<A: Application> Debug for AbciApp<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbciApp")
            .field("current_round_kind", &self.current_round_kind)
            .field("current_round_height", &self.current_round_height)
            .field("previous_rounds", &self.previous_rounds)
            .field("last_timestamp", &self.last_timestamp)
            .finish()
    }
}

impl<A: Application> AbciApp<A> {
    pub fn new(
        app: A,
        setup_data: BTreeMap<String, Value>,
        config: AbciAppConfig<A::RoundKind>,
        registry: Arc<PayloadRegistry<KindOf<A>>>,
    ) -> Result<Self> {
        let transition_function = app.transition_function();
        let final_rounds = app.final_rounds();

        for round in final_rounds.iter() {
            if transition_function.events_from(*round).next().is_some() {
                return Err(ConfigError::FinalRoundHasTransitions {
                    round: round.to_string(),
                }
                .into());
            }
        }

        let initial_data = SynchronizedData::new(AbciAppDb::new(setup_data));
        if let Ok(participants) = initial_data.participants() {
            let max_participants = config.consensus_params.max_participants();
            if participants.len() > max_participants {
                return Err(ConfigError::TooManyParticipants {
                    participants: participants.len(),
                    max_participants,
                }
                .into());
            }
        }

        let event_timeouts = app.event_timeouts();
        Ok(Self {
            app,
            config,
            registry,
            transition_function,
            final_rounds,
            event_timeouts,
            last_synchronized_data: initial_data.clone(),
            initial_data,
            current_round: None,
            current_round_kind: None,
            current_round_height: 0,
            previous_rounds: Vec::new(),
            round_results: Vec::new(),
            timeouts: Timeouts::new(),
            timeouts_unscheduled: false,
            last_timestamp: None,
        })
    }

    /// Enters the initial round at height 0.
    pub fn setup(&mut self) -> Result<()> {
        let initial = self.app.initial_round();
        info!("[ABCI] setup, entering {}", initial);
        self.current_round_height = 0;
        self.previous_rounds.clear();
        self.round_results.clear();
        self.last_synchronized_data = self.initial_data.clone();
        let round = self.build_round(initial, self.initial_data.clone())?;
        self.enter(initial, round);
        Ok(())
    }

    fn build_round(
        &self,
        kind: A::RoundKind,
        synchronized_data: SynchronizedData,
    ) -> Result<Box<dyn Round<A>>> {
        let ctx = RoundContext {
            synchronized_data,
            consensus_params: self.config.consensus_params,
            registry: self.registry.clone(),
            required_block_confirmations: self.config.required_block_confirmations(&kind),
        };
        self.app.build_round(kind, ctx)
    }

    fn enter(&mut self, kind: A::RoundKind, round: Box<dyn Round<A>>) {
        self.current_round = Some(round);
        self.current_round_kind = Some(kind);
        self.timeouts.cancel_all();
        match self.last_timestamp {
            Some(now) => self.schedule_timeouts(now),
            None => self.timeouts_unscheduled = true,
        }
    }

    fn schedule_timeouts(&mut self, now: Duration) {
        self.timeouts_unscheduled = false;
        let kind = match self.current_round_kind {
            Some(kind) => kind,
            None => return,
        };
        for event in self.transition_function.events_from(kind) {
            if let Some(timeout) = self.event_timeouts.get(&event) {
                debug!("[ABCI] {} times out with {} at {:?}", kind, event, now + *timeout);
                self.timeouts.schedule(now + *timeout, event);
            }
        }
    }

    fn round(&self) -> Result<&dyn Round<A>> {
        self.current_round
            .as_deref()
            .ok_or_else(|| InternalError::NoActiveRound.into())
    }

    pub fn check_transaction(&self, tx: &Transaction<A::Payload>) -> Result<()> {
        self.round()?.check_payload(tx)?;
        Ok(())
    }

    pub fn process_transaction(&mut self, tx: Transaction<A::Payload>) -> Result<()> {
        let round = self
            .current_round
            .as_deref_mut()
            .ok_or(InternalError::NoActiveRound)?;
        round.process_payload(tx)?;
        Ok(())
    }

    /// Asks the current round whether it has decided and, if so, moves on.
    pub fn end_block(&mut self) -> Result<Option<A::Event>> {
        let outcome = match self.current_round.as_deref_mut() {
            Some(round) => round.end_block(),
            None => return Ok(None),
        };
        match outcome {
            Some((data, event)) => {
                self.process_event(event, Some(data))?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    /// Ends the current round with `event`, using `data` as its result or the
    /// round's own data when none is given. A no-op when no round is active.
    pub fn process_event(&mut self, event: A::Event, data: Option<SynchronizedData>) -> Result<()> {
        let (kind, data) = match (self.current_round_kind, self.current_round.as_deref()) {
            (Some(kind), Some(round)) => {
                (kind, data.unwrap_or_else(|| round.synchronized_data().clone()))
            }
            _ => {
                debug!("[ABCI] no active round, ignoring {}", event);
                return Ok(());
            }
        };

        // the current round stays in place until its successor is built
        let next = match self.transition_function.next(kind, event) {
            Some(next_kind) => Some((next_kind, self.build_round(next_kind, data.clone())?)),
            None => None,
        };

        self.current_round = None;
        self.previous_rounds.push(kind);
        self.round_results.push(data.clone());
        self.last_synchronized_data = data;
        self.timeouts.cancel_all();

        match next {
            Some((next_kind, round)) => {
                self.current_round_height += 1;
                info!(
                    "[ABCI] {} --{}--> {} at height {}",
                    kind, event, next_kind, self.current_round_height
                );
                self.enter(next_kind, round);
            }
            None => {
                if self.final_rounds.contains(&kind) {
                    info!("[ABCI] reached final round {}", kind);
                } else {
                    warn!("[ABCI] no transition from {} on {}, stopping", kind, event);
                }
                self.current_round_kind = None;
            }
        }
        Ok(())
    }

    pub fn end_round(&mut self, event: A::Event) -> Result<()> {
        self.process_event(event, None)
    }

    /// Feeds a block timestamp. Fires the earliest expired timeout, if any.
    pub fn update_time(&mut self, timestamp: Duration) -> Result<Option<A::Event>> {
        self.last_timestamp = Some(timestamp);
        if self.timeouts_unscheduled {
            self.schedule_timeouts(timestamp);
        }
        match self.timeouts.pop_expired(timestamp) {
            Some((deadline, event)) => {
                info!("[ABCI] timeout {} expired at {:?}", event, deadline);
                self.process_event(event, None)?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    /// Keeps only the latest `depth` entries of the round history.
    pub fn cleanup(&mut self, depth: usize) {
        if self.previous_rounds.len() > depth {
            let excess = self.previous_rounds.len() - depth;
            self.previous_rounds.drain(..excess);
        }
        if self.round_results.len() > depth {
            let excess = self.round_results.len() - depth;
            self.round_results.drain(..excess);
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn consensus_params(&self) -> &ConsensusParams {
        &self.config.consensus_params
    }

    pub fn registry(&self) -> &Arc<PayloadRegistry<KindOf<A>>> {
        &self.registry
    }

    pub fn current_round(&self) -> Option<&dyn Round<A>> {
        self.current_round.as_deref()
    }

    pub fn current_round_kind(&self) -> Option<A::RoundKind> {
        self.current_round_kind
    }

    pub fn current_round_id(&self) -> Option<&'static str> {
        self.current_round.as_ref().map(|r| r.round_id())
    }

    pub fn current_round_height(&self) -> u64 {
        self.current_round_height
    }

    /// Data of the current round, or the last result once the app stopped.
    pub fn synchronized_data(&self) -> &SynchronizedData {
        match self.current_round.as_ref() {
            Some(round) => round.synchronized_data(),
            None => &self.last_synchronized_data,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.current_round.is_none()
    }

    pub fn previous_rounds(&self) -> &[A::RoundKind] {
        &self.previous_rounds
    }

    pub fn round_results(&self) -> &[SynchronizedData] {
        &self.round_results
    }

    pub fn last_timestamp(&self) -> Option<Duration> {
        self.last_timestamp
    }

    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.len()
    }
}
