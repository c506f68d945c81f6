//! A price oracle built on the round framework.
//!
//! Participants register, post their observations of a price, vote on a
//! single estimate, and then start a new period. Any round that cannot reach
//! agreement, or takes too long, falls back to a period reset.

mod payloads;
mod rounds;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use self::payloads::{PricePayload, TransactionType};
pub use self::rounds::{
    aggregate, CollectObservationRound, EstimateConsensusRound, Event, PriceEstimationData,
    RegistrationRound, ResetRound, RoundKind, ESTIMATE_KEY, OBSERVATIONS_KEY,
};

use crate::abci_app::{AbciApp, AbciAppConfig, Application, TransitionFunction};
use crate::db::{participants_value, PARTICIPANTS_KEY};
use crate::payload::{PayloadRegistry, Value};
use crate::round::{Round, RoundContext};
use crate::{Address, Result};

const CROSS_PERIOD_KEYS: &[&str] = &[PARTICIPANTS_KEY, ESTIMATE_KEY];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEstimation {
    pub round_timeout: Duration,
    pub reset_timeout: Duration,
    /// Periods the store keeps around after a reset.
    pub period_history_depth: usize,
}

impl Default for PriceEstimation {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(30),
            period_history_depth: 3,
        }
    }
}

impl PriceEstimation {
    pub fn setup_data<'a>(
        participants: impl IntoIterator<Item = &'a Address>,
    ) -> BTreeMap<String, Value> {
        let mut data = BTreeMap::new();
        data.insert(PARTICIPANTS_KEY.to_string(), participants_value(participants));
        data
    }

    /// Builds the state machine for `participants`, with a fresh registry.
    pub fn abci_app(
        self,
        participants: &BTreeSet<Address>,
        config: AbciAppConfig<RoundKind>,
    ) -> Result<AbciApp<Self>> {
        let registry = Arc::new(PayloadRegistry::bootstrap::<PricePayload>()?);
        AbciApp::new(self, Self::setup_data(participants), config, registry)
    }
}

impl Application for PriceEstimation {
    type Payload = PricePayload;
    type Event = Event;
    type RoundKind = RoundKind;

    fn initial_round(&self) -> RoundKind {
        RoundKind::Registration
    }

    fn final_rounds(&self) -> BTreeSet<RoundKind> {
        BTreeSet::new()
    }

    fn transition_function(&self) -> TransitionFunction<RoundKind, Event> {
        use self::Event::*;
        use self::RoundKind::*;

        TransitionFunction::new()
            .with(Registration, Done, CollectObservation)
            .with(CollectObservation, Done, EstimateConsensus)
            .with(CollectObservation, NoMajority, Reset)
            .with(CollectObservation, RoundTimeout, Reset)
            .with(EstimateConsensus, Done, Reset)
            .with(EstimateConsensus, NoMajority, Reset)
            .with(EstimateConsensus, RoundTimeout, Reset)
            .with(Reset, Done, CollectObservation)
            .with(Reset, NoMajority, Registration)
            .with(Reset, ResetTimeout, Registration)
    }

    fn event_timeouts(&self) -> BTreeMap<Event, Duration> {
        let mut timeouts = BTreeMap::new();
        timeouts.insert(Event::RoundTimeout, self.round_timeout);
        timeouts.insert(Event::ResetTimeout, self.reset_timeout);
        timeouts
    }

    fn cross_period_keys(&self) -> &'static [&'static str] {
        CROSS_PERIOD_KEYS
    }

    fn build_round(
        &self,
        kind: RoundKind,
        ctx: RoundContext<TransactionType>,
    ) -> Result<Box<dyn Round<Self>>> {
        let round: Box<dyn Round<Self>> = match kind {
            RoundKind::Registration => Box::new(RegistrationRound::new(&ctx)?),
            RoundKind::CollectObservation => Box::new(CollectObservationRound::new(&ctx)?),
            RoundKind::EstimateConsensus => Box::new(EstimateConsensusRound::new(&ctx)?),
            RoundKind::Reset => Box::new(ResetRound::new(
                &ctx,
                self.cross_period_keys(),
                self.period_history_depth,
            )?),
        };
        Ok(round)
    }
}
