use std::collections::BTreeMap;
use std::fmt;

use super::payloads::{PricePayload, TransactionType};
use super::PriceEstimation;
use crate::collect::{
    most_voted, CollectDifferentUntilAll, CollectDifferentUntilThreshold, CollectSameUntilThreshold,
};
use crate::db::{participants_value, SynchronizedData, PARTICIPANTS_KEY};
use crate::decision::Decision;
use crate::error::{InternalError, Rejection, TransactionNotValid};
use crate::payload::{Transaction, Value};
use crate::round::{Round, RoundContext};
use crate::{Address, Error, Result};

pub const OBSERVATIONS_KEY: &str = "participant_to_observations";
pub const ESTIMATE_KEY: &str = "most_voted_estimate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Event {
    Done,
    NoMajority,
    RoundTimeout,
    ResetTimeout,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Done => "done",
            Event::NoMajority => "no_majority",
            Event::RoundTimeout => "round_timeout",
            Event::ResetTimeout => "reset_timeout",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoundKind {
    Registration,
    CollectObservation,
    EstimateConsensus,
    Reset,
}

impl RoundKind {
    pub fn round_id(&self) -> &'static str {
        match self {
            RoundKind::Registration => "registration",
            RoundKind::CollectObservation => "collect_observation",
            RoundKind::EstimateConsensus => "estimate_consensus",
            RoundKind::Reset => "reset",
        }
    }
}

impl fmt::Display for RoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.round_id())
    }
}

/// Typed reads of the keys this application writes.
pub trait PriceEstimationData {
    fn observations(&self) -> Result<BTreeMap<Address, f64>>;
    fn most_voted_estimate(&self) -> Result<f64>;
}

impl PriceEstimationData for SynchronizedData {
    fn observations(&self) -> Result<BTreeMap<Address, f64>> {
        let unexpected = || Error::UnexpectedValue {
            key: OBSERVATIONS_KEY.to_string(),
            expected: "a map of observations",
        };
        self.get_strict(OBSERVATIONS_KEY)?
            .as_map()
            .ok_or_else(unexpected)?
            .iter()
            .map(|(sender, v)| v.as_float().map(|f| (sender.clone(), f)).ok_or_else(unexpected))
            .collect()
    }

    fn most_voted_estimate(&self) -> Result<f64> {
        self.get_strict(ESTIMATE_KEY)?
            .as_float()
            .ok_or_else(|| Error::UnexpectedValue {
                key: ESTIMATE_KEY.to_string(),
                expected: "a float",
            })
    }
}

/// Mean of the collected observations, the value participants are expected
/// to vote on in the estimate round.
pub fn aggregate(observations: &BTreeMap<Address, f64>) -> Option<f64> {
    if observations.is_empty() {
        return None;
    }
    Some(observations.values().sum::<f64>() / observations.len() as f64)
}

fn no_majority<T>(
    decision: &Decision<T>,
    data: &SynchronizedData,
) -> Option<(SynchronizedData, Event)> {
    match decision {
        Decision::NoMajority => Some((data.clone(), Event::NoMajority)),
        _ => None,
    }
}

/// Every participant announces itself; the senders become the participant set.
#[derive(Debug)]
pub struct RegistrationRound {
    inner: CollectDifferentUntilAll<PricePayload>,
}

impl RegistrationRound {
    pub fn new(ctx: &RoundContext<TransactionType>) -> Result<Self> {
        Ok(Self {
            inner: CollectDifferentUntilAll::new(
                RoundKind::Registration.round_id(),
                TransactionType::Registration,
                ctx,
            )?,
        })
    }

    pub fn collection(&self) -> &BTreeMap<Address, PricePayload> {
        self.inner.collection()
    }
}

impl Round<PriceEstimation> for RegistrationRound {
    fn round_id(&self) -> &'static str {
        self.inner.base().round_id()
    }

    fn synchronized_data(&self) -> &SynchronizedData {
        self.inner.base().synchronized_data()
    }

    fn check_payload(
        &self,
        tx: &Transaction<PricePayload>,
    ) -> std::result::Result<(), TransactionNotValid> {
        self.inner.check_payload(tx)
    }

    fn process_payload(
        &mut self,
        tx: Transaction<PricePayload>,
    ) -> std::result::Result<(), InternalError> {
        self.inner.process_payload(tx)
    }

    fn end_block(&mut self) -> Option<(SynchronizedData, Event)> {
        let decision = self.inner.decide();
        let data = self.synchronized_data();
        match decision {
            Decision::Reached(collection) => Some((
                data.update([(PARTICIPANTS_KEY, participants_value(collection.keys()))]),
                Event::Done,
            )),
            other => no_majority(&other, data),
        }
    }

    fn is_majority_possible(&self) -> bool {
        self.inner.is_majority_possible()
    }
}

/// Collects one observation from each of at least `threshold` participants.
#[derive(Debug)]
pub struct CollectObservationRound {
    inner: CollectDifferentUntilThreshold<PricePayload>,
}

impl CollectObservationRound {
    pub fn new(ctx: &RoundContext<TransactionType>) -> Result<Self> {
        Ok(Self {
            inner: CollectDifferentUntilThreshold::new(
                RoundKind::CollectObservation.round_id(),
                TransactionType::Observation,
                ctx,
            )?,
        })
    }

    pub fn collection(&self) -> &BTreeMap<Address, PricePayload> {
        self.inner.collection()
    }
}

impl Round<PriceEstimation> for CollectObservationRound {
    fn round_id(&self) -> &'static str {
        self.inner.base().round_id()
    }

    fn synchronized_data(&self) -> &SynchronizedData {
        self.inner.base().synchronized_data()
    }

    fn check_payload(
        &self,
        tx: &Transaction<PricePayload>,
    ) -> std::result::Result<(), TransactionNotValid> {
        self.inner.check_payload(tx)
    }

    fn process_payload(
        &mut self,
        tx: Transaction<PricePayload>,
    ) -> std::result::Result<(), InternalError> {
        self.inner.process_payload(tx)
    }

    fn end_block(&mut self) -> Option<(SynchronizedData, Event)> {
        let decision = self.inner.decide();
        let data = self.synchronized_data();
        match decision {
            Decision::Reached(collection) => {
                let observations = collection
                    .into_iter()
                    .filter_map(|(sender, payload)| match payload {
                        PricePayload::Observation { observation } => {
                            Some((sender, Value::Float(observation)))
                        }
                        _ => None,
                    })
                    .collect();
                Some((
                    data.update([(OBSERVATIONS_KEY, Value::Map(observations))]),
                    Event::Done,
                ))
            }
            other => no_majority(&other, data),
        }
    }

    fn is_majority_possible(&self) -> bool {
        self.inner.is_majority_possible()
    }
}

/// Agrees on a single estimate.
#[derive(Debug)]
pub struct EstimateConsensusRound {
    inner: CollectSameUntilThreshold<PricePayload>,
}

impl EstimateConsensusRound {
    pub fn new(ctx: &RoundContext<TransactionType>) -> Result<Self> {
        Ok(Self {
            inner: CollectSameUntilThreshold::new(
                RoundKind::EstimateConsensus.round_id(),
                TransactionType::Estimate,
                ctx,
            )?,
        })
    }

    pub fn threshold_reached(&self) -> bool {
        self.inner.threshold_reached()
    }

    pub fn most_voted_payload(&self) -> std::result::Result<&PricePayload, InternalError> {
        self.inner.most_voted_payload()
    }
}

impl Round<PriceEstimation> for EstimateConsensusRound {
    fn round_id(&self) -> &'static str {
        self.inner.base().round_id()
    }

    fn synchronized_data(&self) -> &SynchronizedData {
        self.inner.base().synchronized_data()
    }

    fn check_payload(
        &self,
        tx: &Transaction<PricePayload>,
    ) -> std::result::Result<(), TransactionNotValid> {
        self.inner.check_payload(tx)
    }

    fn process_payload(
        &mut self,
        tx: Transaction<PricePayload>,
    ) -> std::result::Result<(), InternalError> {
        self.inner.process_payload(tx)
    }

    fn end_block(&mut self) -> Option<(SynchronizedData, Event)> {
        let decision = self.inner.decide();
        let data = self.synchronized_data();
        match decision {
            Decision::Reached(payload) => Some((data.update(most_voted(&payload)), Event::Done)),
            other => no_majority(&other, data),
        }
    }

    fn is_majority_possible(&self) -> bool {
        self.inner.is_majority_possible()
    }
}

/// Agrees on moving to the next period, then opens it.
#[derive(Debug)]
pub struct ResetRound {
    inner: CollectSameUntilThreshold<PricePayload>,
    cross_period_keys: &'static [&'static str],
    period_history_depth: usize,
}

impl ResetRound {
    pub fn new(
        ctx: &RoundContext<TransactionType>,
        cross_period_keys: &'static [&'static str],
        period_history_depth: usize,
    ) -> Result<Self> {
        Ok(Self {
            inner: CollectSameUntilThreshold::new(
                RoundKind::Reset.round_id(),
                TransactionType::Reset,
                ctx,
            )?,
            cross_period_keys,
            period_history_depth,
        })
    }

    /// A reset vote must name the period right after the current one.
    fn check_period(&self, payload: &PricePayload) -> std::result::Result<(), Rejection> {
        let expected = self.synchronized_data().period_count() + 1;
        match payload {
            PricePayload::Reset { period_count } if *period_count != expected => {
                Err(Rejection::UnexpectedPeriod {
                    expected,
                    actual: *period_count,
                })
            }
            _ => Ok(()),
        }
    }
}

impl Round<PriceEstimation> for ResetRound {
    fn round_id(&self) -> &'static str {
        self.inner.base().round_id()
    }

    fn synchronized_data(&self) -> &SynchronizedData {
        self.inner.base().synchronized_data()
    }

    fn check_payload(
        &self,
        tx: &Transaction<PricePayload>,
    ) -> std::result::Result<(), TransactionNotValid> {
        self.inner.check_payload(tx)?;
        Ok(self.check_period(&tx.payload)?)
    }

    fn process_payload(
        &mut self,
        tx: Transaction<PricePayload>,
    ) -> std::result::Result<(), InternalError> {
        self.check_period(&tx.payload)?;
        self.inner.process_payload(tx)
    }

    fn end_block(&mut self) -> Option<(SynchronizedData, Event)> {
        let decision = self.inner.decide();
        let data = self.synchronized_data();
        match decision {
            Decision::Reached(_) => {
                let next = data
                    .create(self.cross_period_keys)
                    .cleanup(self.period_history_depth, None);
                Some((next, Event::Done))
            }
            other => no_majority(&other, data),
        }
    }

    fn is_majority_possible(&self) -> bool {
        self.inner.is_majority_possible()
    }
}
