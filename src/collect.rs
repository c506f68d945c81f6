use std::collections::BTreeMap;

use log::{debug, info};

use crate::decision::Decision;
use crate::error::{InternalError, Rejection, TransactionNotValid};
use crate::payload::{Payload, Transaction, Value};
use crate::round::{BlockConfirmations, RoundBase, RoundContext};
use crate::vote_count::VoteCount;
use crate::{Address, Result};

/// Decides once `threshold` participants sent the same payload.
#[derive(Debug, Clone)]
pub struct CollectSameUntilThreshold<P: Payload> {
    base: RoundBase<P::Kind>,
    collection: BTreeMap<Address, P>,
    votes: VoteCount<P>,
    confirmations: BlockConfirmations,
}

impl<P: Payload> CollectSameUntilThreshold<P> {
    pub fn new(
        round_id: &'static str,
        allowed_tx_type: P::Kind,
        ctx: &RoundContext<P::Kind>,
    ) -> Result<Self> {
        Ok(Self {
            base: RoundBase::new(round_id, allowed_tx_type, ctx)?,
            collection: Default::default(),
            votes: Default::default(),
            confirmations: BlockConfirmations::new(ctx.required_block_confirmations),
        })
    }

    pub fn base(&self) -> &RoundBase<P::Kind> {
        &self.base
    }

    fn validate(&self, tx: &Transaction<P>) -> std::result::Result<(), Rejection> {
        self.base.check_common(tx)?;
        if self.collection.contains_key(&tx.sender) {
            return Err(Rejection::SenderAlreadySent {
                sender: tx.sender.clone(),
                round_id: self.base.round_id(),
            });
        }
        Ok(())
    }

    pub fn check_payload(
        &self,
        tx: &Transaction<P>,
    ) -> std::result::Result<(), TransactionNotValid> {
        Ok(self.validate(tx)?)
    }

    pub fn process_payload(
        &mut self,
        tx: Transaction<P>,
    ) -> std::result::Result<(), InternalError> {
        self.validate(&tx)?;
        debug!(
            "[{}] {} sent {:?}",
            self.base.round_id(),
            tx.sender,
            tx.payload
        );
        self.votes.add(tx.sender.clone(), tx.payload.clone());
        self.collection.insert(tx.sender, tx.payload);
        Ok(())
    }

    pub fn collection(&self) -> &BTreeMap<Address, P> {
        &self.collection
    }

    pub fn threshold_reached(&self) -> bool {
        self.votes.has_majority(self.base.threshold())
    }

    pub fn most_voted_payload(&self) -> std::result::Result<&P, InternalError> {
        match self.votes.candidate_with_most_votes() {
            Some((payload, count)) if count >= self.base.threshold() => Ok(payload),
            _ => Err(InternalError::NotEnoughVotes),
        }
    }

    pub fn is_majority_possible(&self) -> bool {
        self.threshold_reached()
            || self
                .votes
                .is_majority_possible(self.base.participants().len(), self.base.threshold())
    }

    pub fn block_confirmations(&self) -> &BlockConfirmations {
        &self.confirmations
    }

    /// Called once per block. Once the threshold is reached the decision only
    /// waits on block confirmations and never turns into a no-majority.
    pub fn decide(&mut self) -> Decision<P> {
        if self.threshold_reached() {
            if !self.confirmations.tick() {
                return Decision::Pending;
            }
            return match self.most_voted_payload() {
                Ok(payload) => {
                    info!("[{}] decided {:?}", self.base.round_id(), payload);
                    Decision::Reached(payload.clone())
                }
                Err(_) => Decision::Pending,
            };
        }
        if !self.is_majority_possible() {
            info!(
                "[{}] no majority possible with {} of {} votes in",
                self.base.round_id(),
                self.votes.voters.len(),
                self.base.participants().len()
            );
            return Decision::NoMajority;
        }
        Decision::Pending
    }
}

/// Store entries for a decided payload, one `most_voted_<attribute>` key per
/// attribute.
pub fn most_voted<P: Payload>(payload: &P) -> Vec<(String, Value)> {
    payload
        .data()
        .into_iter()
        .map(|(name, value)| (format!("most_voted_{}", name), value))
        .collect()
}

/// Shared body of the two "different" variants: one payload per sender,
/// regardless of content.
#[derive(Debug, Clone)]
struct DifferentCollection<P: Payload> {
    base: RoundBase<P::Kind>,
    collection: BTreeMap<Address, P>,
    confirmations: BlockConfirmations,
}

impl<P: Payload> DifferentCollection<P> {
    fn new(
        round_id: &'static str,
        allowed_tx_type: P::Kind,
        ctx: &RoundContext<P::Kind>,
    ) -> Result<Self> {
        Ok(Self {
            base: RoundBase::new(round_id, allowed_tx_type, ctx)?,
            collection: Default::default(),
            confirmations: BlockConfirmations::new(ctx.required_block_confirmations),
        })
    }

    fn validate(&self, tx: &Transaction<P>) -> std::result::Result<(), Rejection> {
        self.base.check_common(tx)?;
        if self.collection.contains_key(&tx.sender) {
            return Err(Rejection::SenderAlreadyAdded {
                sender: tx.sender.clone(),
                round_id: self.base.round_id(),
            });
        }
        Ok(())
    }

    fn process(&mut self, tx: Transaction<P>) -> std::result::Result<(), InternalError> {
        self.validate(&tx)?;
        debug!("[{}] collected from {}", self.base.round_id(), tx.sender);
        self.collection.insert(tx.sender, tx.payload);
        Ok(())
    }

    fn is_possible(&self, required: usize) -> bool {
        self.collection.len() + self.base.remaining(self.collection.len()) >= required
    }

    fn decide(&mut self, required: usize) -> Decision<BTreeMap<Address, P>> {
        if self.collection.len() >= required {
            if !self.confirmations.tick() {
                return Decision::Pending;
            }
            info!(
                "[{}] collected {} payloads",
                self.base.round_id(),
                self.collection.len()
            );
            return Decision::Reached(self.collection.clone());
        }
        if !self.is_possible(required) {
            return Decision::NoMajority;
        }
        Decision::Pending
    }
}

/// Decides once `threshold` participants sent any payload.
#[derive(Debug, Clone)]
pub struct CollectDifferentUntilThreshold<P: Payload> {
    inner: DifferentCollection<P>,
}

impl<P: Payload> CollectDifferentUntilThreshold<P> {
    pub fn new(
        round_id: &'static str,
        allowed_tx_type: P::Kind,
        ctx: &RoundContext<P::Kind>,
    ) -> Result<Self> {
        Ok(Self {
            inner: DifferentCollection::new(round_id, allowed_tx_type, ctx)?,
        })
    }

    pub fn base(&self) -> &RoundBase<P::Kind> {
        &self.inner.base
    }

    pub fn check_payload(
        &self,
        tx: &Transaction<P>,
    ) -> std::result::Result<(), TransactionNotValid> {
        Ok(self.inner.validate(tx)?)
    }

    pub fn process_payload(
        &mut self,
        tx: Transaction<P>,
    ) -> std::result::Result<(), InternalError> {
        self.inner.process(tx)
    }

    pub fn collection(&self) -> &BTreeMap<Address, P> {
        &self.inner.collection
    }

    pub fn collection_threshold_reached(&self) -> bool {
        self.inner.collection.len() >= self.inner.base.threshold()
    }

    pub fn is_majority_possible(&self) -> bool {
        self.inner.is_possible(self.inner.base.threshold())
    }

    pub fn block_confirmations(&self) -> &BlockConfirmations {
        &self.inner.confirmations
    }

    pub fn decide(&mut self) -> Decision<BTreeMap<Address, P>> {
        let required = self.inner.base.threshold();
        self.inner.decide(required)
    }
}

/// Decides once every participant sent a payload.
#[derive(Debug, Clone)]
pub struct CollectDifferentUntilAll<P: Payload> {
    inner: DifferentCollection<P>,
}

impl<P: Payload> CollectDifferentUntilAll<P> {
    pub fn new(
        round_id: &'static str,
        allowed_tx_type: P::Kind,
        ctx: &RoundContext<P::Kind>,
    ) -> Result<Self> {
        Ok(Self {
            inner: DifferentCollection::new(round_id, allowed_tx_type, ctx)?,
        })
    }

    pub fn base(&self) -> &RoundBase<P::Kind> {
        &self.inner.base
    }

    pub fn check_payload(
        &self,
        tx: &Transaction<P>,
    ) -> std::result::Result<(), TransactionNotValid> {
        Ok(self.inner.validate(tx)?)
    }

    pub fn process_payload(
        &mut self,
        tx: Transaction<P>,
    ) -> std::result::Result<(), InternalError> {
        self.inner.process(tx)
    }

    pub fn collection(&self) -> &BTreeMap<Address, P> {
        &self.inner.collection
    }

    pub fn collection_threshold_reached(&self) -> bool {
        self.inner.collection.len() >= self.inner.base.participants().len()
    }

    pub fn is_majority_possible(&self) -> bool {
        self.inner.is_possible(self.inner.base.participants().len())
    }

    pub fn block_confirmations(&self) -> &BlockConfirmations {
        &self.inner.confirmations
    }

    pub fn decide(&mut self) -> Decision<BTreeMap<Address, P>> {
        let required = self.inner.base.participants().len();
        self.inner.decide(required)
    }
}
