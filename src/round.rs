use std::collections::BTreeSet;
use std::sync::Arc;

use crate::abci_app::Application;
use crate::db::SynchronizedData;
use crate::error::{InternalError, Rejection, TransactionNotValid};
use crate::params::ConsensusParams;
use crate::payload::{Payload, PayloadRegistry, Transaction, TransactionKind};
use crate::{Address, Result};

/// One step of an application: collects payloads from the participants and,
/// once it has decided, hands the updated data and an event to the state
/// machine.
///
/// A round is single use. After `end_block` has returned `Some` it is dropped.
pub trait Round<A: Application> {
    fn round_id(&self) -> &'static str;

    fn synchronized_data(&self) -> &SynchronizedData;

    /// Validates a transaction without touching the round.
    fn check_payload(
        &self,
        tx: &Transaction<A::Payload>,
    ) -> std::result::Result<(), TransactionNotValid>;

    /// Adds a transaction to the round. The transaction is expected to have
    /// passed `check_payload`, so any violation here is a local bug.
    fn process_payload(
        &mut self,
        tx: Transaction<A::Payload>,
    ) -> std::result::Result<(), InternalError>;

    fn end_block(&mut self) -> Option<(SynchronizedData, A::Event)>;

    fn is_majority_possible(&self) -> bool;
}

/// Everything a round is built from.
#[derive(Debug, Clone)]
pub struct RoundContext<K> {
    pub synchronized_data: SynchronizedData,
    pub consensus_params: ConsensusParams,
    pub registry: Arc<PayloadRegistry<K>>,
    pub required_block_confirmations: u64,
}

/// Counts the blocks a decided round has been held back for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockConfirmations {
    pub required: u64,
    pub seen: u64,
}

impl BlockConfirmations {
    pub fn new(required: u64) -> Self {
        Self { required, seen: 0 }
    }

    /// Counts one more block past the threshold. True once enough blocks were seen.
    pub fn tick(&mut self) -> bool {
        self.seen += 1;
        self.seen > self.required
    }
}

/// The state and the checks every round shares.
#[derive(Debug, Clone)]
pub struct RoundBase<K> {
    round_id: &'static str,
    allowed_tx_type: K,
    synchronized_data: SynchronizedData,
    consensus_params: ConsensusParams,
    participants: BTreeSet<Address>,
    registry: Arc<PayloadRegistry<K>>,
}

impl<K: TransactionKind> RoundBase<K> {
    pub fn new(round_id: &'static str, allowed_tx_type: K, ctx: &RoundContext<K>) -> Result<Self> {
        let participants = ctx.synchronized_data.participants()?;
        Ok(Self {
            round_id,
            allowed_tx_type,
            synchronized_data: ctx.synchronized_data.clone(),
            consensus_params: ctx.consensus_params,
            participants,
            registry: ctx.registry.clone(),
        })
    }

    pub fn round_id(&self) -> &'static str {
        self.round_id
    }

    pub fn allowed_tx_type(&self) -> K {
        self.allowed_tx_type
    }

    pub fn synchronized_data(&self) -> &SynchronizedData {
        &self.synchronized_data
    }

    pub fn consensus_params(&self) -> &ConsensusParams {
        &self.consensus_params
    }

    pub fn participants(&self) -> &BTreeSet<Address> {
        &self.participants
    }

    pub fn threshold(&self) -> usize {
        self.consensus_params.threshold()
    }

    /// Participants that have not contributed yet, given how many have.
    pub fn remaining(&self, contributed: usize) -> usize {
        self.participants.len().saturating_sub(contributed)
    }

    /// Kind, shape and membership checks. Duplicate detection is left to the
    /// collection, which knows its own wording for it.
    pub fn check_common<P>(&self, tx: &Transaction<P>) -> std::result::Result<(), Rejection>
    where
        P: Payload<Kind = K>,
    {
        let tx_type = tx.transaction_type();
        if tx_type != self.allowed_tx_type {
            return Err(Rejection::UnexpectedTransactionType {
                tx_type: tx_type.to_string(),
            });
        }

        let shape = self
            .registry
            .resolve(tx_type)
            .map_err(|_| Rejection::UnknownTransactionType(tx_type.to_string()))?;
        shape.check(&tx.payload.data())?;

        if !self.participants.contains(&tx.sender) {
            return Err(Rejection::SenderNotParticipant {
                participants: self.participants.iter().cloned().collect(),
            });
        }
        Ok(())
    }
}
