use thiserror::Error;

use crate::Address;

/// Why a payload can not be accepted by a round.
///
/// The same reasons surface through two disjoint channels: as a
/// [`TransactionNotValid`] when an incoming transaction is checked, and as an
/// [`InternalError`] when an already checked transaction turns out to be invalid
/// while it is being processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("sender not in list of participants: {participants:?}")]
    SenderNotParticipant { participants: Vec<Address> },
    #[error("sender {sender} has already sent value for round: {round_id}")]
    SenderAlreadySent {
        sender: Address,
        round_id: &'static str,
    },
    #[error("payload attribute sender with value {sender} has already been added for round: {round_id}")]
    SenderAlreadyAdded {
        sender: Address,
        round_id: &'static str,
    },
    #[error("request '{tx_type}' not recognized")]
    UnexpectedTransactionType { tx_type: String },
    #[error("unknown transaction type: {0}")]
    UnknownTransactionType(String),
    #[error("period {actual} does not follow the current period, expected {expected}")]
    UnexpectedPeriod { expected: u64, actual: u64 },
    #[error("malformed {shape} payload: expected attributes {expected:?}, got {actual:?}")]
    MalformedAttributes {
        shape: &'static str,
        expected: Vec<&'static str>,
        actual: Vec<&'static str>,
    },
}

/// A transaction that failed validation. Recoverable: the transaction is
/// excluded from the block and the round carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransactionNotValid(pub Rejection);

/// A local bug: either `check_payload` was skipped, or the caller reached into
/// a round in a state it should not be in. Never swallow these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("internal error: {0}")]
    InvalidPayload(Rejection),
    #[error("internal error: not enough votes")]
    NotEnoughVotes,
    #[error("internal error: no round is active")]
    NoActiveRound,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_participants must be at least 1, got {0}")]
    MaxParticipantsTooLow(usize),
    #[error("{participants} participants do not fit max_participants {max_participants}")]
    TooManyParticipants {
        participants: usize,
        max_participants: usize,
    },
    #[error("final round {round} must not have outgoing transitions")]
    FinalRoundHasTransitions { round: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Internal(#[from] InternalError),
    #[error(transparent)]
    InvalidTransaction(#[from] TransactionNotValid),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("key {0:?} has not been set")]
    KeyNotFound(String),
    #[error("value under key {key:?} is not {expected}")]
    UnexpectedValue { key: String, expected: &'static str },
    #[error("transaction type {tx_type} is already bound to {existing}, refusing to rebind it to {new}")]
    DuplicateRegistration {
        tx_type: String,
        existing: &'static str,
        new: &'static str,
    },
    #[error("unknown transaction type: {0}")]
    UnknownTransactionType(String),
    #[error("{request} is not allowed while the block is {state}")]
    InvalidAbciRequest {
        request: &'static str,
        state: &'static str,
    },
    #[error("block height {got} does not follow the last committed height {last}")]
    InvalidBlockHeight { got: u64, last: u64 },
    #[error("Failed to encode with bincode")]
    Encoding(#[from] bincode::Error),
}

impl From<Rejection> for TransactionNotValid {
    fn from(rejection: Rejection) -> Self {
        TransactionNotValid(rejection)
    }
}

impl From<Rejection> for InternalError {
    fn from(rejection: Rejection) -> Self {
        InternalError::InvalidPayload(rejection)
    }
}
