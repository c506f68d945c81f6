pub mod abci_app;
pub mod collect;
pub mod db;
pub mod decision;
pub mod error;
pub mod params;
pub mod payload;
pub mod price_estimation;
pub mod round;
pub mod sequence;
pub mod timeouts;
pub mod vote_count;

pub use crate::abci_app::{AbciApp, AbciAppConfig, Application, KindOf, TransitionFunction};
pub use crate::collect::{
    CollectDifferentUntilAll, CollectDifferentUntilThreshold, CollectSameUntilThreshold,
};
pub use crate::db::{AbciAppDb, SynchronizedData, PARTICIPANTS_KEY};
pub use crate::decision::Decision;
pub use crate::error::{ConfigError, Error, InternalError, Rejection, TransactionNotValid};
pub use crate::params::ConsensusParams;
pub use crate::payload::{
    Payload, PayloadRegistry, PayloadShape, Transaction, TransactionKind, Value,
};
pub use crate::round::{BlockConfirmations, Round, RoundBase, RoundContext};
pub use crate::sequence::{Block, BlockHeader, BlockOutcome, RoundSequence};
pub use crate::timeouts::Timeouts;
pub use crate::vote_count::VoteCount;

/// Identifies a participant.
pub type Address = String;

pub type Result<T> = std::result::Result<T, Error>;
