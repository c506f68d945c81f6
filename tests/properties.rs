use std::collections::BTreeSet;
use std::sync::Arc;

use abci_rounds::price_estimation::{
    EstimateConsensusRound, Event, PriceEstimation, PricePayload, TransactionType,
};
use abci_rounds::{
    params, AbciAppDb, ConsensusParams, PayloadRegistry, Result, Round, RoundContext,
    SynchronizedData, Transaction,
};
use eyre::eyre;
use quickcheck::{Arbitrary, Gen, TestResult};
use quickcheck_macros::quickcheck;
use rand::prelude::{SliceRandom, StdRng};
use rand::SeedableRng;

static INIT: std::sync::Once = std::sync::Once::new();

fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn estimate_round(n: usize) -> Result<EstimateConsensusRound> {
    let participants: BTreeSet<String> = (0..n).map(|i| format!("agent_{}", i)).collect();
    let ctx = RoundContext::<TransactionType> {
        synchronized_data: SynchronizedData::new(AbciAppDb::new(PriceEstimation::setup_data(
            &participants,
        ))),
        consensus_params: ConsensusParams::new(n)?,
        registry: Arc::new(PayloadRegistry::bootstrap::<PricePayload>()?),
        required_block_confirmations: 0,
    };
    EstimateConsensusRound::new(&ctx)
}

/// Estimates sent by a random subset of a round's participants, one per sender.
#[derive(Debug, Clone)]
struct Votes {
    n_participants: usize,
    votes: Vec<(usize, u8)>,
}

impl Votes {
    fn transactions(&self) -> Vec<Transaction<PricePayload>> {
        self.votes
            .iter()
            .map(|(sender, value)| {
                Transaction::new(
                    format!("agent_{}", sender),
                    PricePayload::Estimate {
                        estimate: *value as f64,
                    },
                )
            })
            .collect()
    }
}

impl Arbitrary for Votes {
    fn arbitrary(g: &mut Gen) -> Self {
        let n_participants = usize::arbitrary(g) % 10 + 1;
        let mut senders: Vec<usize> = (0..n_participants).collect();
        senders.retain(|_| bool::arbitrary(g));
        // few distinct values so that majorities actually happen
        let votes = senders
            .into_iter()
            .map(|s| (s, u8::arbitrary(g) % 3))
            .collect();
        Self {
            n_participants,
            votes,
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let mut shrunk = Vec::new();
        for i in 0..self.votes.len() {
            let mut votes = self.votes.clone();
            votes.remove(i);
            shrunk.push(Self {
                n_participants: self.n_participants,
                votes,
            });
        }
        Box::new(shrunk.into_iter())
    }
}

#[quickcheck]
fn prop_threshold_is_a_two_thirds_quorum(n: u16) -> TestResult {
    if n == 0 {
        return TestResult::discard();
    }
    let n = n as usize;
    let t = params::threshold(n);
    TestResult::from_bool(3 * t > 2 * n && t <= n)
}

#[quickcheck]
fn prop_second_payload_from_sender_is_rejected(
    votes: Votes,
    value: u8,
) -> eyre::Result<TestResult> {
    init();
    let txs = votes.transactions();
    let first = match txs.first() {
        Some(tx) => tx.clone(),
        None => return Ok(TestResult::discard()),
    };

    let mut round = estimate_round(votes.n_participants)?;
    for tx in txs {
        round.process_payload(tx)?;
    }
    let threshold_reached = round.threshold_reached();
    let majority_possible = round.is_majority_possible();

    let again = Transaction::new(
        first.sender.clone(),
        PricePayload::Estimate {
            estimate: value as f64,
        },
    );
    if round.check_payload(&again).is_ok() || round.process_payload(again).is_ok() {
        return Err(eyre!("accepted a second payload from {}", first.sender));
    }

    Ok(TestResult::from_bool(
        round.threshold_reached() == threshold_reached
            && round.is_majority_possible() == majority_possible,
    ))
}

#[quickcheck]
fn prop_check_payload_never_mutates(votes: Votes) -> eyre::Result<TestResult> {
    init();
    let mut checked = estimate_round(votes.n_participants)?;
    let mut untouched = estimate_round(votes.n_participants)?;
    for tx in votes.transactions() {
        let _ = checked.check_payload(&tx);
    }
    let checked_outcome = checked.end_block();
    Ok(TestResult::from_bool(
        checked_outcome == untouched.end_block() && checked_outcome.is_none(),
    ))
}

#[quickcheck]
fn prop_block_outcome_is_independent_of_order(votes: Votes, seed: u64) -> eyre::Result<TestResult> {
    init();
    let mut rng = StdRng::seed_from_u64(seed);
    let txs = votes.transactions();
    let mut shuffled = txs.clone();
    shuffled.shuffle(&mut rng);

    let mut a = estimate_round(votes.n_participants)?;
    let mut b = estimate_round(votes.n_participants)?;
    for tx in txs {
        a.process_payload(tx)?;
    }
    for tx in shuffled {
        b.process_payload(tx)?;
    }

    let outcome_a = a.end_block();
    let outcome_b = b.end_block();
    if let Some((_, Event::NoMajority)) = outcome_a {
        if a.is_majority_possible() {
            return Err(eyre!("no majority reported while one was still possible"));
        }
    }
    Ok(TestResult::from_bool(outcome_a == outcome_b))
}

#[quickcheck]
fn prop_decided_value_reached_threshold(votes: Votes) -> eyre::Result<TestResult> {
    init();
    let mut round = estimate_round(votes.n_participants)?;
    for tx in votes.transactions() {
        round.process_payload(tx)?;
    }
    match round.end_block() {
        Some((_, Event::Done)) => {
            let winner = round.most_voted_payload()?.clone();
            let support = votes
                .transactions()
                .iter()
                .filter(|tx| tx.payload == winner)
                .count();
            Ok(TestResult::from_bool(
                support >= params::threshold(votes.n_participants),
            ))
        }
        Some((_, _)) => Ok(TestResult::passed()),
        None => Ok(TestResult::from_bool(!round.threshold_reached())),
    }
}
