use std::collections::BTreeSet;
use std::sync::Arc;

use abci_rounds::collect::most_voted;
use abci_rounds::price_estimation::{
    CollectObservationRound, EstimateConsensusRound, Event, PriceEstimation, PriceEstimationData,
    PricePayload, RegistrationRound, ResetRound, TransactionType, ESTIMATE_KEY, OBSERVATIONS_KEY,
};
use abci_rounds::{
    AbciAppDb, ConsensusParams, InternalError, PayloadRegistry, Rejection, Result, Round,
    RoundContext, SynchronizedData, Transaction, TransactionNotValid, Value, PARTICIPANTS_KEY,
};

static INIT: std::sync::Once = std::sync::Once::new();

fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn participants(n: usize) -> BTreeSet<String> {
    (0..n).map(|i| format!("agent_{}", i)).collect()
}

fn ctx(n: usize, confirmations: u64) -> Result<RoundContext<TransactionType>> {
    let data = SynchronizedData::new(AbciAppDb::new(PriceEstimation::setup_data(&participants(n))));
    Ok(RoundContext {
        synchronized_data: data,
        consensus_params: ConsensusParams::new(n)?,
        registry: Arc::new(PayloadRegistry::bootstrap::<PricePayload>()?),
        required_block_confirmations: confirmations,
    })
}

fn estimate(sender: &str, estimate: f64) -> Transaction<PricePayload> {
    Transaction::new(sender, PricePayload::Estimate { estimate })
}

fn observation(sender: &str, observation: f64) -> Transaction<PricePayload> {
    Transaction::new(sender, PricePayload::Observation { observation })
}

fn registration(sender: &str) -> Transaction<PricePayload> {
    Transaction::new(sender, PricePayload::Registration)
}

const NOT_A_PARTICIPANT: &str =
    r#"sender not in list of participants: ["agent_0", "agent_1", "agent_2", "agent_3"]"#;

#[test]
fn test_registration_round_collects_all_participants() -> Result<()> {
    init();
    let mut round = RegistrationRound::new(&ctx(4, 0)?)?;
    let mut senders = participants(4).into_iter();
    let first = senders.next().unwrap();

    round.process_payload(registration(&first))?;
    assert_eq!(round.collection().keys().collect::<Vec<_>>(), vec![&first]);
    assert!(round.end_block().is_none());

    let err = round.check_payload(&registration(&first)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "payload attribute sender with value agent_0 has already been added for round: registration"
    );
    let err = round.process_payload(registration(&first)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "internal error: payload attribute sender with value agent_0 has already been added for round: registration"
    );

    for sender in senders {
        assert!(round.end_block().is_none());
        round.process_payload(registration(&sender))?;
    }

    let (data, event) = round.end_block().unwrap();
    assert_eq!(event, Event::Done);
    assert_eq!(data.participants()?, participants(4));
    Ok(())
}

#[test]
fn test_registration_round_waits_for_confirmations() -> Result<()> {
    init();
    let mut round = RegistrationRound::new(&ctx(4, 1)?)?;
    for sender in participants(4) {
        round.process_payload(registration(&sender))?;
    }
    assert!(round.end_block().is_none());
    let (_, event) = round.end_block().unwrap();
    assert_eq!(event, Event::Done);
    Ok(())
}

#[test]
fn test_collect_same_round() -> Result<()> {
    init();
    let mut round = EstimateConsensusRound::new(&ctx(4, 0)?)?;

    let err = round.process_payload(estimate("sender", 1.0)).unwrap_err();
    assert_eq!(err.to_string(), format!("internal error: {}", NOT_A_PARTICIPANT));
    let err = round.check_payload(&estimate("sender", 1.0)).unwrap_err();
    assert_eq!(err.to_string(), NOT_A_PARTICIPANT);

    round.process_payload(estimate("agent_0", 1.5))?;
    assert!(round.end_block().is_none());
    assert!(!round.threshold_reached());
    assert_eq!(round.most_voted_payload(), Err(InternalError::NotEnoughVotes));
    assert_eq!(
        InternalError::NotEnoughVotes.to_string(),
        "internal error: not enough votes"
    );

    let err = round.process_payload(estimate("agent_0", 1.5)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "internal error: sender agent_0 has already sent value for round: estimate_consensus"
    );
    let err = round.check_payload(&estimate("agent_0", 1.5)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "sender agent_0 has already sent value for round: estimate_consensus"
    );

    round.process_payload(estimate("agent_1", 1.5))?;
    assert!(!round.threshold_reached());
    round.process_payload(estimate("agent_2", 1.5))?;
    assert!(round.threshold_reached());
    assert_eq!(
        round.most_voted_payload(),
        Ok(&PricePayload::Estimate { estimate: 1.5 })
    );
    round.process_payload(estimate("agent_3", 9.0))?;
    assert_eq!(
        round.most_voted_payload(),
        Ok(&PricePayload::Estimate { estimate: 1.5 })
    );

    let (data, event) = round.end_block().unwrap();
    assert_eq!(event, Event::Done);
    assert_eq!(data.most_voted_estimate()?, 1.5);
    assert!(round.synchronized_data().get(ESTIMATE_KEY).is_none());
    Ok(())
}

#[test]
fn test_collect_same_round_no_majority() -> Result<()> {
    init();
    let mut round = EstimateConsensusRound::new(&ctx(4, 0)?)?;
    round.process_payload(estimate("agent_0", 1.0))?;
    round.process_payload(estimate("agent_1", 2.0))?;
    assert!(round.is_majority_possible());
    assert!(round.end_block().is_none());

    round.process_payload(estimate("agent_2", 3.0))?;
    assert!(!round.is_majority_possible());
    let (data, event) = round.end_block().unwrap();
    assert_eq!(event, Event::NoMajority);
    assert_eq!(&data, round.synchronized_data());
    Ok(())
}

#[test]
fn test_confirmations_never_roll_back_into_no_majority() -> Result<()> {
    init();
    let mut round = EstimateConsensusRound::new(&ctx(4, 2)?)?;
    for sender in ["agent_0", "agent_1", "agent_2"] {
        round.process_payload(estimate(sender, 7.0))?;
    }
    assert!(round.end_block().is_none());
    round.process_payload(estimate("agent_3", 8.0))?;
    assert!(round.is_majority_possible());
    assert!(round.end_block().is_none());
    let (_, event) = round.end_block().unwrap();
    assert_eq!(event, Event::Done);
    Ok(())
}

#[test]
fn test_round_rejects_other_transaction_types() -> Result<()> {
    init();
    let round = EstimateConsensusRound::new(&ctx(4, 0)?)?;
    let err = round.check_payload(&observation("agent_0", 1.0)).unwrap_err();
    assert_eq!(err.to_string(), "request 'observation' not recognized");
    assert!(matches!(
        err,
        TransactionNotValid(Rejection::UnexpectedTransactionType { .. })
    ));
    Ok(())
}

#[test]
fn test_check_payload_does_not_mutate() -> Result<()> {
    init();
    let mut round = EstimateConsensusRound::new(&ctx(4, 0)?)?;
    for sender in ["agent_0", "agent_1", "agent_2"] {
        round.check_payload(&estimate(sender, 1.0)).unwrap();
        round.check_payload(&estimate(sender, 1.0)).unwrap();
    }
    assert!(!round.threshold_reached());
    assert!(round.end_block().is_none());
    Ok(())
}

#[test]
fn test_collect_observation_round() -> Result<()> {
    init();
    let mut round = CollectObservationRound::new(&ctx(4, 0)?)?;
    round.process_payload(observation("agent_3", 10.0))?;
    round.process_payload(observation("agent_1", 12.0))?;
    assert!(round.end_block().is_none());

    round.process_payload(observation("agent_2", 11.0))?;
    let (data, event) = round.end_block().unwrap();
    assert_eq!(event, Event::Done);

    let observations = data.observations()?;
    assert_eq!(observations.len(), 3);
    assert_eq!(observations["agent_1"], 12.0);
    assert_eq!(abci_rounds::price_estimation::aggregate(&observations), Some(11.0));
    Ok(())
}

#[test]
fn test_reset_round_opens_a_new_period() -> Result<()> {
    init();
    let mut reset_ctx = ctx(4, 0)?;
    reset_ctx.synchronized_data = reset_ctx.synchronized_data.update([
        (ESTIMATE_KEY, Value::Float(3.0)),
        (OBSERVATIONS_KEY, Value::Map(Default::default())),
    ]);
    let mut round = ResetRound::new(&reset_ctx, &[PARTICIPANTS_KEY, ESTIMATE_KEY], 2)?;
    for sender in ["agent_0", "agent_1", "agent_2"] {
        round.process_payload(Transaction::new(sender, PricePayload::Reset { period_count: 1 }))?;
    }

    let (data, event) = round.end_block().unwrap();
    assert_eq!(event, Event::Done);
    assert_eq!(data.period_count(), 1);
    assert_eq!(data.most_voted_estimate()?, 3.0);
    assert!(data.get(OBSERVATIONS_KEY).is_none());
    assert_eq!(data.participants()?, participants(4));
    Ok(())
}

#[test]
fn test_reset_round_only_accepts_the_next_period() -> Result<()> {
    init();
    let mut round = ResetRound::new(&ctx(4, 0)?, &[PARTICIPANTS_KEY], 2)?;
    let stale = Transaction::new("agent_0", PricePayload::Reset { period_count: 42 });

    let err = round.check_payload(&stale).unwrap_err();
    assert_eq!(
        err.to_string(),
        "period 42 does not follow the current period, expected 1"
    );
    assert_eq!(
        round.process_payload(stale).unwrap_err(),
        InternalError::InvalidPayload(Rejection::UnexpectedPeriod {
            expected: 1,
            actual: 42
        })
    );
    for sender in ["agent_1", "agent_2"] {
        let tx = Transaction::new(sender, PricePayload::Reset { period_count: 42 });
        assert!(round.process_payload(tx).is_err());
    }
    assert!(round.end_block().is_none());
    Ok(())
}

#[test]
fn test_decided_payload_attributes_are_stored_as_most_voted() {
    assert_eq!(
        most_voted(&PricePayload::Estimate { estimate: 2.5 }),
        vec![(ESTIMATE_KEY.to_string(), Value::Float(2.5))]
    );
    assert!(most_voted(&PricePayload::Registration).is_empty());
}

#[test]
fn test_round_needs_participants() {
    init();
    let ctx = RoundContext {
        synchronized_data: SynchronizedData::new(AbciAppDb::new(Default::default())),
        consensus_params: ConsensusParams::new(4).unwrap(),
        registry: Arc::new(PayloadRegistry::bootstrap::<PricePayload>().unwrap()),
        required_block_confirmations: 0,
    };
    assert!(matches!(
        RegistrationRound::new(&ctx),
        Err(abci_rounds::Error::KeyNotFound(k)) if k == PARTICIPANTS_KEY
    ));
}
