use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Smallest number of participants strictly greater than two thirds of `max_participants`.
pub fn threshold(max_participants: usize) -> usize {
    (2 * max_participants) / 3 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConsensusParams")]
pub struct ConsensusParams {
    max_participants: usize,
}

#[derive(Deserialize)]
struct RawConsensusParams {
    max_participants: usize,
}

impl TryFrom<RawConsensusParams> for ConsensusParams {
    type Error = ConfigError;

    fn try_from(raw: RawConsensusParams) -> Result<Self, Self::Error> {
        Self::new(raw.max_participants)
    }
}

impl ConsensusParams {
    pub fn new(max_participants: usize) -> Result<Self, ConfigError> {
        if max_participants == 0 {
            return Err(ConfigError::MaxParticipantsTooLow(max_participants));
        }
        Ok(Self { max_participants })
    }

    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    pub fn threshold(&self) -> usize {
        threshold(self.max_participants)
    }

    /// Byzantine participants the set tolerates: `f` such that `n >= 3f + 1`.
    pub fn max_faulty(&self) -> usize {
        (self.max_participants - 1) / 3
    }

    pub fn consensus_threshold(&self) -> usize {
        self.max_participants - self.max_faulty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_sanity() {
        for (n, threshold, max_faulty) in [
            (1, 1, 0),
            (2, 2, 0),
            (3, 3, 0),
            (4, 3, 1),
            (5, 4, 1),
            (6, 5, 1),
            (7, 5, 2),
            (10, 7, 3),
            (100, 67, 33),
        ] {
            let params = ConsensusParams::new(n).unwrap();
            assert_eq!(params.threshold(), threshold, "n = {}", n);
            assert_eq!(params.max_faulty(), max_faulty, "n = {}", n);
        }
    }

    #[test]
    fn consensus_threshold_matches_threshold() {
        for n in 1..=1000 {
            let params = ConsensusParams::new(n).unwrap();
            assert_eq!(params.consensus_threshold(), params.threshold(), "n = {}", n);
        }
    }

    #[test]
    fn zero_participants_is_rejected() {
        assert_eq!(
            ConsensusParams::new(0),
            Err(ConfigError::MaxParticipantsTooLow(0))
        );
    }

    #[test]
    fn deserialization_validates() {
        let ok: ConsensusParams =
            bincode::deserialize(&bincode::serialize(&4usize).unwrap()).unwrap();
        assert_eq!(ok.threshold(), 3);

        let bad: Result<ConsensusParams, _> =
            bincode::deserialize(&bincode::serialize(&0usize).unwrap());
        assert!(bad.is_err());
    }
}
