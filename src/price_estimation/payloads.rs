use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::{Payload, PayloadShape, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Registration,
    Observation,
    Estimate,
    Reset,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionType::Registration => "registration",
            TransactionType::Observation => "observation",
            TransactionType::Estimate => "estimate",
            TransactionType::Reset => "reset",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PricePayload {
    Registration,
    Observation { observation: f64 },
    Estimate { estimate: f64 },
    Reset { period_count: u64 },
}

const REGISTRATION: PayloadShape = PayloadShape::new("RegistrationPayload", &[]);
const OBSERVATION: PayloadShape = PayloadShape::new("ObservationPayload", &["observation"]);
const ESTIMATE: PayloadShape = PayloadShape::new("EstimatePayload", &["estimate"]);
const RESET: PayloadShape = PayloadShape::new("ResetPayload", &["period_count"]);

impl Payload for PricePayload {
    type Kind = TransactionType;

    fn transaction_type(&self) -> TransactionType {
        match self {
            PricePayload::Registration => TransactionType::Registration,
            PricePayload::Observation { .. } => TransactionType::Observation,
            PricePayload::Estimate { .. } => TransactionType::Estimate,
            PricePayload::Reset { .. } => TransactionType::Reset,
        }
    }

    fn data(&self) -> BTreeMap<&'static str, Value> {
        let mut data = BTreeMap::new();
        match self {
            PricePayload::Registration => {}
            PricePayload::Observation { observation } => {
                data.insert("observation", Value::Float(*observation));
            }
            PricePayload::Estimate { estimate } => {
                data.insert("estimate", Value::Float(*estimate));
            }
            PricePayload::Reset { period_count } => {
                data.insert("period_count", Value::from(*period_count));
            }
        }
        data
    }

    fn shapes() -> Vec<(TransactionType, PayloadShape)> {
        vec![
            (TransactionType::Registration, REGISTRATION),
            (TransactionType::Observation, OBSERVATION),
            (TransactionType::Estimate, ESTIMATE),
            (TransactionType::Reset, RESET),
        ]
    }
}
