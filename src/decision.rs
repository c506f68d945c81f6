/// Where a threshold-voting round stands after the latest block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<T> {
    /// Not enough contributions yet, or still waiting on block confirmations.
    Pending,
    Reached(T),
    /// No outcome can reach the threshold any more.
    NoMajority,
}

impl<T> Decision<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Decision::Pending)
    }

    pub fn reached(self) -> Option<T> {
        match self {
            Decision::Reached(t) => Some(t),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decision<U> {
        match self {
            Decision::Pending => Decision::Pending,
            Decision::Reached(t) => Decision::Reached(f(t)),
            Decision::NoMajority => Decision::NoMajority,
        }
    }
}
