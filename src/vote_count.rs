use std::collections::BTreeSet;

use crate::payload::Payload;
use crate::Address;

/// Senders grouped by the payload value they contributed.
///
/// Payloads may hold floats, so candidates are matched by equality rather
/// than kept in an ordered map. Candidates keep first-seen order, which makes
/// ties resolve the same way on every replica.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteCount<P: Payload> {
    pub candidates: Vec<(P, BTreeSet<Address>)>,
    pub voters: BTreeSet<Address>,
}

impl<P: Payload> Default for VoteCount<P> {
    fn default() -> Self {
        Self {
            candidates: Default::default(),
            voters: Default::default(),
        }
    }
}

impl<P: Payload> VoteCount<P> {
    pub fn count<'a>(votes: impl IntoIterator<Item = (&'a Address, &'a P)>) -> Self
    where
        P: 'a,
    {
        let mut count = VoteCount::default();
        for (sender, payload) in votes {
            count.add(sender.clone(), payload.clone());
        }
        count
    }

    /// Returns false if `sender` had already voted, leaving the count unchanged.
    pub fn add(&mut self, sender: Address, payload: P) -> bool {
        if !self.voters.insert(sender.clone()) {
            return false;
        }
        match self.candidates.iter_mut().find(|(p, _)| *p == payload) {
            Some((_, senders)) => {
                senders.insert(sender);
            }
            None => self
                .candidates
                .push((payload, BTreeSet::from_iter([sender]))),
        }
        true
    }

    pub fn candidate_with_most_votes(&self) -> Option<(&P, usize)> {
        // max_by_key returns the last maximum, we want the first seen.
        self.candidates
            .iter()
            .map(|(p, senders)| (p, senders.len()))
            .fold(None, |best: Option<(&P, usize)>, (p, c)| match best {
                Some((_, best_c)) if best_c >= c => best,
                _ => Some((p, c)),
            })
    }

    pub fn has_majority(&self, threshold: usize) -> bool {
        self.candidate_with_most_votes()
            .map(|(_, c)| c >= threshold)
            .unwrap_or(false)
    }

    pub fn is_majority_possible(&self, n_participants: usize, threshold: usize) -> bool {
        let most_votes = self
            .candidate_with_most_votes()
            .map(|(_, c)| c)
            .unwrap_or_default();

        let remaining_voters = n_participants.saturating_sub(self.voters.len());

        // suppose every remaining vote goes to the value with the most votes.
        most_votes + remaining_voters >= threshold
    }
}
