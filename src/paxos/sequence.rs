use serde::{Deserialize, Serialize};
use std::fmt;

/// SequenceNo orders Paxos proposals. Ordering is lexicographic on (round_hint, seq,
/// proposer_id), so numbers from different proposers never compare equal.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceNo {
    pub round_hint: u64,
    pub seq: u64,
    pub proposer_id: String,
}

impl fmt::Display for SequenceNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.round_hint, self.seq, self.proposer_id)
    }
}

pub trait SequenceGenerator: Send + 'static {
    /// A sequence number greater than `highest_seen`.
    fn next_after(&mut self, highest_seen: Option<&SequenceNo>) -> SequenceNo;
}

/// Generates sequence numbers hinted by a local counter, such as the node's tx id, so the
/// node with the most recent data tends to propose the highest numbers.
pub struct HintedSequenceGenerator<F> {
    proposer_id: String,
    round_hint: F,
}

impl<F: Fn() -> u64 + Send + 'static> HintedSequenceGenerator<F> {
    pub fn new(proposer_id: impl Into<String>, round_hint: F) -> Self {
        HintedSequenceGenerator {
            proposer_id: proposer_id.into(),
            round_hint,
        }
    }
}

impl<F: Fn() -> u64 + Send + 'static> SequenceGenerator for HintedSequenceGenerator<F> {
    fn next_after(&mut self, highest_seen: Option<&SequenceNo>) -> SequenceNo {
        let hint = (self.round_hint)();
        match highest_seen {
            Some(highest) if highest.round_hint >= hint => SequenceNo {
                round_hint: highest.round_hint,
                seq: highest.seq + 1,
                proposer_id: self.proposer_id.clone(),
            },
            _ => SequenceNo {
                round_hint: hint,
                seq: 0,
                proposer_id: self.proposer_id.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(round_hint: u64, seq: u64, proposer_id: &str) -> SequenceNo {
        SequenceNo {
            round_hint,
            seq,
            proposer_id: proposer_id.into(),
        }
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(n(1, 0, "a") < n(1, 0, "b"));
        assert!(n(1, 0, "z") < n(1, 1, "a"));
        assert!(n(1, 9, "z") < n(2, 0, "a"));
    }

    #[test]
    fn generated_numbers_exceed_highest_seen() {
        let mut generator = HintedSequenceGenerator::new("b", || 5);

        assert_eq!(generator.next_after(None), n(5, 0, "b"));
        assert_eq!(generator.next_after(Some(&n(3, 7, "a"))), n(5, 0, "b"));

        let seen = n(5, 0, "c");
        let next = generator.next_after(Some(&seen));
        assert!(next > seen);
        assert_eq!(next, n(5, 1, "b"));

        let seen = n(9, 2, "a");
        assert_eq!(generator.next_after(Some(&seen)), n(9, 3, "b"));
    }
}
