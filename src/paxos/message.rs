use crate::paxos::SequenceNo;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaxosMessage<V> {
    /// Proposer asks for promises for `n`, carrying the value it would like to propose.
    Prepare { n: SequenceNo, v: V },
    /// Acceptor promises to ignore anything below `n`. `v` is the value it last accepted at
    /// `nv`, or the proposer's own value echoed back with no `nv` if it never accepted one.
    Promise {
        n: SequenceNo,
        v: V,
        nv: Option<SequenceNo>,
    },
    /// Acceptor has already promised `highest`, which is above the prepared number.
    Nack { n: SequenceNo, highest: SequenceNo },
    Accept { n: SequenceNo, v: V },
    Accepted { n: SequenceNo, v: V },
}

impl<V> PaxosMessage<V> {
    pub fn n(&self) -> &SequenceNo {
        match self {
            PaxosMessage::Prepare { n, .. }
            | PaxosMessage::Promise { n, .. }
            | PaxosMessage::Nack { n, .. }
            | PaxosMessage::Accept { n, .. }
            | PaxosMessage::Accepted { n, .. } => n,
        }
    }
}

/// A message together with the node that sent it and the node set it was produced under,
/// the unit carried by transports.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Envelope<V> {
    pub from: String,
    pub view: Vec<String>,
    pub message: PaxosMessage<V>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shape() {
        let message = PaxosMessage::Promise {
            n: SequenceNo {
                round_hint: 3,
                seq: 1,
                proposer_id: "a".into(),
            },
            v: "a".to_string(),
            nv: None,
        };
        let envelope = Envelope {
            from: "b".into(),
            view: vec!["a".into(), "b".into()],
            message,
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["from"], "b");
        assert_eq!(json["view"][1], "b");
        assert_eq!(json["message"]["type"], "PROMISE");
        assert_eq!(json["message"]["n"]["roundHint"], 3);
        assert!(json["message"]["nv"].is_null());

        let parsed: Envelope<String> = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, envelope);
    }
}
