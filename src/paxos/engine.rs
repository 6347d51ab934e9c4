use crate::paxos::{PaxosMessage, SequenceGenerator, SequenceNo};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum PaxosError {
    #[error("Node set must contain this node [{0}]")]
    NotAMember(String),
}

/// PaxosTransport delivers messages to other nodes. `send()` must not block; it is called
/// after the engine's lock is released, but other handlers may be waiting for that lock.
///
/// `view` is the node set the message was produced under. Receivers pass it back to
/// `handle_in_view()` so nodes that disagree on membership ignore each other.
pub trait PaxosTransport<V>: Send + Sync + 'static {
    fn send(&self, to: &str, view: &[String], message: PaxosMessage<V>);
}

/// Paxos is a single value consensus engine, used to agree on who is master. Each node runs
/// proposer, acceptor and learner. Values chosen by a majority are sent to `chosen_tx`.
pub struct Paxos<V, T, G> {
    self_id: String,
    transport: T,
    state: Mutex<State<V, G>>,
}

struct State<V, G> {
    nodes: BTreeSet<String>,
    generator: G,
    chosen_tx: mpsc::UnboundedSender<V>,

    // Acceptor
    highest_seen: Option<SequenceNo>,
    accepted: Option<(SequenceNo, V)>,

    // Proposer
    proposal: Option<Proposal<V>>,

    // Learner
    accepted_by: HashMap<SequenceNo, (V, HashSet<String>)>,
    chosen: Option<(SequenceNo, V)>,
}

struct Proposal<V> {
    n: SequenceNo,
    value: V,
    // Slot per node: the value it reported and the number it was accepted at.
    promises: HashMap<String, (V, Option<SequenceNo>)>,
}

type Outgoing<V> = Vec<(String, PaxosMessage<V>)>;

/// Rounds a learner counts ACCEPTED messages for before forgetting the oldest.
const MAX_LEARNED_ROUNDS: usize = 16;

impl<V, T, G> Paxos<V, T, G>
where
    V: Clone + Eq + Debug + Send + 'static,
    T: PaxosTransport<V>,
    G: SequenceGenerator,
{
    pub fn new(
        self_id: impl Into<String>,
        nodes: impl IntoIterator<Item = String>,
        transport: T,
        generator: G,
        chosen_tx: mpsc::UnboundedSender<V>,
    ) -> Result<Self, PaxosError> {
        let self_id = self_id.into();
        let nodes: BTreeSet<String> = nodes.into_iter().collect();
        if !nodes.contains(&self_id) {
            return Err(PaxosError::NotAMember(self_id));
        }

        Ok(Paxos {
            self_id,
            transport,
            state: Mutex::new(State {
                nodes,
                generator,
                chosen_tx,
                highest_seen: None,
                accepted: None,
                proposal: None,
                accepted_by: HashMap::new(),
                chosen: None,
            }),
        })
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Replace the node set. If it actually changed, all election state except the highest
    /// sequence number seen is discarded: a decision made by the old set means nothing to
    /// the new one.
    pub fn set_nodes(&self, nodes: impl IntoIterator<Item = String>) -> Result<bool, PaxosError> {
        let nodes: BTreeSet<String> = nodes.into_iter().collect();
        if !nodes.contains(&self.self_id) {
            return Err(PaxosError::NotAMember(self.self_id.clone()));
        }

        let mut state = self.lock();
        if state.nodes == nodes {
            return Ok(false);
        }

        state.nodes = nodes;
        state.accepted = None;
        state.proposal = None;
        state.accepted_by.clear();
        state.chosen = None;
        Ok(true)
    }

    pub fn nodes(&self) -> Vec<String> {
        self.lock().view()
    }

    pub fn highest_seen(&self) -> Option<SequenceNo> {
        self.lock().highest_seen.clone()
    }

    /// The value chosen under the current node set, if any.
    pub fn chosen(&self) -> Option<V> {
        self.lock().chosen.as_ref().map(|(_, v)| v.clone())
    }

    /// Start a round proposing `value`. Returns the sequence number used.
    pub fn propose(&self, value: V) -> SequenceNo {
        let (n, view, outgoing) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let n = state.generator.next_after(state.highest_seen.as_ref());
            state.proposal = Some(Proposal {
                n: n.clone(),
                value: value.clone(),
                promises: HashMap::new(),
            });
            let outgoing = state.broadcast(PaxosMessage::Prepare {
                n: n.clone(),
                v: value,
            });
            (n, state.view(), outgoing)
        };

        self.dispatch(view, outgoing);
        n
    }

    /// Handle a message from `from`.
    pub fn handle(&self, from: &str, message: PaxosMessage<V>) {
        let (view, outgoing) = {
            let mut state = self.lock();
            let outgoing = state.process(from.to_string(), message);
            (state.view(), outgoing)
        };

        self.dispatch(view, outgoing);
    }

    /// Handle a message produced under the sender's node set `view`. Returns false, and
    /// ignores the message, if that is not this node's current node set.
    pub fn handle_in_view(&self, from: &str, view: &[String], message: PaxosMessage<V>) -> bool {
        let (view, outgoing) = {
            let mut state = self.lock();
            if !state.nodes.iter().eq(view.iter()) {
                return false;
            }
            let outgoing = state.process(from.to_string(), message);
            (state.view(), outgoing)
        };

        self.dispatch(view, outgoing);
        true
    }

    // Messages addressed to this node are processed in a loop here rather than recursively.
    fn dispatch(&self, view: Vec<String>, outgoing: Outgoing<V>) {
        let mut local = VecDeque::new();
        for (to, message) in outgoing {
            if to == self.self_id {
                local.push_back(message);
            } else {
                self.transport.send(&to, &view, message);
            }
        }

        while let Some(message) = local.pop_front() {
            let (view, outgoing) = {
                let mut state = self.lock();
                let outgoing = state.process(self.self_id.clone(), message);
                (state.view(), outgoing)
            };
            for (to, message) in outgoing {
                if to == self.self_id {
                    local.push_back(message);
                } else {
                    self.transport.send(&to, &view, message);
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<V, G>> {
        self.state.lock().expect("Paxos state mutex poison")
    }
}

impl<V, G> State<V, G>
where
    V: Clone + Eq + Debug + Send + 'static,
{
    fn process(&mut self, from: String, message: PaxosMessage<V>) -> Outgoing<V> {
        if !self.nodes.contains(&from) {
            return Vec::new();
        }

        match message {
            PaxosMessage::Prepare { n, v } => self.on_prepare(from, n, v),
            PaxosMessage::Promise { n, v, nv } => self.on_promise(from, n, v, nv),
            PaxosMessage::Nack { n, highest } => self.on_nack(n, highest),
            PaxosMessage::Accept { n, v } => self.on_accept(n, v),
            PaxosMessage::Accepted { n, v } => self.on_accepted(from, n, v),
        }
    }

    fn on_prepare(&mut self, from: String, n: SequenceNo, v: V) -> Outgoing<V> {
        if let Some(highest) = &self.highest_seen {
            if &n < highest {
                let reply = PaxosMessage::Nack {
                    n,
                    highest: highest.clone(),
                };
                return vec![(from, reply)];
            }
        }

        self.highest_seen = Some(n.clone());
        let reply = match &self.accepted {
            Some((nv, accepted)) => PaxosMessage::Promise {
                n,
                v: accepted.clone(),
                nv: Some(nv.clone()),
            },
            None => PaxosMessage::Promise { n, v, nv: None },
        };
        vec![(from, reply)]
    }

    fn on_promise(&mut self, from: String, n: SequenceNo, v: V, nv: Option<SequenceNo>) -> Outgoing<V> {
        let majority = self.majority();
        let proposal = match &mut self.proposal {
            Some(proposal) if proposal.n == n => proposal,
            _ => return Vec::new(),
        };

        let supersedes = match proposal.promises.get(&from) {
            Some((_, previous_nv)) => nv > *previous_nv,
            None => true,
        };
        if supersedes {
            proposal.promises.insert(from, (v, nv));
        }
        if proposal.promises.len() < majority {
            return Vec::new();
        }

        // Adopt the value accepted at the highest number. Promises without one carry our
        // own value back, and None sorts lowest.
        let chosen = proposal
            .promises
            .values()
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|(v, _)| v.clone())
            .unwrap_or_else(|| proposal.value.clone());

        // Cleared before broadcasting so a late PROMISE cannot trigger a second ACCEPT.
        self.proposal = None;
        self.broadcast(PaxosMessage::Accept { n, v: chosen })
    }

    fn on_nack(&mut self, n: SequenceNo, highest: SequenceNo) -> Outgoing<V> {
        if self.highest_seen.as_ref().map_or(true, |seen| &highest > seen) {
            self.highest_seen = Some(highest);
        }
        if self.proposal.as_ref().map_or(false, |p| p.n == n) {
            self.proposal = None;
        }
        Vec::new()
    }

    fn on_accept(&mut self, n: SequenceNo, v: V) -> Outgoing<V> {
        if let Some(highest) = &self.highest_seen {
            if &n < highest {
                return Vec::new();
            }
        }

        self.highest_seen = Some(n.clone());
        self.accepted = Some((n.clone(), v.clone()));
        self.broadcast(PaxosMessage::Accepted { n, v })
    }

    fn on_accepted(&mut self, from: String, n: SequenceNo, v: V) -> Outgoing<V> {
        if self.chosen.as_ref().map_or(false, |(chosen_n, _)| &n < chosen_n) {
            return Vec::new();
        }
        if !self.accepted_by.contains_key(&n) && self.accepted_by.len() >= MAX_LEARNED_ROUNDS {
            // A later round re-proposes whatever an abandoned one may have chosen.
            if let Some(oldest) = self.accepted_by.keys().min().cloned() {
                self.accepted_by.remove(&oldest);
            }
        }

        let majority = self.majority();
        let (value, senders) = self
            .accepted_by
            .entry(n.clone())
            .or_insert_with(|| (v.clone(), HashSet::new()));
        if *value != v || !senders.insert(from) {
            return Vec::new();
        }

        if senders.len() == majority {
            let newer = self.chosen.as_ref().map_or(true, |(chosen_n, _)| &n > chosen_n);
            if newer {
                self.accepted_by.retain(|round, _| round >= &n);
                self.chosen = Some((n, v.clone()));
                let _ = self.chosen_tx.send(v);
            }
        }
        Vec::new()
    }

    fn view(&self) -> Vec<String> {
        self.nodes.iter().cloned().collect()
    }

    fn majority(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    fn broadcast(&self, message: PaxosMessage<V>) -> Outgoing<V> {
        self.nodes.iter().map(|node| (node.clone(), message.clone())).collect()
    }
}
