//! Single value Paxos, independent of how messages travel and how numbers are generated.
mod engine;
mod message;
mod sequence;

pub use engine::Paxos;
pub use engine::PaxosError;
pub use engine::PaxosTransport;
pub use message::Envelope;
pub use message::PaxosMessage;
pub use sequence::HintedSequenceGenerator;
pub use sequence::SequenceGenerator;
pub use sequence::SequenceNo;
