//! GRANDPA finality engine.
//!
//! One two-phase round per finalization attempt: prevote on the best audited
//! head, then precommit on the prevote super-majority candidate. Every
//! received vote is persisted before it is counted, so a crash mid-round is
//! recoverable. Equivocation on the finalized candidate cancels the round;
//! that is an outcome, not an error.

pub mod engine;
pub mod gossip;
pub mod messages;
pub mod store;
pub mod tree;

pub use engine::{GrandpaConfig, GrandpaEngine, RoundOutcome, RoundStage};
pub use gossip::{TcpGossip, VoteTransport};
pub use messages::{Justification, PeerMessage, Stage, VoteMsg};
pub use store::VoteStore;
pub use tree::{BlockRecord, BlockTree};
