//! Moirai Consensus - the event-DAG consensus core.
//!
//! A Lachesis-style aBFT engine: events authored by weighted validators are
//! ingested into a DAG, assigned to frames, promoted to roots via the
//! forkless-cause relation, and finalized by the atropos election. Byzantine
//! behavior (equivocation, inactivity) is absorbed into effective-weight
//! changes rather than surfaced as faults.
//!
//! The [`Lachesis`] engine is one validator's view; `moirai-network` drives
//! one engine per validator and gossips missing events between them.

pub mod causality;
pub mod election;
pub mod engine;
pub mod error;
pub mod forks;
pub mod registry;
pub mod store;

pub use causality::forkless_cause;
pub use election::{Election, RootSet, Vote};
pub use engine::Lachesis;
pub use error::ConsensusError;
pub use forks::ForkDetector;
pub use registry::{EngineConfig, ValidatorRegistry};
pub use store::EventStore;
