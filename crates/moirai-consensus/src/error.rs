use moirai_types::EventId;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in consensus operations.
///
/// Byzantine behavior never surfaces here: equivocation and inactivity are
/// absorbed into weight adjustments. Only programmer-error conditions fault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("missing ancestor {parent} of event {child}")]
    MissingAncestor { child: EventId, parent: Uuid },

    #[error("consensus halted: all validator weight is zero")]
    ConsensusHalted,
}
